//! Persistence layer
//!
//! - Durable block stores (directory, RocksDB)
//! - The root pointer: the single mutable value a database keeps on disk
//! - Write-Ahead Logging of commit intents and outcomes

pub mod root;
pub mod storage;
pub mod wal;

pub use root::{FileRootPointer, MemoryRootPointer, RootPointer};
#[cfg(feature = "rocksdb")]
pub use storage::RocksBlockStore;
pub use storage::FileBlockStore;
pub use wal::{Wal, WalEntry, WalError, WalResult};
