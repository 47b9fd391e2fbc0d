//! Blockgraph
//!
//! A content-addressed property graph database with an OpenCypher-style
//! query language and optimistic transactions.
//!
//! # Architecture
//!
//! - [`graph`]: immutable blocks addressed by SHA-256, paged indexes, snapshots,
//!   buffered diffs and traversal
//! - [`query`]: lexer, pest grammar, validation, lowering to a logical plan and
//!   a Volcano-style executor
//! - [`transaction`]: optimistic transactions with snapshot or serializable
//!   isolation, WAL-backed commit and recovery
//! - [`persistence`]: durable block stores, the root pointer and the WAL
//! - [`Database`]: the facade tying them together
//!
//! Every commit publishes a new root manifest; older roots stay readable, so
//! a snapshot never changes under a reader.
//!
//! ## Example Usage
//!
//! ```rust
//! use blockgraph::{Database, Params, Value};
//!
//! let db = Database::in_memory().unwrap();
//! db.execute(
//!     "CREATE (:Person {name: 'Alice'})-[:KNOWS]->(:Person {name: 'Bob'})",
//!     &Params::new(),
//!     None,
//! )
//! .unwrap();
//!
//! let result = db
//!     .execute(
//!         "MATCH (a:Person {name: $name})-[:KNOWS]->(b) RETURN b.name AS friend",
//!         &Params::new().with("name", "Alice"),
//!         None,
//!     )
//!     .unwrap();
//! assert_eq!(result.rows[0].get("friend"), Some(&Value::from("Bob")));
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod persistence;
pub mod query;
pub mod transaction;

// Re-export main types for convenience
pub use cancel::{CancellationToken, Cancelled};
pub use config::{ConfigError, DatabaseConfig, StorageConfig};
pub use db::{CommitInfo, Database};
pub use error::{Error, ErrorKind, Result};

pub use graph::{
    BlockStore, ContentHash, Direction, Entity, EntityId, GraphEngine, GraphError, GraphId, GraphRead,
    GraphResult, GraphSnapshot, Label, MemoryBlockStore, PropertyMap, PropertyValue, RelType, Relationship,
    RelationshipId, StorageError, StorageResult,
};

pub use query::{CompileError, CompileErrorKind, ExecutionError, Params, QueryEngine, QueryResult, Record, Value};

pub use persistence::{FileBlockStore, FileRootPointer, MemoryRootPointer, RootPointer, Wal, WalEntry, WalError};

pub use transaction::{IsolationLevel, RecoveryReport, Transaction, TransactionError, TransactionManager};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
        assert_eq!(ver, "0.1.0");
    }
}
