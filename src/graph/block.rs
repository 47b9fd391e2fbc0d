//! Content-addressed block storage
//!
//! Every piece of graph state (entities, relationships, index pages and root
//! manifests) is serialized with bincode and stored as an immutable block
//! addressed by the SHA-256 of its bytes. Identical content always lands at
//! the same address, so the store deduplicates for free.

use super::entity::Entity;
use super::index::{IndexNode, IndexPage};
use super::manifest::RootManifest;
use super::relationship::Relationship;
use bytes::Bytes;
use lru::LruCache;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::trace;

/// Below this many misses `get_many` fetches sequentially
const PARALLEL_FETCH_THRESHOLD: usize = 16;

/// Block storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// No block with this address
    #[error("Block not found: {0}")]
    NotFound(ContentHash),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Stored bytes do not match their address, or a pointer is malformed
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// RocksDB error
    #[cfg(feature = "rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// SHA-256 address of a block
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash raw block bytes
    pub fn of(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        ContentHash(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse the 64-character lowercase or uppercase hex form
    pub fn from_hex(s: &str) -> StorageResult<Self> {
        let s = s.trim();
        if s.len() != 64 || !s.is_ascii() {
            return Err(StorageError::Corrupt(format!("invalid content hash '{}'", s)));
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| StorageError::Corrupt(format!("invalid content hash '{}'", s)))?;
        }
        Ok(ContentHash(out))
    }

    /// First 12 hex digits, for log lines
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Immutable, content-addressed block storage
///
/// `put` must be idempotent: storing the same bytes twice returns the same
/// hash and keeps a single copy.
pub trait BlockStore: Send + Sync {
    /// Store bytes, returning their content hash
    fn put(&self, bytes: Bytes) -> StorageResult<ContentHash>;

    /// Fetch the bytes stored under `hash`
    fn get(&self, hash: &ContentHash) -> StorageResult<Bytes>;

    fn contains(&self, hash: &ContentHash) -> StorageResult<bool>;

    /// Fetch many blocks at once, preserving order
    ///
    /// Backends with real latency should override this with a native batch call.
    fn get_many(&self, hashes: &[ContentHash]) -> StorageResult<Vec<Bytes>> {
        if hashes.len() < PARALLEL_FETCH_THRESHOLD {
            hashes.iter().map(|h| self.get(h)).collect()
        } else {
            hashes.par_iter().map(|h| self.get(h)).collect()
        }
    }
}

/// In-memory block store
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<ContentHash, Bytes>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blocks stored
    pub fn len(&self) -> usize {
        self.blocks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, bytes: Bytes) -> StorageResult<ContentHash> {
        let hash = ContentHash::of(&bytes);
        let mut blocks = self.blocks.write().unwrap_or_else(|e| e.into_inner());
        blocks.entry(hash).or_insert(bytes);
        Ok(hash)
    }

    fn get(&self, hash: &ContentHash) -> StorageResult<Bytes> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        blocks.get(hash).cloned().ok_or(StorageError::NotFound(*hash))
    }

    fn contains(&self, hash: &ContentHash) -> StorageResult<bool> {
        let blocks = self.blocks.read().unwrap_or_else(|e| e.into_inner());
        Ok(blocks.contains_key(hash))
    }
}

/// Every kind of block the graph layer writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Block {
    Entity(Entity),
    Relationship(Relationship),
    IndexNode(IndexNode),
    IndexPage(IndexPage),
    Manifest(RootManifest),
}

impl Block {
    pub fn encode(&self) -> StorageResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(bytes: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Block::Entity(_) => "entity",
            Block::Relationship(_) => "relationship",
            Block::IndexNode(_) => "index node",
            Block::IndexPage(_) => "index page",
            Block::Manifest(_) => "manifest",
        }
    }
}

/// Block store front end that decodes blocks and caches them (LRU)
///
/// Blocks are immutable, so cached entries never need invalidation.
#[derive(Clone)]
pub struct BlockReader {
    store: Arc<dyn BlockStore>,
    cache: Arc<Mutex<LruCache<ContentHash, Arc<Block>>>>,
}

impl BlockReader {
    pub fn new(store: Arc<dyn BlockStore>, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Read and decode one block
    pub fn read(&self, hash: &ContentHash) -> StorageResult<Arc<Block>> {
        if let Some(block) = self.cached(hash) {
            return Ok(block);
        }
        let bytes = self.store.get(hash)?;
        let block = Arc::new(Block::decode(&bytes)?);
        trace!("Loaded {} block {}", block.kind(), hash.short());
        self.remember(*hash, block.clone());
        Ok(block)
    }

    /// Read many blocks; cache misses go to the store in one batch
    pub fn read_many(&self, hashes: &[ContentHash]) -> StorageResult<Vec<Arc<Block>>> {
        let mut out: Vec<Option<Arc<Block>>> = hashes.iter().map(|h| self.cached(h)).collect();
        let missing: Vec<ContentHash> = hashes
            .iter()
            .zip(out.iter())
            .filter(|(_, b)| b.is_none())
            .map(|(h, _)| *h)
            .collect();

        if !missing.is_empty() {
            let fetched = self.store.get_many(&missing)?;
            let mut decoded = Vec::with_capacity(fetched.len());
            for (hash, bytes) in missing.iter().zip(fetched.iter()) {
                let block = Arc::new(Block::decode(bytes)?);
                self.remember(*hash, block.clone());
                decoded.push(block);
            }
            let mut decoded = decoded.into_iter();
            for slot in out.iter_mut().filter(|b| b.is_none()) {
                *slot = decoded.next();
            }
        }

        out.into_iter()
            .zip(hashes.iter())
            .map(|(block, hash)| block.ok_or(StorageError::NotFound(*hash)))
            .collect()
    }

    /// Encode and store a block, returning its address
    pub fn write(&self, block: Block) -> StorageResult<ContentHash> {
        let bytes = block.encode()?;
        let hash = self.store.put(bytes)?;
        self.remember(hash, Arc::new(block));
        Ok(hash)
    }

    fn cached(&self, hash: &ContentHash) -> Option<Arc<Block>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).get(hash).cloned()
    }

    fn remember(&self, hash: ContentHash, block: Arc<Block>) {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).put(hash, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::types::EntityId;

    #[test]
    fn test_put_get_roundtrip() {
        let store = MemoryBlockStore::new();
        let hash = store.put(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(store.get(&hash).unwrap(), Bytes::from_static(b"hello"));
        assert!(store.contains(&hash).unwrap());
    }

    #[test]
    fn test_put_deduplicates() {
        let store = MemoryBlockStore::new();
        let a = store.put(Bytes::from_static(b"same")).unwrap();
        let b = store.put(Bytes::from_static(b"same")).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_block() {
        let store = MemoryBlockStore::new();
        let hash = ContentHash::of(b"nothing");
        assert!(matches!(store.get(&hash), Err(StorageError::NotFound(h)) if h == hash));
    }

    #[test]
    fn test_hex_roundtrip() {
        let hash = ContentHash::of(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ContentHash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert!(ContentHash::from_hex("zz").is_err());
    }

    #[test]
    fn test_identical_entities_share_an_address() {
        let reader = BlockReader::new(Arc::new(MemoryBlockStore::new()), 16);
        let mut a = Entity::new(EntityId::new(1), "Person");
        a.set_property("name", "Alice");
        a.set_property("age", 30i64);
        let mut b = Entity::new(EntityId::new(1), "Person");
        b.set_property("age", 30i64);
        b.set_property("name", "Alice");

        let ha = reader.write(Block::Entity(a)).unwrap();
        let hb = reader.write(Block::Entity(b)).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn test_read_many_mixes_cache_and_store() {
        let store = Arc::new(MemoryBlockStore::new());
        let writer = BlockReader::new(store.clone(), 64);
        let hashes: Vec<ContentHash> = (0..40)
            .map(|i| writer.write(Block::Entity(Entity::new(EntityId::new(i), "N"))).unwrap())
            .collect();

        // Fresh reader: first read warms a few, read_many fetches the rest
        let reader = BlockReader::new(store, 64);
        reader.read(&hashes[3]).unwrap();
        let blocks = reader.read_many(&hashes).unwrap();
        assert_eq!(blocks.len(), 40);
        for (i, block) in blocks.iter().enumerate() {
            match block.as_ref() {
                Block::Entity(e) => assert_eq!(e.id, EntityId::new(i as u64)),
                other => panic!("unexpected block {}", other.kind()),
            }
        }
    }
}
