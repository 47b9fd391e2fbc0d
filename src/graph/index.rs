//! Paged indexes stored as blocks
//!
//! Each index is a two-level structure: an [`IndexNode`] holding one optional
//! page hash per bucket, and [`IndexPage`] blocks holding the sorted entries
//! of a bucket. A commit only rewrites the pages whose buckets it touched plus
//! a new node, so unchanged pages are shared between snapshots.

use super::block::{Block, BlockReader, ContentHash};
use super::error::{GraphError, GraphResult};
use super::types::{Direction, EntityId, Label, RelType, RelationshipId};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use tracing::trace;

/// Root of a paged index: bucket number → page hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexNode {
    pub buckets: Vec<Option<ContentHash>>,
}

/// One bucket's entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexPage {
    Entities(BTreeMap<EntityId, ContentHash>),
    Relationships(BTreeMap<RelationshipId, ContentHash>),
    Adjacency(BTreeMap<EntityId, Vec<AdjacencyEntry>>),
    Labels(BTreeMap<Label, Vec<EntityId>>),
}

/// One relationship as seen from one of its endpoints
///
/// The type and the neighbour are denormalized here so that typed expansion
/// does not need to load relationship blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjacencyEntry {
    pub relationship: RelationshipId,
    /// `Outgoing` when the owning entity is the start, `Incoming` when it is the end
    pub direction: Direction,
    pub rel_type: RelType,
    pub neighbor: EntityId,
}

impl AdjacencyEntry {
    /// Whether this entry is visible when expanding in `direction`
    pub fn matches(&self, direction: Direction) -> bool {
        direction == Direction::Both || self.direction == direction
    }
}

/// Binds a key/value type to its page variant and bucketing rule
pub trait IndexKind {
    type Key: Ord + Clone;
    type Value: Clone;

    const NAME: &'static str;

    fn bucket(key: &Self::Key, fanout: usize) -> usize;
    fn wrap(entries: BTreeMap<Self::Key, Self::Value>) -> IndexPage;
    fn unwrap(page: &IndexPage) -> Option<&BTreeMap<Self::Key, Self::Value>>;
}

/// entity id → entity block
pub struct EntityIndex;
/// relationship id → relationship block
pub struct RelationshipIndex;
/// entity id → adjacency list in insertion order
pub struct AdjacencyIndex;
/// label → sorted entity ids
pub struct LabelIndex;

impl IndexKind for EntityIndex {
    type Key = EntityId;
    type Value = ContentHash;
    const NAME: &'static str = "entity index";

    fn bucket(key: &EntityId, fanout: usize) -> usize {
        (key.as_u64() % fanout as u64) as usize
    }

    fn wrap(entries: BTreeMap<EntityId, ContentHash>) -> IndexPage {
        IndexPage::Entities(entries)
    }

    fn unwrap(page: &IndexPage) -> Option<&BTreeMap<EntityId, ContentHash>> {
        match page {
            IndexPage::Entities(entries) => Some(entries),
            _ => None,
        }
    }
}

impl IndexKind for RelationshipIndex {
    type Key = RelationshipId;
    type Value = ContentHash;
    const NAME: &'static str = "relationship index";

    fn bucket(key: &RelationshipId, fanout: usize) -> usize {
        (key.as_u64() % fanout as u64) as usize
    }

    fn wrap(entries: BTreeMap<RelationshipId, ContentHash>) -> IndexPage {
        IndexPage::Relationships(entries)
    }

    fn unwrap(page: &IndexPage) -> Option<&BTreeMap<RelationshipId, ContentHash>> {
        match page {
            IndexPage::Relationships(entries) => Some(entries),
            _ => None,
        }
    }
}

impl IndexKind for AdjacencyIndex {
    type Key = EntityId;
    type Value = Vec<AdjacencyEntry>;
    const NAME: &'static str = "adjacency index";

    fn bucket(key: &EntityId, fanout: usize) -> usize {
        (key.as_u64() % fanout as u64) as usize
    }

    fn wrap(entries: BTreeMap<EntityId, Vec<AdjacencyEntry>>) -> IndexPage {
        IndexPage::Adjacency(entries)
    }

    fn unwrap(page: &IndexPage) -> Option<&BTreeMap<EntityId, Vec<AdjacencyEntry>>> {
        match page {
            IndexPage::Adjacency(entries) => Some(entries),
            _ => None,
        }
    }
}

impl IndexKind for LabelIndex {
    type Key = Label;
    type Value = Vec<EntityId>;
    const NAME: &'static str = "label index";

    fn bucket(key: &Label, fanout: usize) -> usize {
        // FxHasher is unseeded, so bucket placement is stable across processes
        let mut hasher = FxHasher::default();
        key.as_str().hash(&mut hasher);
        (hasher.finish() % fanout as u64) as usize
    }

    fn wrap(entries: BTreeMap<Label, Vec<EntityId>>) -> IndexPage {
        IndexPage::Labels(entries)
    }

    fn unwrap(page: &IndexPage) -> Option<&BTreeMap<Label, Vec<EntityId>>> {
        match page {
            IndexPage::Labels(entries) => Some(entries),
            _ => None,
        }
    }
}

/// Write an index with `fanout` empty buckets
pub fn empty_index(reader: &BlockReader, fanout: usize) -> GraphResult<ContentHash> {
    let node = IndexNode {
        buckets: vec![None; fanout.max(1)],
    };
    Ok(reader.write(Block::IndexNode(node))?)
}

fn read_node(reader: &BlockReader, root: &ContentHash) -> GraphResult<IndexNode> {
    match reader.read(root)?.as_ref() {
        Block::IndexNode(node) => Ok(node.clone()),
        _ => Err(GraphError::UnexpectedBlock {
            hash: *root,
            expected: "index node",
        }),
    }
}

fn page_entries<K: IndexKind>(block: &Block, hash: &ContentHash) -> GraphResult<BTreeMap<K::Key, K::Value>> {
    match block {
        Block::IndexPage(page) => K::unwrap(page).cloned().ok_or(GraphError::UnexpectedBlock {
            hash: *hash,
            expected: K::NAME,
        }),
        _ => Err(GraphError::UnexpectedBlock {
            hash: *hash,
            expected: K::NAME,
        }),
    }
}

/// Point lookup
pub fn lookup<K: IndexKind>(reader: &BlockReader, root: &ContentHash, key: &K::Key) -> GraphResult<Option<K::Value>> {
    let node = read_node(reader, root)?;
    let bucket = K::bucket(key, node.buckets.len());
    let Some(page_hash) = node.buckets[bucket] else {
        return Ok(None);
    };
    let block = reader.read(&page_hash)?;
    match block.as_ref() {
        Block::IndexPage(page) => match K::unwrap(page) {
            Some(entries) => Ok(entries.get(key).cloned()),
            None => Err(GraphError::UnexpectedBlock {
                hash: page_hash,
                expected: K::NAME,
            }),
        },
        _ => Err(GraphError::UnexpectedBlock {
            hash: page_hash,
            expected: K::NAME,
        }),
    }
}

/// All entries, bucket by bucket; pages are fetched in one batch
pub fn scan<K: IndexKind>(reader: &BlockReader, root: &ContentHash) -> GraphResult<Vec<(K::Key, K::Value)>> {
    let node = read_node(reader, root)?;
    let page_hashes: Vec<ContentHash> = node.buckets.iter().flatten().copied().collect();
    let blocks = reader.read_many(&page_hashes)?;

    let mut out = Vec::new();
    for (block, hash) in blocks.iter().zip(page_hashes.iter()) {
        out.extend(page_entries::<K>(block, hash)?);
    }
    Ok(out)
}

/// Apply changes (`None` removes the key) and return the new index root
///
/// Only the buckets named by `changes` are rewritten.
pub fn update<K: IndexKind>(
    reader: &BlockReader,
    root: &ContentHash,
    changes: BTreeMap<K::Key, Option<K::Value>>,
) -> GraphResult<ContentHash> {
    if changes.is_empty() {
        return Ok(*root);
    }

    let mut node = read_node(reader, root)?;
    let fanout = node.buckets.len();

    let mut by_bucket: BTreeMap<usize, Vec<(K::Key, Option<K::Value>)>> = BTreeMap::new();
    for (key, value) in changes {
        by_bucket.entry(K::bucket(&key, fanout)).or_default().push((key, value));
    }

    for (bucket, bucket_changes) in by_bucket {
        let mut entries = match node.buckets[bucket] {
            Some(hash) => page_entries::<K>(reader.read(&hash)?.as_ref(), &hash)?,
            None => BTreeMap::new(),
        };
        for (key, value) in bucket_changes {
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        node.buckets[bucket] = if entries.is_empty() {
            None
        } else {
            Some(reader.write(Block::IndexPage(K::wrap(entries)))?)
        };
        trace!("Rewrote {} bucket {}", K::NAME, bucket);
    }

    Ok(reader.write(Block::IndexNode(node))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::block::MemoryBlockStore;
    use std::sync::Arc;

    fn reader() -> BlockReader {
        BlockReader::new(Arc::new(MemoryBlockStore::new()), 128)
    }

    #[test]
    fn test_update_and_lookup() {
        let reader = reader();
        let root = empty_index(&reader, 4).unwrap();
        let h = ContentHash::of(b"entity-1");

        let mut changes = BTreeMap::new();
        changes.insert(EntityId::new(1), Some(h));
        let root2 = update::<EntityIndex>(&reader, &root, changes).unwrap();

        assert_eq!(lookup::<EntityIndex>(&reader, &root2, &EntityId::new(1)).unwrap(), Some(h));
        assert_eq!(lookup::<EntityIndex>(&reader, &root2, &EntityId::new(2)).unwrap(), None);
        // The old root is untouched
        assert_eq!(lookup::<EntityIndex>(&reader, &root, &EntityId::new(1)).unwrap(), None);
    }

    #[test]
    fn test_remove_returns_to_empty_root() {
        let reader = reader();
        let root = empty_index(&reader, 8).unwrap();

        let mut add = BTreeMap::new();
        add.insert(EntityId::new(3), Some(ContentHash::of(b"x")));
        let root2 = update::<EntityIndex>(&reader, &root, add).unwrap();

        let mut remove = BTreeMap::new();
        remove.insert(EntityId::new(3), None);
        let root3 = update::<EntityIndex>(&reader, &root2, remove).unwrap();

        // Same content, same address
        assert_eq!(root3, root);
    }

    #[test]
    fn test_scan_across_buckets() {
        let reader = reader();
        let root = empty_index(&reader, 4).unwrap();
        let mut changes = BTreeMap::new();
        for i in 0..10 {
            changes.insert(Label::new(format!("L{}", i)), Some(vec![EntityId::new(i)]));
        }
        let root = update::<LabelIndex>(&reader, &root, changes).unwrap();

        let mut entries = scan::<LabelIndex>(&reader, &root).unwrap();
        entries.sort();
        assert_eq!(entries.len(), 10);
        assert_eq!(entries[0].0, Label::new("L0"));
    }

    #[test]
    fn test_wrong_page_kind_is_reported() {
        let reader = reader();
        let root = empty_index(&reader, 1).unwrap();
        let mut changes = BTreeMap::new();
        changes.insert(EntityId::new(1), Some(ContentHash::of(b"a")));
        let root = update::<EntityIndex>(&reader, &root, changes).unwrap();

        let err = lookup::<AdjacencyIndex>(&reader, &root, &EntityId::new(1)).unwrap_err();
        assert!(matches!(err, GraphError::UnexpectedBlock { .. }));
    }
}
