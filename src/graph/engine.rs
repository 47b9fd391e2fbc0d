//! Graph engine: published root, id allocation and snapshot construction
//!
//! The engine owns the only mutable graph state in the process: the head
//! (the currently published root manifest) and the id allocator. Everything
//! else is an immutable block. A commit asks the engine to turn a
//! [`GraphDiff`] into new blocks on top of some base snapshot, then to swap
//! the head to the resulting manifest.

use super::block::{Block, BlockReader, BlockStore, ContentHash};
use super::diff::{EntityChange, GraphDiff, RelationshipChange};
use super::error::{GraphError, GraphResult};
use super::index::{self, AdjacencyEntry, AdjacencyIndex, EntityIndex, LabelIndex, RelationshipIndex};
use super::manifest::RootManifest;
use super::snapshot::GraphSnapshot;
use super::types::{Direction, EntityId, Label, RelationshipId};
use super::view::GraphRead;
use crate::persistence::root::RootPointer;
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Tunables for the engine
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Buckets per index node; only used when creating a new database
    pub index_fanout: usize,
    /// Decoded blocks kept in the LRU cache
    pub block_cache_capacity: usize,
    /// Cap for unbounded variable-length hops (`*`, `*2..`)
    pub max_variable_hops: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            index_fanout: 64,
            block_cache_capacity: 4096,
            max_variable_hops: 15,
        }
    }
}

/// The published root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub root: ContentHash,
    pub version: u64,
}

/// Owner of the published root and builder of new snapshots
pub struct GraphEngine {
    reader: BlockReader,
    head: RwLock<Head>,
    root_pointer: Box<dyn RootPointer>,
    next_entity_id: AtomicU64,
    next_relationship_id: AtomicU64,
    options: EngineOptions,
}

impl GraphEngine {
    /// Open the engine at the persisted root, creating the genesis graph if there is none
    pub fn open(
        store: Arc<dyn BlockStore>,
        root_pointer: Box<dyn RootPointer>,
        options: EngineOptions,
    ) -> GraphResult<Self> {
        let reader = BlockReader::new(store, options.block_cache_capacity);

        let root = match root_pointer.load()? {
            Some(root) => root,
            None => {
                let empty = index::empty_index(&reader, options.index_fanout)?;
                let genesis = reader.write(Block::Manifest(RootManifest::genesis(empty)))?;
                root_pointer.store(&genesis)?;
                info!("Initialized empty graph at root {}", genesis.short());
                genesis
            }
        };

        let snapshot = GraphSnapshot::open(reader.clone(), root)?;
        let manifest = snapshot.manifest();
        info!(
            "Opened graph at root {} (version {}, {} entities, {} relationships)",
            root.short(),
            manifest.version,
            manifest.entity_count,
            manifest.relationship_count
        );

        Ok(Self {
            next_entity_id: AtomicU64::new(manifest.next_entity_id),
            next_relationship_id: AtomicU64::new(manifest.next_relationship_id),
            head: RwLock::new(Head {
                root,
                version: manifest.version,
            }),
            reader,
            root_pointer,
            options,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn reader(&self) -> &BlockReader {
        &self.reader
    }

    /// The currently published root
    pub fn head(&self) -> Head {
        *self.head.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a snapshot at `root`, or at the published root when `None`
    pub fn snapshot(&self, root: Option<ContentHash>) -> GraphResult<GraphSnapshot> {
        let root = root.unwrap_or_else(|| self.head().root);
        GraphSnapshot::open(self.reader.clone(), root)
    }

    pub(crate) fn allocate_entity_id(&self) -> EntityId {
        EntityId::new(self.next_entity_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn allocate_relationship_id(&self) -> RelationshipId {
        RelationshipId::new(self.next_relationship_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Swap the head to `root` if the head is still at `expected_version`
    ///
    /// Returns false without touching anything when another commit won the race.
    pub(crate) fn compare_and_publish(&self, expected_version: u64, root: ContentHash) -> GraphResult<bool> {
        let snapshot = GraphSnapshot::open(self.reader.clone(), root)?;
        let mut head = self.head.write().unwrap_or_else(|e| e.into_inner());
        if head.root == root {
            return Ok(true);
        }
        if head.version != expected_version {
            return Ok(false);
        }
        self.root_pointer.store(&root)?;
        *head = Head {
            root,
            version: snapshot.version(),
        };
        self.observe(snapshot.manifest());
        debug!("Published root {} (version {})", root.short(), snapshot.version());
        Ok(true)
    }

    /// Unconditionally publish `root`; re-publishing the head is a no-op
    pub(crate) fn publish(&self, root: ContentHash) -> GraphResult<Head> {
        let snapshot = GraphSnapshot::open(self.reader.clone(), root)?;
        let mut head = self.head.write().unwrap_or_else(|e| e.into_inner());
        if head.root != root {
            self.root_pointer.store(&root)?;
            *head = Head {
                root,
                version: snapshot.version(),
            };
            self.observe(snapshot.manifest());
        }
        Ok(*head)
    }

    fn observe(&self, manifest: &RootManifest) {
        self.next_entity_id.fetch_max(manifest.next_entity_id, Ordering::Relaxed);
        self.next_relationship_id
            .fetch_max(manifest.next_relationship_id, Ordering::Relaxed);
    }

    /// Write the blocks for `base` + `diff` and return the candidate manifest hash
    ///
    /// Nothing is published. Fails with `DanglingRelationship` when the result
    /// would break endpoint existence or adjacency consistency, which happens
    /// when `base` moved under a concurrent commit.
    pub fn build_root(&self, base: &GraphSnapshot, diff: &GraphDiff) -> GraphResult<ContentHash> {
        let reader = &self.reader;
        let manifest = base.manifest();

        let mut entity_changes: BTreeMap<EntityId, Option<ContentHash>> = BTreeMap::new();
        let mut relationship_changes: BTreeMap<RelationshipId, Option<ContentHash>> = BTreeMap::new();
        let mut label_delta: BTreeMap<Label, (BTreeSet<EntityId>, BTreeSet<EntityId>)> = BTreeMap::new();
        let mut adjacency: BTreeMap<EntityId, AdjacencyDelta> = BTreeMap::new();
        let mut deleted_entities = Vec::new();
        let mut entity_count = manifest.entity_count as i64;
        let mut relationship_count = manifest.relationship_count as i64;
        let mut next_entity_id = manifest.next_entity_id;
        let mut next_relationship_id = manifest.next_relationship_id;

        for (id, change) in diff.entities() {
            let previous = base.entity(*id)?;
            let old_labels = previous.as_ref().map(|e| e.labels.clone()).unwrap_or_default();
            match change {
                EntityChange::Created(entity) | EntityChange::Updated(entity) => {
                    let hash = reader.write(Block::Entity((**entity).clone()))?;
                    entity_changes.insert(*id, Some(hash));
                    for label in old_labels.difference(&entity.labels) {
                        label_delta.entry(label.clone()).or_default().1.insert(*id);
                    }
                    for label in entity.labels.difference(&old_labels) {
                        label_delta.entry(label.clone()).or_default().0.insert(*id);
                    }
                    if previous.is_none() {
                        entity_count += 1;
                    }
                    next_entity_id = next_entity_id.max(id.as_u64() + 1);
                }
                EntityChange::Deleted => {
                    if previous.is_some() {
                        entity_changes.insert(*id, None);
                        for label in &old_labels {
                            label_delta.entry(label.clone()).or_default().1.insert(*id);
                        }
                        adjacency.entry(*id).or_default().drop_all = true;
                        deleted_entities.push(*id);
                        entity_count -= 1;
                    }
                }
            }
        }

        for (id, change) in diff.relationships() {
            let existed = base.relationship(*id)?.is_some();
            match change {
                RelationshipChange::Created(rel) | RelationshipChange::Updated(rel) => {
                    let hash = reader.write(Block::Relationship((**rel).clone()))?;
                    relationship_changes.insert(*id, Some(hash));
                    if !existed {
                        for entity in [rel.start, rel.end] {
                            let alive = match entity_changes.get(&entity) {
                                Some(change) => change.is_some(),
                                None => base.entity(entity)?.is_some(),
                            };
                            if !alive {
                                return Err(GraphError::DanglingRelationship {
                                    relationship: *id,
                                    entity,
                                });
                            }
                        }
                        adjacency.entry(rel.start).or_default().added.push(AdjacencyEntry {
                            relationship: *id,
                            direction: Direction::Outgoing,
                            rel_type: rel.rel_type.clone(),
                            neighbor: rel.end,
                        });
                        adjacency.entry(rel.end).or_default().added.push(AdjacencyEntry {
                            relationship: *id,
                            direction: Direction::Incoming,
                            rel_type: rel.rel_type.clone(),
                            neighbor: rel.start,
                        });
                        relationship_count += 1;
                    }
                    next_relationship_id = next_relationship_id.max(id.as_u64() + 1);
                }
                RelationshipChange::Deleted(rel) => {
                    if existed {
                        relationship_changes.insert(*id, None);
                        adjacency.entry(rel.start).or_default().removed.insert(*id);
                        adjacency.entry(rel.end).or_default().removed.insert(*id);
                        relationship_count -= 1;
                    }
                }
            }
        }

        // A deleted entity may only lose relationships this diff also deletes
        for id in &deleted_entities {
            let removed = adjacency.get(id).map(|d| &d.removed);
            for entry in base.adjacency(*id)? {
                if !removed.is_some_and(|r| r.contains(&entry.relationship)) {
                    return Err(GraphError::DanglingRelationship {
                        relationship: entry.relationship,
                        entity: *id,
                    });
                }
            }
        }

        let mut adjacency_changes: BTreeMap<EntityId, Option<Vec<AdjacencyEntry>>> = BTreeMap::new();
        for (id, delta) in adjacency {
            if delta.drop_all {
                adjacency_changes.insert(id, None);
                continue;
            }
            let mut list: Vec<AdjacencyEntry> = base
                .adjacency(id)?
                .into_iter()
                .filter(|e| !delta.removed.contains(&e.relationship))
                .collect();
            list.extend(delta.added);
            adjacency_changes.insert(id, if list.is_empty() { None } else { Some(list) });
        }

        let mut label_changes: BTreeMap<Label, Option<Vec<EntityId>>> = BTreeMap::new();
        for (label, (added, removed)) in label_delta {
            let mut ids: BTreeSet<EntityId> = base.entity_ids_with_label(&label)?.into_iter().collect();
            ids.retain(|id| !removed.contains(id));
            ids.extend(added);
            let ids: Vec<EntityId> = ids.into_iter().collect();
            label_changes.insert(label, if ids.is_empty() { None } else { Some(ids) });
        }

        let new_manifest = RootManifest {
            version: manifest.version + 1,
            timestamp: chrono::Utc::now().timestamp_millis(),
            parent: Some(base.root_hash()),
            entity_index: index::update::<EntityIndex>(reader, &manifest.entity_index, entity_changes)?,
            relationship_index: index::update::<RelationshipIndex>(
                reader,
                &manifest.relationship_index,
                relationship_changes,
            )?,
            adjacency_index: index::update::<AdjacencyIndex>(reader, &manifest.adjacency_index, adjacency_changes)?,
            label_index: index::update::<LabelIndex>(reader, &manifest.label_index, label_changes)?,
            next_entity_id,
            next_relationship_id,
            entity_count: entity_count.max(0) as u64,
            relationship_count: relationship_count.max(0) as u64,
        };
        let root = reader.write(Block::Manifest(new_manifest))?;
        debug!(
            "Built candidate root {} on base {} (version {})",
            root.short(),
            base.root_hash().short(),
            manifest.version + 1
        );
        Ok(root)
    }
}

#[derive(Default)]
struct AdjacencyDelta {
    added: Vec<AdjacencyEntry>,
    removed: FxHashSet<RelationshipId>,
    drop_all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::block::MemoryBlockStore;
    use crate::graph::entity::Entity;
    use crate::graph::relationship::Relationship;
    use crate::persistence::root::MemoryRootPointer;

    fn engine() -> GraphEngine {
        GraphEngine::open(
            Arc::new(MemoryBlockStore::new()),
            Box::new(MemoryRootPointer::new()),
            EngineOptions::default(),
        )
        .unwrap()
    }

    fn person(engine: &GraphEngine, name: &str) -> Entity {
        let mut e = Entity::new(engine.allocate_entity_id(), "Person");
        e.set_property("name", name);
        e
    }

    #[test]
    fn test_genesis_snapshot_is_empty() {
        let engine = engine();
        let snapshot = engine.snapshot(None).unwrap();
        assert_eq!(snapshot.version(), 0);
        assert!(snapshot.entity_ids().unwrap().is_empty());
    }

    #[test]
    fn test_build_and_publish() {
        let engine = engine();
        let base = engine.snapshot(None).unwrap();

        let alice = person(&engine, "Alice");
        let bob = person(&engine, "Bob");
        let knows = Relationship::new(engine.allocate_relationship_id(), alice.id, bob.id, "KNOWS");
        let (a, b, r) = (alice.id, bob.id, knows.id);

        let mut diff = GraphDiff::new();
        diff.create_entity(alice);
        diff.create_entity(bob);
        diff.create_relationship(knows);

        let root = engine.build_root(&base, &diff).unwrap();
        // Not visible until published
        assert_eq!(engine.head().version, 0);
        assert!(engine.compare_and_publish(0, root).unwrap());

        let snapshot = engine.snapshot(None).unwrap();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.entity_count(), 2);
        assert_eq!(snapshot.relationship_count(), 1);
        assert_eq!(snapshot.entity_ids_with_label(&Label::new("Person")).unwrap(), vec![a, b]);

        let out = snapshot.adjacency(a).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].relationship, r);
        assert_eq!(out[0].direction, Direction::Outgoing);
        assert_eq!(snapshot.adjacency(b).unwrap()[0].direction, Direction::Incoming);

        // The old snapshot still sees the empty graph
        assert!(base.entity(a).unwrap().is_none());
        assert_eq!(snapshot.parent().unwrap().unwrap().root_hash(), base.root_hash());
    }

    #[test]
    fn test_stale_publish_is_rejected() {
        let engine = engine();
        let base = engine.snapshot(None).unwrap();

        let mut d1 = GraphDiff::new();
        d1.create_entity(person(&engine, "A"));
        let r1 = engine.build_root(&base, &d1).unwrap();

        let mut d2 = GraphDiff::new();
        d2.create_entity(person(&engine, "B"));
        let r2 = engine.build_root(&base, &d2).unwrap();

        assert!(engine.compare_and_publish(0, r1).unwrap());
        assert!(!engine.compare_and_publish(0, r2).unwrap());
        // Re-publishing the head is a no-op success
        assert!(engine.compare_and_publish(0, r1).unwrap());
        assert_eq!(engine.head().root, r1);
    }

    #[test]
    fn test_dangling_endpoint_rejected() {
        let engine = engine();
        let base = engine.snapshot(None).unwrap();
        let alice = person(&engine, "Alice");
        let ghost = engine.allocate_entity_id();

        let mut diff = GraphDiff::new();
        let rel = Relationship::new(engine.allocate_relationship_id(), alice.id, ghost, "KNOWS");
        diff.create_entity(alice);
        diff.create_relationship(rel);

        let err = engine.build_root(&base, &diff).unwrap_err();
        assert!(matches!(err, GraphError::DanglingRelationship { entity, .. } if entity == ghost));
    }

    #[test]
    fn test_delete_entity_with_live_relationship_rejected() {
        let engine = engine();
        let base = engine.snapshot(None).unwrap();
        let alice = person(&engine, "Alice");
        let bob = person(&engine, "Bob");
        let (a, b) = (alice.id, bob.id);

        let mut diff = GraphDiff::new();
        diff.create_entity(alice);
        diff.create_entity(bob);
        diff.create_relationship(Relationship::new(engine.allocate_relationship_id(), a, b, "KNOWS"));
        let root = engine.build_root(&base, &diff).unwrap();
        engine.publish(root).unwrap();

        let head = engine.snapshot(None).unwrap();
        let mut delete = GraphDiff::new();
        delete.delete_entity(b);
        assert!(matches!(
            engine.build_root(&head, &delete),
            Err(GraphError::DanglingRelationship { entity, .. }) if entity == b
        ));
    }

    #[test]
    fn test_label_change_moves_index_entry() {
        let engine = engine();
        let base = engine.snapshot(None).unwrap();
        let alice = person(&engine, "Alice");
        let id = alice.id;
        let mut diff = GraphDiff::new();
        diff.create_entity(alice);
        engine.publish(engine.build_root(&base, &diff).unwrap()).unwrap();

        let head = engine.snapshot(None).unwrap();
        let mut relabeled = (*head.get_entity(id).unwrap()).clone();
        relabeled.remove_label(&Label::new("Person"));
        relabeled.add_label("Robot");
        let mut diff = GraphDiff::new();
        diff.update_entity(relabeled);
        engine.publish(engine.build_root(&head, &diff).unwrap()).unwrap();

        let snapshot = engine.snapshot(None).unwrap();
        assert!(snapshot.entity_ids_with_label(&Label::new("Person")).unwrap().is_empty());
        assert_eq!(snapshot.entity_ids_with_label(&Label::new("Robot")).unwrap(), vec![id]);
        assert_eq!(snapshot.entity_count(), 1);
    }

    #[test]
    fn test_reopen_resumes_allocator() {
        let store: Arc<dyn BlockStore> = Arc::new(MemoryBlockStore::new());
        let pointer = MemoryRootPointer::new();
        let engine = GraphEngine::open(store.clone(), Box::new(pointer.clone()), EngineOptions::default()).unwrap();
        let base = engine.snapshot(None).unwrap();
        let alice = person(&engine, "Alice");
        let mut diff = GraphDiff::new();
        diff.create_entity(alice);
        engine.publish(engine.build_root(&base, &diff).unwrap()).unwrap();
        let head = engine.head();
        drop(engine);

        let reopened = GraphEngine::open(store, Box::new(pointer), EngineOptions::default()).unwrap();
        assert_eq!(reopened.head(), head);
        assert_eq!(reopened.allocate_entity_id(), EntityId::new(2));
    }
}
