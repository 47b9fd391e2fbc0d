use super::{IsolationLevel, TransactionError, TransactionResult, TxState};
use crate::graph::{
    AdjacencyEntry, Direction, Entity, EntityChange, EntityId, GraphDiff, GraphEngine, GraphError, GraphId,
    GraphRead, GraphResult, GraphSnapshot, Label, PropertyMap, PropertyPatch, RelType, Relationship,
    RelationshipChange, RelationshipId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Begin versions of the transactions that are still open, by id
pub(crate) type ActiveSet = Arc<Mutex<FxHashMap<u64, u64>>>;

/// An open transaction
///
/// Reads see the begin snapshot overlaid with the transaction's own writes.
/// Dropping an active transaction aborts it.
pub struct Transaction {
    id: u64,
    isolation: IsolationLevel,
    pub(crate) state: TxState,
    snapshot: GraphSnapshot,
    diff: GraphDiff,
    /// Ids observed by reads; only tracked for serializable transactions
    read_set: RefCell<FxHashSet<GraphId>>,
    engine: Arc<GraphEngine>,
    active: ActiveSet,
}

impl Transaction {
    pub(crate) fn new(
        id: u64,
        isolation: IsolationLevel,
        snapshot: GraphSnapshot,
        engine: Arc<GraphEngine>,
        active: ActiveSet,
    ) -> Self {
        Self {
            id,
            isolation,
            state: TxState::Active,
            snapshot,
            diff: GraphDiff::new(),
            read_set: RefCell::new(FxHashSet::default()),
            engine,
            active,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    /// The snapshot this transaction reads from
    pub fn snapshot(&self) -> &GraphSnapshot {
        &self.snapshot
    }

    pub fn base_version(&self) -> u64 {
        self.snapshot.version()
    }

    pub fn diff(&self) -> &GraphDiff {
        &self.diff
    }

    pub fn write_set(&self) -> Vec<GraphId> {
        self.diff.write_set()
    }

    pub fn read_set(&self) -> Vec<GraphId> {
        let mut ids: Vec<GraphId> = self.read_set.borrow().iter().copied().collect();
        ids.sort();
        ids
    }

    pub(crate) fn ensure_active(&self) -> TransactionResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(TransactionError::NotActive {
                tx_id: self.id,
                state: self.state,
            })
        }
    }

    /// Leave the active set; called once the transaction reaches a final state
    pub(crate) fn finish(&mut self, state: TxState) {
        self.state = state;
        self.active.lock().unwrap_or_else(|e| e.into_inner()).remove(&self.id);
    }

    /// Copy of the buffered writes, to undo a failed statement
    pub(crate) fn savepoint(&self) -> GraphDiff {
        self.diff.clone()
    }

    /// Discard every write made since `savepoint` was taken
    pub(crate) fn rollback_to(&mut self, savepoint: GraphDiff) {
        if self.is_active() {
            self.diff = savepoint;
        }
    }

    fn observe(&self, id: GraphId) {
        if self.isolation == IsolationLevel::Serializable {
            self.read_set.borrow_mut().insert(id);
        }
    }

    fn existing_entity(&self, id: EntityId) -> TransactionResult<Arc<Entity>> {
        Ok(self.entity(id)?.ok_or(GraphError::NotFound(GraphId::Entity(id)))?)
    }

    fn existing_relationship(&self, id: RelationshipId) -> TransactionResult<Arc<Relationship>> {
        Ok(self
            .relationship(id)?
            .ok_or(GraphError::NotFound(GraphId::Relationship(id)))?)
    }

    /// Create an entity; `Null` properties are dropped
    pub fn create_entity(&mut self, labels: Vec<Label>, properties: PropertyMap) -> TransactionResult<EntityId> {
        self.ensure_active()?;
        let id = self.engine.allocate_entity_id();
        let mut entity = Entity::new_with_properties(id, labels, PropertyMap::new());
        entity.apply_patch(&properties);
        self.diff.create_entity(entity);
        Ok(id)
    }

    /// Create a relationship; both endpoints must be visible to this transaction
    pub fn create_relationship(
        &mut self,
        rel_type: impl Into<RelType>,
        start: EntityId,
        end: EntityId,
        properties: PropertyMap,
    ) -> TransactionResult<RelationshipId> {
        self.ensure_active()?;
        for endpoint in [start, end] {
            if self.entity(endpoint)?.is_none() {
                return Err(GraphError::InvalidEndpoint(endpoint).into());
            }
        }
        let id = self.engine.allocate_relationship_id();
        let mut rel = Relationship::new(id, start, end, rel_type);
        rel.apply_patch(&properties);
        self.diff.create_relationship(rel);
        Ok(id)
    }

    /// Merge `patch` into the properties of an entity or relationship
    pub fn set_properties(&mut self, id: GraphId, patch: &PropertyPatch) -> TransactionResult<()> {
        self.ensure_active()?;
        match id {
            GraphId::Entity(id) => {
                let mut entity = (*self.existing_entity(id)?).clone();
                if entity.apply_patch(patch) {
                    self.diff.update_entity(entity);
                }
            }
            GraphId::Relationship(id) => {
                let mut rel = (*self.existing_relationship(id)?).clone();
                if rel.apply_patch(patch) {
                    self.diff.update_relationship(rel);
                }
            }
        }
        Ok(())
    }

    /// Replace all properties of an entity or relationship
    pub fn replace_properties(&mut self, id: GraphId, properties: PropertyMap) -> TransactionResult<()> {
        self.ensure_active()?;
        let mut cleaned = PropertyMap::new();
        crate::graph::property::apply_patch(&mut cleaned, &properties);
        match id {
            GraphId::Entity(id) => {
                let mut entity = (*self.existing_entity(id)?).clone();
                if entity.properties != cleaned {
                    entity.properties = cleaned;
                    self.diff.update_entity(entity);
                }
            }
            GraphId::Relationship(id) => {
                let mut rel = (*self.existing_relationship(id)?).clone();
                if rel.properties != cleaned {
                    rel.properties = cleaned;
                    self.diff.update_relationship(rel);
                }
            }
        }
        Ok(())
    }

    /// Add labels to an entity, returning true if any was new
    pub fn add_labels(&mut self, id: EntityId, labels: &[Label]) -> TransactionResult<bool> {
        self.ensure_active()?;
        let mut entity = (*self.existing_entity(id)?).clone();
        let mut changed = false;
        for label in labels {
            changed |= entity.add_label(label.clone());
        }
        if changed {
            self.diff.update_entity(entity);
        }
        Ok(changed)
    }

    /// Remove labels from an entity, returning true if any was present
    pub fn remove_labels(&mut self, id: EntityId, labels: &[Label]) -> TransactionResult<bool> {
        self.ensure_active()?;
        let mut entity = (*self.existing_entity(id)?).clone();
        let mut changed = false;
        for label in labels {
            changed |= entity.remove_label(label);
        }
        if changed {
            self.diff.update_entity(entity);
        }
        Ok(changed)
    }

    /// Delete an entity (with its relationships) or a relationship
    pub fn delete(&mut self, id: GraphId) -> TransactionResult<()> {
        match id {
            GraphId::Entity(id) => self.delete_entity(id, true),
            GraphId::Relationship(id) => self.delete_relationship(id),
        }
    }

    /// Delete an entity; without `detach` it must have no relationships
    pub fn delete_entity(&mut self, id: EntityId, detach: bool) -> TransactionResult<()> {
        self.ensure_active()?;
        self.existing_entity(id)?;
        let adjacency = self.adjacency(id)?;
        if !adjacency.is_empty() && !detach {
            return Err(GraphError::EntityHasRelationships(id).into());
        }
        let mut seen = FxHashSet::default();
        for entry in adjacency {
            if seen.insert(entry.relationship) {
                self.delete_relationship(entry.relationship)?;
            }
        }
        self.diff.delete_entity(id);
        Ok(())
    }

    pub fn delete_relationship(&mut self, id: RelationshipId) -> TransactionResult<()> {
        self.ensure_active()?;
        let rel = self.existing_relationship(id)?;
        self.diff.delete_relationship(rel);
        Ok(())
    }
}

impl GraphRead for Transaction {
    fn entity(&self, id: EntityId) -> GraphResult<Option<Arc<Entity>>> {
        self.observe(GraphId::Entity(id));
        match self.diff.entity_change(id) {
            Some(EntityChange::Created(e)) | Some(EntityChange::Updated(e)) => Ok(Some(e.clone())),
            Some(EntityChange::Deleted) => Ok(None),
            None => self.snapshot.entity(id),
        }
    }

    fn relationship(&self, id: RelationshipId) -> GraphResult<Option<Arc<Relationship>>> {
        self.observe(GraphId::Relationship(id));
        match self.diff.relationship_change(id) {
            Some(RelationshipChange::Created(r)) | Some(RelationshipChange::Updated(r)) => Ok(Some(r.clone())),
            Some(RelationshipChange::Deleted(_)) => Ok(None),
            None => self.snapshot.relationship(id),
        }
    }

    fn entity_ids(&self) -> GraphResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .snapshot
            .entity_ids()?
            .into_iter()
            .filter(|id| !matches!(self.diff.entity_change(*id), Some(EntityChange::Deleted)))
            .collect();
        ids.extend(self.diff.entities().filter_map(|(id, change)| match change {
            EntityChange::Created(_) => Some(*id),
            _ => None,
        }));
        ids.sort();
        ids.dedup();
        for id in &ids {
            self.observe(GraphId::Entity(*id));
        }
        Ok(ids)
    }

    fn entity_ids_with_label(&self, label: &Label) -> GraphResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = self
            .snapshot
            .entity_ids_with_label(label)?
            .into_iter()
            .filter(|id| self.diff.entity_change(*id).is_none())
            .collect();
        ids.extend(self.diff.entities().filter_map(|(id, change)| match change {
            EntityChange::Created(e) | EntityChange::Updated(e) if e.has_label(label) => Some(*id),
            _ => None,
        }));
        ids.sort();
        ids.dedup();
        for id in &ids {
            self.observe(GraphId::Entity(*id));
        }
        Ok(ids)
    }

    fn adjacency(&self, id: EntityId) -> GraphResult<Vec<AdjacencyEntry>> {
        self.observe(GraphId::Entity(id));
        if matches!(self.diff.entity_change(id), Some(EntityChange::Deleted)) {
            return Ok(Vec::new());
        }
        let mut entries: Vec<AdjacencyEntry> = self
            .snapshot
            .adjacency(id)?
            .into_iter()
            .filter(|e| !matches!(self.diff.relationship_change(e.relationship), Some(RelationshipChange::Deleted(_))))
            .collect();
        for rel in self.diff.created_relationships() {
            if rel.start == id {
                entries.push(AdjacencyEntry {
                    relationship: rel.id,
                    direction: Direction::Outgoing,
                    rel_type: rel.rel_type.clone(),
                    neighbor: rel.end,
                });
            }
            if rel.end == id {
                entries.push(AdjacencyEntry {
                    relationship: rel.id,
                    direction: Direction::Incoming,
                    rel_type: rel.rel_type.clone(),
                    neighbor: rel.start,
                });
            }
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .field("base_version", &self.snapshot.version())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            debug!("Transaction {} dropped while active, aborting", self.id);
            self.finish(TxState::Aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EngineOptions, MemoryBlockStore, PropertyValue};
    use crate::persistence::MemoryRootPointer;

    fn transaction(isolation: IsolationLevel) -> Transaction {
        let engine = Arc::new(
            GraphEngine::open(
                Arc::new(MemoryBlockStore::new()),
                Box::new(MemoryRootPointer::new()),
                EngineOptions::default(),
            )
            .unwrap(),
        );
        let snapshot = engine.snapshot(None).unwrap();
        Transaction::new(1, isolation, snapshot, engine, ActiveSet::default())
    }

    fn props(pairs: &[(&str, PropertyValue)]) -> PropertyMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_reads_see_own_writes() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let alice = tx
            .create_entity(vec![Label::new("Person")], props(&[("name", "Alice".into())]))
            .unwrap();
        let bob = tx.create_entity(vec![Label::new("Person")], PropertyMap::new()).unwrap();
        let knows = tx.create_relationship("KNOWS", alice, bob, PropertyMap::new()).unwrap();

        assert_eq!(tx.entity_ids().unwrap(), vec![alice, bob]);
        assert_eq!(tx.entity_ids_with_label(&Label::new("Person")).unwrap(), vec![alice, bob]);
        let adjacency = tx.adjacency(alice).unwrap();
        assert_eq!(adjacency.len(), 1);
        assert_eq!(adjacency[0].relationship, knows);
        // Nothing reached the snapshot
        assert!(tx.snapshot().entity_ids().unwrap().is_empty());
    }

    #[test]
    fn test_null_properties_are_dropped() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let id = tx
            .create_entity(vec![], props(&[("a", PropertyValue::Null), ("b", 1i64.into())]))
            .unwrap();
        let entity = tx.entity(id).unwrap().unwrap();
        assert!(entity.get_property("a").is_none());
        assert_eq!(entity.get_property("b"), Some(&PropertyValue::Integer(1)));
    }

    #[test]
    fn test_relationship_needs_endpoints() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let a = tx.create_entity(vec![], PropertyMap::new()).unwrap();
        let err = tx
            .create_relationship("R", a, EntityId::new(77), PropertyMap::new())
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::Graph(GraphError::InvalidEndpoint(id)) if id == EntityId::new(77)
        ));
    }

    #[test]
    fn test_delete_detaches_relationships() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let a = tx.create_entity(vec![], PropertyMap::new()).unwrap();
        let b = tx.create_entity(vec![], PropertyMap::new()).unwrap();
        tx.create_relationship("R", a, b, PropertyMap::new()).unwrap();

        assert!(matches!(
            tx.delete_entity(a, false),
            Err(TransactionError::Graph(GraphError::EntityHasRelationships(_)))
        ));
        tx.delete(GraphId::Entity(a)).unwrap();
        assert!(tx.entity(a).unwrap().is_none());
        assert!(tx.adjacency(b).unwrap().is_empty());
    }

    #[test]
    fn test_label_updates() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let id = tx.create_entity(vec![Label::new("A")], PropertyMap::new()).unwrap();
        assert!(tx.add_labels(id, &[Label::new("B")]).unwrap());
        assert!(!tx.add_labels(id, &[Label::new("B")]).unwrap());
        assert!(tx.remove_labels(id, &[Label::new("A")]).unwrap());
        assert!(tx.entity_ids_with_label(&Label::new("A")).unwrap().is_empty());
        assert_eq!(tx.entity_ids_with_label(&Label::new("B")).unwrap(), vec![id]);
    }

    #[test]
    fn test_read_set_only_for_serializable() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let id = tx.create_entity(vec![], PropertyMap::new()).unwrap();
        tx.entity(id).unwrap();
        assert!(tx.read_set().is_empty());

        let mut tx = transaction(IsolationLevel::Serializable);
        let id = tx.create_entity(vec![], PropertyMap::new()).unwrap();
        tx.entity(id).unwrap();
        assert_eq!(tx.read_set(), vec![GraphId::Entity(id)]);
    }

    #[test]
    fn test_missing_ids_are_not_found() {
        let mut tx = transaction(IsolationLevel::Snapshot);
        let err = tx
            .set_properties(GraphId::Entity(EntityId::new(5)), &PropertyPatch::new())
            .unwrap_err();
        assert!(matches!(err, TransactionError::Graph(GraphError::NotFound(_))));
    }
}
