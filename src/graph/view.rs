//! Read access shared by snapshots and open transactions

use super::entity::Entity;
use super::error::GraphResult;
use super::index::AdjacencyEntry;
use super::relationship::Relationship;
use super::types::{EntityId, Label, RelationshipId};
use std::sync::Arc;

/// Read-only view of one consistent graph state
///
/// Lookups return `Ok(None)` for absent ids; callers that reference an id
/// explicitly turn that into `GraphError::NotFound`.
pub trait GraphRead {
    fn entity(&self, id: EntityId) -> GraphResult<Option<Arc<Entity>>>;

    fn relationship(&self, id: RelationshipId) -> GraphResult<Option<Arc<Relationship>>>;

    /// All entity ids, ascending
    fn entity_ids(&self) -> GraphResult<Vec<EntityId>>;

    /// Ids of entities carrying `label`, ascending
    fn entity_ids_with_label(&self, label: &Label) -> GraphResult<Vec<EntityId>>;

    /// Adjacency list of an entity in insertion order (empty if it has none)
    fn adjacency(&self, id: EntityId) -> GraphResult<Vec<AdjacencyEntry>>;

    /// Batch relationship lookup, positionally aligned with `ids`
    fn relationships(&self, ids: &[RelationshipId]) -> GraphResult<Vec<Option<Arc<Relationship>>>> {
        ids.iter().map(|id| self.relationship(*id)).collect()
    }
}
