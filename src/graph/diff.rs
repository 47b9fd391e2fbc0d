//! Buffered changes of an open transaction
//!
//! A `GraphDiff` records the new value of every entity and relationship a
//! transaction touched. Nothing in it is visible to other readers until the
//! engine turns it into blocks and the transaction manager publishes the
//! resulting root.

use super::entity::Entity;
use super::relationship::Relationship;
use super::types::{EntityId, GraphId, RelationshipId};
use indexmap::IndexMap;
use std::sync::Arc;

/// Pending change to one entity
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Created(Arc<Entity>),
    Updated(Arc<Entity>),
    Deleted,
}

/// Pending change to one relationship
#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipChange {
    Created(Arc<Relationship>),
    Updated(Arc<Relationship>),
    /// Keeps the old value so its adjacency entries can be removed
    Deleted(Arc<Relationship>),
}

/// Changes buffered by one transaction, in the order they were made
#[derive(Debug, Clone, Default)]
pub struct GraphDiff {
    entities: IndexMap<EntityId, EntityChange>,
    relationships: IndexMap<RelationshipId, RelationshipChange>,
}

impl GraphDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }

    pub fn entity_change(&self, id: EntityId) -> Option<&EntityChange> {
        self.entities.get(&id)
    }

    pub fn relationship_change(&self, id: RelationshipId) -> Option<&RelationshipChange> {
        self.relationships.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = (&EntityId, &EntityChange)> {
        self.entities.iter()
    }

    pub fn relationships(&self) -> impl Iterator<Item = (&RelationshipId, &RelationshipChange)> {
        self.relationships.iter()
    }

    pub fn create_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id, EntityChange::Created(Arc::new(entity)));
    }

    /// Record a new value; an entity created in this diff stays `Created`
    pub fn update_entity(&mut self, entity: Entity) {
        let id = entity.id;
        let change = match self.entities.get(&id) {
            Some(EntityChange::Created(_)) => EntityChange::Created(Arc::new(entity)),
            _ => EntityChange::Updated(Arc::new(entity)),
        };
        self.entities.insert(id, change);
    }

    /// Record a deletion; deleting something created in this diff just forgets it
    pub fn delete_entity(&mut self, id: EntityId) {
        match self.entities.get(&id) {
            Some(EntityChange::Created(_)) => {
                self.entities.shift_remove(&id);
            }
            _ => {
                self.entities.insert(id, EntityChange::Deleted);
            }
        }
    }

    pub fn create_relationship(&mut self, rel: Relationship) {
        self.relationships
            .insert(rel.id, RelationshipChange::Created(Arc::new(rel)));
    }

    pub fn update_relationship(&mut self, rel: Relationship) {
        let id = rel.id;
        let change = match self.relationships.get(&id) {
            Some(RelationshipChange::Created(_)) => RelationshipChange::Created(Arc::new(rel)),
            _ => RelationshipChange::Updated(Arc::new(rel)),
        };
        self.relationships.insert(id, change);
    }

    /// `previous` is the value visible before the deletion
    pub fn delete_relationship(&mut self, previous: Arc<Relationship>) {
        let id = previous.id;
        match self.relationships.get(&id) {
            Some(RelationshipChange::Created(_)) => {
                self.relationships.shift_remove(&id);
            }
            _ => {
                self.relationships.insert(id, RelationshipChange::Deleted(previous));
            }
        }
    }

    /// Relationships created in this diff and still alive, in creation order
    pub fn created_relationships(&self) -> impl Iterator<Item = &Arc<Relationship>> {
        self.relationships.values().filter_map(|change| match change {
            RelationshipChange::Created(rel) => Some(rel),
            _ => None,
        })
    }

    /// Every id this diff touches, sorted
    pub fn write_set(&self) -> Vec<GraphId> {
        let mut ids: Vec<GraphId> = self
            .entities
            .keys()
            .map(|id| GraphId::Entity(*id))
            .chain(self.relationships.keys().map(|id| GraphId::Relationship(*id)))
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_after_create_stays_created() {
        let mut diff = GraphDiff::new();
        diff.create_entity(Entity::new(EntityId::new(1), "Person"));

        let mut updated = Entity::new(EntityId::new(1), "Person");
        updated.set_property("name", "Alice");
        diff.update_entity(updated);

        assert!(matches!(
            diff.entity_change(EntityId::new(1)),
            Some(EntityChange::Created(e)) if e.get_property("name").is_some()
        ));
    }

    #[test]
    fn test_delete_after_create_forgets() {
        let mut diff = GraphDiff::new();
        diff.create_entity(Entity::new(EntityId::new(1), "Person"));
        diff.delete_entity(EntityId::new(1));
        assert!(diff.is_empty());

        diff.delete_entity(EntityId::new(2));
        assert_eq!(diff.entity_change(EntityId::new(2)), Some(&EntityChange::Deleted));
    }

    #[test]
    fn test_write_set_is_sorted() {
        let mut diff = GraphDiff::new();
        diff.create_entity(Entity::new(EntityId::new(9), "A"));
        diff.create_relationship(Relationship::new(
            RelationshipId::new(1),
            EntityId::new(9),
            EntityId::new(3),
            "R",
        ));
        diff.delete_entity(EntityId::new(3));

        assert_eq!(
            diff.write_set(),
            vec![
                GraphId::Entity(EntityId::new(3)),
                GraphId::Entity(EntityId::new(9)),
                GraphId::Relationship(RelationshipId::new(1)),
            ]
        );
    }
}
