//! Entity implementation for the property graph
//!
//! An entity is an immutable value once it has been written to a block.
//! Updates produce a modified copy that is written as a new block.

use super::property::{apply_patch, PropertyMap, PropertyPatch, PropertyValue};
use super::types::{EntityId, Label};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An entity (vertex) in the property graph
///
/// Entities have:
/// - A stable opaque ID
/// - Any number of labels
/// - Properties (key-value pairs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier for this entity
    pub id: EntityId,

    /// Set of labels, kept ordered so the block encoding is deterministic
    pub labels: BTreeSet<Label>,

    /// Properties associated with this entity
    pub properties: PropertyMap,
}

impl Entity {
    /// Create a new entity with a single label
    pub fn new(id: EntityId, label: impl Into<Label>) -> Self {
        let mut labels = BTreeSet::new();
        labels.insert(label.into());

        Entity {
            id,
            labels,
            properties: PropertyMap::new(),
        }
    }

    /// Create a new entity with labels and properties
    pub fn new_with_properties(id: EntityId, labels: Vec<Label>, properties: PropertyMap) -> Self {
        Entity {
            id,
            labels: labels.into_iter().collect(),
            properties,
        }
    }

    /// Add a label, returning true if it was not present
    pub fn add_label(&mut self, label: impl Into<Label>) -> bool {
        self.labels.insert(label.into())
    }

    /// Remove a label, returning true if it was present
    pub fn remove_label(&mut self, label: &Label) -> bool {
        self.labels.remove(label)
    }

    /// Check if entity has a specific label
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }

    /// Set a property value
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
        self.properties.insert(key.into(), value.into())
    }

    /// Get a property value
    pub fn get_property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Apply a property patch (`Null` values remove keys)
    pub fn apply_patch(&mut self, patch: &PropertyPatch) -> bool {
        apply_patch(&mut self.properties, patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_entity_single_label() {
        let entity = Entity::new(EntityId::new(1), "Person");
        assert_eq!(entity.id, EntityId::new(1));
        assert!(entity.has_label(&Label::new("Person")));
        assert!(entity.properties.is_empty());
    }

    #[test]
    fn test_labels_are_ordered() {
        let entity = Entity::new_with_properties(
            EntityId::new(1),
            vec![Label::new("Zeta"), Label::new("Alpha"), Label::new("Zeta")],
            PropertyMap::new(),
        );
        let labels: Vec<&str> = entity.labels.iter().map(|l| l.as_str()).collect();
        assert_eq!(labels, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn test_entity_properties() {
        let mut entity = Entity::new(EntityId::new(1), "Person");
        entity.set_property("name", "Alice");
        entity.set_property("age", 30i64);

        assert_eq!(entity.get_property("name").unwrap().as_string(), Some("Alice"));

        let mut patch = PropertyPatch::new();
        patch.insert("age".to_string(), PropertyValue::Null);
        assert!(entity.apply_patch(&patch));
        assert!(entity.get_property("age").is_none());
    }

    #[test]
    fn test_add_remove_label() {
        let mut entity = Entity::new(EntityId::new(1), "Person");
        assert!(entity.add_label("Employee"));
        assert!(!entity.add_label("Employee"));
        assert!(entity.remove_label(&Label::new("Person")));
        assert!(!entity.has_label(&Label::new("Person")));
    }
}
