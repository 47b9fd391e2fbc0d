//! Relationship implementation for the property graph

use super::property::{apply_patch, PropertyMap, PropertyPatch, PropertyValue};
use super::types::{EntityId, RelType, RelationshipId};
use serde::{Deserialize, Serialize};

/// A directed relationship in the property graph
///
/// Relationships have:
/// - A unique ID
/// - A start entity and an end entity (directed)
/// - A relationship type
/// - Properties (key-value pairs)
///
/// Any number of relationships of the same type may connect the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Unique identifier for this relationship
    pub id: RelationshipId,

    /// Start entity (relationship goes FROM this entity)
    pub start: EntityId,

    /// End entity (relationship goes TO this entity)
    pub end: EntityId,

    /// Type of relationship (e.g., "KNOWS", "WORKS_AT")
    pub rel_type: RelType,

    /// Properties associated with this relationship
    pub properties: PropertyMap,
}

impl Relationship {
    /// Create a new directed relationship
    pub fn new(id: RelationshipId, start: EntityId, end: EntityId, rel_type: impl Into<RelType>) -> Self {
        Relationship {
            id,
            start,
            end,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
        }
    }

    /// Create a new relationship with properties
    pub fn new_with_properties(
        id: RelationshipId,
        start: EntityId,
        end: EntityId,
        rel_type: impl Into<RelType>,
        properties: PropertyMap,
    ) -> Self {
        Relationship {
            id,
            start,
            end,
            rel_type: rel_type.into(),
            properties,
        }
    }

    /// Check if this relationship connects two entities (in either direction)
    pub fn connects(&self, a: EntityId, b: EntityId) -> bool {
        (self.start == a && self.end == b) || (self.start == b && self.end == a)
    }

    /// The endpoint opposite to `from`; `None` if `from` is not an endpoint
    pub fn other_end(&self, from: EntityId) -> Option<EntityId> {
        if self.start == from {
            Some(self.end)
        } else if self.end == from {
            Some(self.start)
        } else {
            None
        }
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
    fn test_create_relationship() {
        let rel = Relationship::new(RelationshipId::new(1), EntityId::new(10), EntityId::new(20), "KNOWS");
        assert_eq!(rel.start, EntityId::new(10));
        assert_eq!(rel.end, EntityId::new(20));
        assert_eq!(rel.rel_type.as_str(), "KNOWS");
    }

    #[test]
    fn test_connects_and_other_end() {
        let rel = Relationship::new(RelationshipId::new(1), EntityId::new(1), EntityId::new(2), "KNOWS");
        assert!(rel.connects(EntityId::new(2), EntityId::new(1)));
        assert_eq!(rel.other_end(EntityId::new(1)), Some(EntityId::new(2)));
        assert_eq!(rel.other_end(EntityId::new(2)), Some(EntityId::new(1)));
        assert_eq!(rel.other_end(EntityId::new(3)), None);
    }

    #[test]
    fn test_self_loop_other_end() {
        let rel = Relationship::new(RelationshipId::new(1), EntityId::new(7), EntityId::new(7), "SELF");
        assert_eq!(rel.other_end(EntityId::new(7)), Some(EntityId::new(7)));
    }
}
