//! Core type definitions for the graph database

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier newtype; ids are allocated once and never reused
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn new(id: u64) -> Self {
                $name(id)
            }

            pub fn as_u64(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }
    };
}

numeric_id!(
    /// Unique identifier for an entity
    EntityId
);
numeric_id!(
    /// Unique identifier for a relationship
    RelationshipId
);

/// Either kind of graph element.
///
/// Write-sets, read-sets and NotFound errors are expressed in terms of `GraphId`
/// so entities and relationships can share one conflict check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum GraphId {
    Entity(EntityId),
    Relationship(RelationshipId),
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphId::Entity(id) => write!(f, "{}", id),
            GraphId::Relationship(id) => write!(f, "{}", id),
        }
    }
}

impl From<EntityId> for GraphId {
    fn from(id: EntityId) -> Self {
        GraphId::Entity(id)
    }
}

impl From<RelationshipId> for GraphId {
    fn from(id: RelationshipId) -> Self {
        GraphId::Relationship(id)
    }
}

/// String newtype used for labels and relationship types
macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                $name(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }
    };
}

name_type!(
    /// Entity label (e.g., "Person", "Employee")
    Label
);
name_type!(
    /// Relationship type (e.g., "KNOWS", "WORKS_AT")
    RelType
);

/// Direction of a relationship relative to the entity it is viewed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

impl Direction {
    /// Direction seen from the other end of the relationship
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id() {
        let id = EntityId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(format!("{}", id), "EntityId(42)");

        let id2: EntityId = 100.into();
        assert_eq!(id2.as_u64(), 100);
    }

    #[test]
    fn test_relationship_id() {
        let id = RelationshipId::new(99);
        assert_eq!(id.as_u64(), 99);
        assert_eq!(format!("{}", id), "RelationshipId(99)");
    }

    #[test]
    fn test_graph_id_ordering() {
        let a: GraphId = EntityId::new(5).into();
        let b: GraphId = RelationshipId::new(1).into();
        assert!(a < b);
        assert_eq!(format!("{}", a), "EntityId(5)");
    }

    #[test]
    fn test_label() {
        let label = Label::new("Person");
        assert_eq!(label.as_str(), "Person");
        assert_eq!(format!("{}", label), "Person");

        let label2: Label = "Employee".into();
        assert_eq!(label2.as_str(), "Employee");
    }

    #[test]
    fn test_rel_type() {
        let rel_type = RelType::new("KNOWS");
        assert_eq!(rel_type.as_str(), "KNOWS");
        assert_eq!(format!("{}", rel_type), "KNOWS");
    }

    #[test]
    fn test_direction_reverse() {
        assert_eq!(Direction::Outgoing.reverse(), Direction::Incoming);
        assert_eq!(Direction::Both.reverse(), Direction::Both);
    }
}
