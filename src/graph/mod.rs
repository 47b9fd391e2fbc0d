//! Content-addressed property graph
//!
//! This module implements the storage-level graph model:
//! - Entities with multiple labels and properties
//! - Typed, directed relationships with properties (parallel edges allowed)
//! - Immutable blocks addressed by SHA-256 in a pluggable [`BlockStore`]
//! - Paged indexes (entity, relationship, adjacency, label) rooted in a [`RootManifest`]
//! - Snapshots, buffered diffs and traversal over both

pub mod block;
pub mod diff;
pub mod engine;
pub mod entity;
pub mod error;
pub mod index;
pub mod manifest;
pub mod property;
pub mod relationship;
pub mod snapshot;
pub mod traversal;
pub mod types;
pub mod view;

// Re-export main types
pub use block::{Block, BlockReader, BlockStore, ContentHash, MemoryBlockStore, StorageError, StorageResult};
pub use diff::{EntityChange, GraphDiff, RelationshipChange};
pub use engine::{EngineOptions, GraphEngine, Head};
pub use entity::Entity;
pub use error::{GraphError, GraphResult};
pub use index::AdjacencyEntry;
pub use manifest::RootManifest;
pub use property::{PropertyMap, PropertyPatch, PropertyValue};
pub use relationship::Relationship;
pub use snapshot::GraphSnapshot;
pub use traversal::{HopRange, Path, PatternMatch, PatternStep, StepBinding, Traversal};
pub use types::{Direction, EntityId, GraphId, Label, RelType, RelationshipId};
pub use view::GraphRead;
