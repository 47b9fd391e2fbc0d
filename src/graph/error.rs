//! Errors raised by the graph layer

use super::block::{ContentHash, StorageError};
use super::types::{EntityId, GraphId, RelationshipId};
use thiserror::Error;

/// Graph operation errors
#[derive(Error, Debug)]
pub enum GraphError {
    /// Explicit lookup of an id absent from the snapshot
    #[error("{0} not found")]
    NotFound(GraphId),

    /// Block store failure, propagated unchanged
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A block decoded to a different kind than the index promised
    #[error("Block {hash} is not a {expected} block")]
    UnexpectedBlock {
        hash: ContentHash,
        expected: &'static str,
    },

    /// A new relationship names an endpoint that does not exist
    #[error("Relationship endpoint {0} does not exist")]
    InvalidEndpoint(EntityId),

    /// A relationship would point at an entity missing from the new snapshot
    #[error("Relationship {relationship} references missing entity {entity}")]
    DanglingRelationship {
        relationship: RelationshipId,
        entity: EntityId,
    },

    /// Non-detaching delete of an entity that still has relationships
    #[error("Entity {0} still has relationships")]
    EntityHasRelationships(EntityId),

    /// Cooperative cancellation observed between traversal steps
    #[error("Operation cancelled")]
    Cancelled,
}

pub type GraphResult<T> = Result<T, GraphError>;

impl From<crate::cancel::Cancelled> for GraphError {
    fn from(_: crate::cancel::Cancelled) -> Self {
        GraphError::Cancelled
    }
}
