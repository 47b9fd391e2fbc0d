//! Root manifest: the single block that defines one complete graph version

use super::block::ContentHash;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Versioned pointer to the four index roots of one snapshot
///
/// Publishing a new manifest hash is what makes a commit visible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootManifest {
    /// Monotonic commit counter; the empty genesis graph is version 0
    pub version: u64,
    /// Commit time in Unix milliseconds
    pub timestamp: i64,
    /// Manifest this one superseded
    pub parent: Option<ContentHash>,
    pub entity_index: ContentHash,
    pub relationship_index: ContentHash,
    pub adjacency_index: ContentHash,
    pub label_index: ContentHash,
    /// Id high-water marks, used to seed the allocator after a restart
    pub next_entity_id: u64,
    pub next_relationship_id: u64,
    pub entity_count: u64,
    pub relationship_count: u64,
}

impl RootManifest {
    /// The empty graph. Its timestamp is fixed so every store agrees on the genesis hash.
    pub fn genesis(empty_index: ContentHash) -> Self {
        Self {
            version: 0,
            timestamp: 0,
            parent: None,
            entity_index: empty_index,
            relationship_index: empty_index,
            adjacency_index: empty_index,
            label_index: empty_index,
            next_entity_id: 1,
            next_relationship_id: 1,
            entity_count: 0,
            relationship_count: 0,
        }
    }

    /// Commit time as a chrono timestamp
    pub fn committed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}
