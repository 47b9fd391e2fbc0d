//! Immutable graph snapshots
//!
//! A snapshot is nothing more than a root manifest hash plus a block reader.
//! Every lookup walks the paged indexes reachable from that manifest, so a
//! snapshot stays valid and consistent for as long as its blocks exist, no
//! matter how many commits happen afterwards.

use super::block::{Block, BlockReader, ContentHash};
use super::entity::Entity;
use super::error::{GraphError, GraphResult};
use super::index::{self, AdjacencyEntry, AdjacencyIndex, EntityIndex, LabelIndex, RelationshipIndex};
use super::manifest::RootManifest;
use super::relationship::Relationship;
use super::types::{EntityId, GraphId, Label, RelationshipId};
use super::view::GraphRead;
use std::sync::Arc;

/// Immutable view of the graph at one root hash
#[derive(Clone)]
pub struct GraphSnapshot {
    root: ContentHash,
    manifest: Arc<RootManifest>,
    reader: BlockReader,
}

impl GraphSnapshot {
    /// Open the snapshot whose manifest is stored under `root`
    pub fn open(reader: BlockReader, root: ContentHash) -> GraphResult<Self> {
        let manifest = match reader.read(&root)?.as_ref() {
            Block::Manifest(manifest) => Arc::new(manifest.clone()),
            _ => {
                return Err(GraphError::UnexpectedBlock {
                    hash: root,
                    expected: "manifest",
                })
            }
        };
        Ok(Self { root, manifest, reader })
    }

    pub fn root_hash(&self) -> ContentHash {
        self.root
    }

    pub fn version(&self) -> u64 {
        self.manifest.version
    }

    pub fn manifest(&self) -> &RootManifest {
        &self.manifest
    }

    pub fn entity_count(&self) -> u64 {
        self.manifest.entity_count
    }

    pub fn relationship_count(&self) -> u64 {
        self.manifest.relationship_count
    }

    /// The snapshot this one superseded, if any
    pub fn parent(&self) -> GraphResult<Option<GraphSnapshot>> {
        match self.manifest.parent {
            Some(parent) => Ok(Some(GraphSnapshot::open(self.reader.clone(), parent)?)),
            None => Ok(None),
        }
    }

    /// Explicit lookup; an absent id is `NotFound`
    pub fn get_entity(&self, id: EntityId) -> GraphResult<Arc<Entity>> {
        self.entity(id)?.ok_or(GraphError::NotFound(GraphId::Entity(id)))
    }

    /// Explicit lookup; an absent id is `NotFound`
    pub fn get_relationship(&self, id: RelationshipId) -> GraphResult<Arc<Relationship>> {
        self.relationship(id)?
            .ok_or(GraphError::NotFound(GraphId::Relationship(id)))
    }

    pub(crate) fn reader(&self) -> &BlockReader {
        &self.reader
    }
}

impl std::fmt::Debug for GraphSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphSnapshot")
            .field("root", &self.root)
            .field("version", &self.manifest.version)
            .finish()
    }
}

impl GraphRead for GraphSnapshot {
    fn entity(&self, id: EntityId) -> GraphResult<Option<Arc<Entity>>> {
        let Some(hash) = index::lookup::<EntityIndex>(&self.reader, &self.manifest.entity_index, &id)? else {
            return Ok(None);
        };
        match self.reader.read(&hash)?.as_ref() {
            Block::Entity(entity) => Ok(Some(Arc::new(entity.clone()))),
            _ => Err(GraphError::UnexpectedBlock {
                hash,
                expected: "entity",
            }),
        }
    }

    fn relationship(&self, id: RelationshipId) -> GraphResult<Option<Arc<Relationship>>> {
        let Some(hash) =
            index::lookup::<RelationshipIndex>(&self.reader, &self.manifest.relationship_index, &id)?
        else {
            return Ok(None);
        };
        match self.reader.read(&hash)?.as_ref() {
            Block::Relationship(rel) => Ok(Some(Arc::new(rel.clone()))),
            _ => Err(GraphError::UnexpectedBlock {
                hash,
                expected: "relationship",
            }),
        }
    }

    fn entity_ids(&self) -> GraphResult<Vec<EntityId>> {
        let mut ids: Vec<EntityId> = index::scan::<EntityIndex>(&self.reader, &self.manifest.entity_index)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn entity_ids_with_label(&self, label: &Label) -> GraphResult<Vec<EntityId>> {
        Ok(index::lookup::<LabelIndex>(&self.reader, &self.manifest.label_index, label)?.unwrap_or_default())
    }

    fn adjacency(&self, id: EntityId) -> GraphResult<Vec<AdjacencyEntry>> {
        Ok(index::lookup::<AdjacencyIndex>(&self.reader, &self.manifest.adjacency_index, &id)?.unwrap_or_default())
    }

    fn relationships(&self, ids: &[RelationshipId]) -> GraphResult<Vec<Option<Arc<Relationship>>>> {
        let mut hashes = Vec::with_capacity(ids.len());
        for id in ids {
            hashes.push(index::lookup::<RelationshipIndex>(
                &self.reader,
                &self.manifest.relationship_index,
                id,
            )?);
        }
        // Fetch every present block in one batch
        let present: Vec<ContentHash> = hashes.iter().flatten().copied().collect();
        let mut blocks = self.reader.read_many(&present)?.into_iter().zip(present);

        let mut out = Vec::with_capacity(ids.len());
        for hash in &hashes {
            if hash.is_none() {
                out.push(None);
                continue;
            }
            match blocks.next() {
                Some((block, hash)) => match block.as_ref() {
                    Block::Relationship(rel) => out.push(Some(Arc::new(rel.clone()))),
                    _ => {
                        return Err(GraphError::UnexpectedBlock {
                            hash,
                            expected: "relationship",
                        })
                    }
                },
                None => out.push(None),
            }
        }
        Ok(out)
    }
}
