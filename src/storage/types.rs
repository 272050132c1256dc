use crate::chord::types::{Endpoint, NodeId};
use crate::network::messages::{ChunkId, FileId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A chunk this node holds on behalf of some owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub size: u64,
    /// Replicas still wanted when this copy was accepted, this one included.
    pub desired: u32,
    /// Backup endpoint of the owner, for STORED and REMOVED notifications.
    pub owner_reply: Endpoint,
}

impl StoredChunk {
    /// Perceived minus desired replication from this node's point of view.
    /// A storer only ever perceives its own copy.
    pub fn slack(&self) -> i64 {
        1 - i64::from(self.desired)
    }
}

/// A file this node backed up, with the peers that confirmed each chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedFile {
    pub path: String,
    pub file_id: FileId,
    /// Modification time the file id was derived from.
    pub modified_millis: i64,
    pub desired: u32,
    pub storers: Vec<BTreeSet<NodeId>>,
}

impl OwnedFile {
    pub fn new(path: String, file_id: FileId, modified_millis: i64, chunk_count: u32, desired: u32) -> Self {
        Self {
            path,
            file_id,
            modified_millis,
            desired,
            storers: vec![BTreeSet::new(); chunk_count as usize],
        }
    }

    pub fn chunk_count(&self) -> u32 {
        self.storers.len() as u32
    }

    pub fn chunk(&self, index: u32) -> ChunkId {
        ChunkId::new(self.file_id.clone(), index)
    }

    /// Every peer that confirmed at least one chunk.
    pub fn all_storers(&self) -> BTreeSet<NodeId> {
        self.storers.iter().flatten().copied().collect()
    }
}

/// Everything the store persists besides chunk bodies.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub capacity: u64,
    pub stored: BTreeMap<ChunkId, StoredChunk>,
    pub owned: BTreeMap<FileId, OwnedFile>,
    pub pending_deletes: BTreeMap<NodeId, Vec<FileId>>,
}

impl StoreState {
    pub fn with_capacity(capacity: u64) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    pub fn usage(&self) -> u64 {
        self.stored.values().map(|c| c.size).sum()
    }
}
