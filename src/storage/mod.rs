pub mod persist;
pub mod types;

use crate::chord::types::{Endpoint, NodeId};
use crate::error::StorageError;
use crate::network::messages::{ChunkId, FileId};
use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use persist::StateFile;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
pub use types::{OwnedFile, StoreState, StoredChunk};

const STATE_FILE: &str = "state.json";
const CHUNK_DIR: &str = "chunks";

/// Chunk bodies plus replication bookkeeping for one peer.
///
/// With a root directory, bodies live under `chunks/<fileId>/<index>` and the
/// metadata in `state.json`. Bodies are written before a chunk is reported as
/// stored; metadata changes are coalesced and written shortly after (see
/// [`StateFile`]). Without a root everything stays in memory.
///
/// The state lock is never held across file I/O.
pub struct ChunkStore {
    root: Option<PathBuf>,
    bodies: DashMap<ChunkId, Bytes>,
    state: Arc<Mutex<StoreState>>,
    file: Option<Arc<StateFile>>,
}

impl ChunkStore {
    pub fn in_memory(capacity: u64) -> Self {
        Self {
            root: None,
            bodies: DashMap::new(),
            state: Arc::new(Mutex::new(StoreState::with_capacity(capacity))),
            file: None,
        }
    }

    /// Opens (or initializes) a store rooted at `dir`. A persisted state keeps
    /// its own capacity; `capacity` only seeds a fresh store.
    pub fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self, StorageError> {
        let root = dir.into();
        fs::create_dir_all(root.join(CHUNK_DIR))?;
        let state_path = root.join(STATE_FILE);
        let state = if state_path.exists() {
            let state: StoreState = serde_json::from_slice(&fs::read(&state_path)?)?;
            info!(
                "Loaded store at {}: {} chunk(s), {} owned file(s), {}/{} bytes used",
                root.display(),
                state.stored.len(),
                state.owned.len(),
                state.usage(),
                state.capacity
            );
            state
        } else {
            info!("Initialized store at {} with capacity {} bytes", root.display(), capacity);
            StoreState::with_capacity(capacity)
        };

        let state = Arc::new(Mutex::new(state));
        let file = StateFile::new(state_path);
        file.start(&state);
        Ok(Self {
            root: Some(root),
            bodies: DashMap::new(),
            state,
            file: Some(file),
        })
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedules a metadata write. Call after the state lock is released.
    fn changed(&self) {
        if let Some(file) = &self.file {
            file.mark_dirty(&self.state);
        }
    }

    /// Writes pending metadata changes now.
    pub fn flush(&self) -> Result<(), StorageError> {
        match &self.file {
            Some(file) => file.write_if_dirty(&self.state),
            None => Ok(()),
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.file.as_ref().is_some_and(|file| file.is_dirty())
    }

    fn chunk_path(root: &Path, chunk: &ChunkId) -> PathBuf {
        root.join(CHUNK_DIR)
            .join(chunk.file_id.as_str())
            .join(chunk.index.to_string())
    }

    /// Accepts a chunk if it is new here and fits. On error nothing is kept.
    pub fn store_chunk(
        &self,
        chunk: &ChunkId,
        data: &Bytes,
        desired: u32,
        owner_reply: Endpoint,
    ) -> Result<(), StorageError> {
        let needed = data.len() as u64;
        // reserve the space first so concurrent offers see it taken
        {
            let mut state = self.lock();
            if state.stored.contains_key(chunk) {
                return Err(StorageError::AlreadyStored(chunk.to_string()));
            }
            let available = state.capacity.saturating_sub(state.usage());
            if needed > available {
                return Err(StorageError::CapacityExceeded { needed, available });
            }
            state.stored.insert(
                chunk.clone(),
                StoredChunk {
                    size: needed,
                    desired,
                    owner_reply,
                },
            );
        }

        if let Err(e) = self.write_body(chunk, data) {
            self.lock().stored.remove(chunk);
            return Err(e);
        }
        self.changed();
        debug!("Stored chunk {:?}#{} ({} bytes)", chunk.file_id, chunk.index, needed);
        Ok(())
    }

    fn write_body(&self, chunk: &ChunkId, data: &Bytes) -> Result<(), StorageError> {
        match &self.root {
            Some(root) => {
                let path = Self::chunk_path(root, chunk);
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                fs::write(path, data)?;
            }
            None => {
                self.bodies.insert(chunk.clone(), data.clone());
            }
        }
        Ok(())
    }

    pub fn get_chunk(&self, chunk: &ChunkId) -> Result<Bytes, StorageError> {
        if !self.is_chunk_stored(chunk) {
            return Err(StorageError::ChunkNotFound(chunk.to_string()));
        }
        match &self.root {
            Some(root) => Ok(Bytes::from(fs::read(Self::chunk_path(root, chunk))?)),
            None => self
                .bodies
                .get(chunk)
                .map(|body| body.clone())
                .ok_or_else(|| StorageError::ChunkNotFound(chunk.to_string())),
        }
    }

    /// Forgets a chunk. Fails only when the chunk is not stored here; a body
    /// that cannot be deleted is logged and left behind.
    pub fn remove_chunk(&self, chunk: &ChunkId) -> Result<StoredChunk, StorageError> {
        let removed = self
            .lock()
            .stored
            .remove(chunk)
            .ok_or_else(|| StorageError::ChunkNotFound(chunk.to_string()))?;
        self.drop_body(chunk);
        self.changed();
        Ok(removed)
    }

    /// Removes every chunk of `file_id` held here; returns the removed ids.
    pub fn remove_file_chunks(&self, file_id: &FileId) -> Vec<ChunkId> {
        let doomed: Vec<ChunkId> = {
            let mut state = self.lock();
            let doomed: Vec<ChunkId> = state
                .stored
                .keys()
                .filter(|c| &c.file_id == file_id)
                .cloned()
                .collect();
            for chunk in &doomed {
                state.stored.remove(chunk);
            }
            doomed
        };
        for chunk in &doomed {
            self.drop_body(chunk);
        }
        if let Some(root) = &self.root {
            let _ = fs::remove_dir(root.join(CHUNK_DIR).join(file_id.as_str()));
        }
        if !doomed.is_empty() {
            self.changed();
        }
        doomed
    }

    fn drop_body(&self, chunk: &ChunkId) {
        match &self.root {
            Some(root) => {
                if let Err(e) = fs::remove_file(Self::chunk_path(root, chunk)) {
                    warn!("Failed to remove body of chunk {}: {}", chunk, e);
                }
            }
            None => {
                self.bodies.remove(chunk);
            }
        }
    }

    pub fn is_chunk_stored(&self, chunk: &ChunkId) -> bool {
        self.lock().stored.contains_key(chunk)
    }

    pub fn stored_chunk(&self, chunk: &ChunkId) -> Option<StoredChunk> {
        self.lock().stored.get(chunk).cloned()
    }

    pub fn stored_chunks(&self) -> Vec<ChunkId> {
        self.lock().stored.keys().cloned().collect()
    }

    pub fn record_owned_file(&self, file: OwnedFile) {
        self.lock().owned.insert(file.file_id.clone(), file);
        self.changed();
    }

    pub fn owns_file(&self, file_id: &FileId) -> bool {
        self.lock().owned.contains_key(file_id)
    }

    pub fn owned_file(&self, file_id: &FileId) -> Option<OwnedFile> {
        self.lock().owned.get(file_id).cloned()
    }

    /// Backup of the newest version of `path`, if any.
    pub fn owned_file_by_path(&self, path: &str) -> Option<OwnedFile> {
        self.lock()
            .owned
            .values()
            .filter(|f| f.path == path)
            .max_by_key(|f| f.modified_millis)
            .cloned()
    }

    pub fn owned_files(&self) -> Vec<OwnedFile> {
        self.lock().owned.values().cloned().collect()
    }

    pub fn drop_owned_file(&self, file_id: &FileId) -> Option<OwnedFile> {
        let dropped = self.lock().owned.remove(file_id);
        if dropped.is_some() {
            self.changed();
        }
        dropped
    }

    /// Returns false when the storer had already confirmed (or the chunk is unknown).
    pub fn add_confirmed_storer(&self, chunk: &ChunkId, storer: NodeId) -> bool {
        self.update_storers(chunk, |set| set.insert(storer))
    }

    pub fn remove_confirmed_storer(&self, chunk: &ChunkId, storer: NodeId) -> bool {
        self.update_storers(chunk, |set| set.remove(&storer))
    }

    fn update_storers(&self, chunk: &ChunkId, f: impl FnOnce(&mut BTreeSet<NodeId>) -> bool) -> bool {
        let changed = {
            let mut state = self.lock();
            let Some(set) = state
                .owned
                .get_mut(&chunk.file_id)
                .and_then(|file| file.storers.get_mut(chunk.index as usize))
            else {
                return false;
            };
            f(set)
        };
        if changed {
            self.changed();
        }
        changed
    }

    pub fn confirmed_storers(&self, chunk: &ChunkId) -> BTreeSet<NodeId> {
        self.lock()
            .owned
            .get(&chunk.file_id)
            .and_then(|file| file.storers.get(chunk.index as usize))
            .cloned()
            .unwrap_or_default()
    }

    pub fn desired_replication(&self, file_id: &FileId) -> Option<u32> {
        self.lock().owned.get(file_id).map(|f| f.desired)
    }

    pub fn capacity(&self) -> u64 {
        self.lock().capacity
    }

    pub fn usage(&self) -> u64 {
        self.lock().usage()
    }

    pub fn set_capacity(&self, capacity: u64) {
        self.lock().capacity = capacity;
        self.changed();
    }

    pub fn over_capacity(&self) -> bool {
        let state = self.lock();
        state.usage() > state.capacity
    }

    /// Stored chunk with the largest slack; ties go to the smallest chunk id.
    pub fn eviction_candidate(&self) -> Option<ChunkId> {
        let state = self.lock();
        let mut best: Option<(&ChunkId, i64)> = None;
        for (chunk, meta) in &state.stored {
            let slack = meta.slack();
            if best.map_or(true, |(_, s)| slack > s) {
                best = Some((chunk, slack));
            }
        }
        best.map(|(chunk, _)| chunk.clone())
    }

    pub fn add_pending_delete(&self, storer: NodeId, file_id: FileId) {
        {
            let mut state = self.lock();
            let queue = state.pending_deletes.entry(storer).or_default();
            if queue.contains(&file_id) {
                return;
            }
            queue.push(file_id);
        }
        self.changed();
    }

    pub fn has_pending_deletes(&self, storer: NodeId) -> bool {
        self.lock().pending_deletes.contains_key(&storer)
    }

    /// Drains the queue for `storer`; failed resends must be queued again.
    pub fn take_pending_deletes(&self, storer: NodeId) -> Vec<FileId> {
        let taken = self.lock().pending_deletes.remove(&storer).unwrap_or_default();
        if !taken.is_empty() {
            self.changed();
        }
        taken
    }

    pub fn pending_deletes(&self, storer: NodeId) -> Vec<FileId> {
        self.lock()
            .pending_deletes
            .get(&storer)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> StoreState {
        self.lock().clone()
    }
}

impl Drop for ChunkStore {
    fn drop(&mut self) {
        let Some(file) = &self.file else {
            return;
        };
        if let Err(e) = file.write_if_dirty(&self.state) {
            warn!("Failed to save {} on close: {}", file.path().display(), e);
        }
        file.shutdown();
    }
}
