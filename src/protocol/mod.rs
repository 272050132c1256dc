//! Backup, restore, delete and reclaim on top of the ring.
//!
//! Every operation is a chain of one-way messages: a ring lookup parks a
//! continuation, the continuation sends the next message, and the reply is
//! dispatched back here by whatever worker received it.

pub mod backup;
pub mod chunking;
pub mod delete;
pub mod reclaim;
pub mod restore;

use crate::chord::routing::ChordRing;
use crate::network::messages::{Body, FileId, Message};
use crate::network::Session;
use crate::storage::ChunkStore;
use dashmap::DashMap;
use log::debug;
use restore::RestoreState;
use std::sync::Arc;

pub struct Protocol {
    ring: Arc<ChordRing>,
    store: Arc<ChunkStore>,
    chunk_size: usize,
    restores: DashMap<FileId, RestoreState>,
}

impl Protocol {
    pub fn new(ring: Arc<ChordRing>, store: Arc<ChunkStore>, chunk_size: usize) -> Self {
        Self {
            ring,
            store,
            chunk_size,
            restores: DashMap::new(),
        }
    }

    pub fn ring(&self) -> &Arc<ChordRing> {
        &self.ring
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        &self.store
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn session(&self) -> &Session {
        self.ring.session()
    }

    /// Routes one inbound message to its handler.
    pub fn dispatch(self: &Arc<Self>, message: Message) {
        let sender = message.sender;
        debug!("Node {} <- {} from {}", self.ring.id(), message.kind(), sender);

        if sender != self.ring.id() && self.store.has_pending_deletes(sender) {
            self.resend_pending_deletes(sender);
        }

        match message.body {
            Body::FindSuccessor { key, reply_to } => self.ring.handle_find_successor(key, reply_to),
            Body::ReturnSuccessor { key, node } => self.ring.handle_return_successor(key, node),
            Body::GetPredecessor { node } => self.ring.handle_get_predecessor(node),
            Body::ReturnPredecessor { node } => self.ring.handle_return_predecessor(node),
            Body::Notify { node } => self.ring.notify(node),
            Body::SetSuccessor { node } => self.ring.handle_set_successor(node),
            Body::SetPredecessor { node } => self.ring.handle_set_predecessor(node),
            // delivery alone proves liveness
            Body::CheckActive => {}
            Body::PutChunk {
                chunk,
                remaining,
                reply_to,
                data,
            } => self.handle_putchunk(chunk, remaining, reply_to, data),
            Body::GiveChunk {
                chunk,
                reply_to,
                barrier,
                data,
            } => self.handle_givechunk(chunk, reply_to, barrier, data),
            Body::Stored { chunk } => self.handle_stored(sender, chunk),
            Body::Removed { chunk } => self.handle_removed(sender, chunk),
            Body::GetChunk { chunk, reply_to } => self.handle_getchunk(chunk, reply_to),
            Body::Chunk { chunk, data } => self.handle_chunk(chunk, data),
            Body::Delete { file_id, reply_to } => self.handle_delete(sender, file_id, reply_to),
            Body::Deleted { file_id } => self.handle_deleted(sender, file_id),
        }
    }
}
