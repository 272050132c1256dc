use super::Protocol;
use crate::chord::types::{Endpoint, NodeId};
use crate::network::messages::{Body, ChunkId};
use bytes::Bytes;
use log::{debug, info, warn};

impl Protocol {
    /// Shrinks (or grows) the local capacity, evicting chunks until usage fits.
    /// Each evicted chunk is reported to its owner and offered around the ring.
    pub fn reclaim(&self, capacity: u64) -> Vec<ChunkId> {
        self.store.set_capacity(capacity);
        let mut evicted = Vec::new();

        while self.store.over_capacity() {
            let Some(chunk) = self.store.eviction_candidate() else {
                break;
            };
            let data = match self.store.get_chunk(&chunk) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Evicting unreadable chunk {}: {}", chunk, e);
                    None
                }
            };
            let meta = match self.store.remove_chunk(&chunk) {
                Ok(meta) => meta,
                Err(e) => {
                    warn!("Failed to evict chunk {}: {}", chunk, e);
                    break;
                }
            };

            self.session()
                .send(meta.owner_reply, Body::Removed { chunk: chunk.clone() }, None);
            if let Some(data) = data {
                self.give_chunk(chunk.clone(), meta.owner_reply, data);
            }
            evicted.push(chunk);
        }

        info!(
            "Reclaim to {} bytes evicted {} chunk(s), {} bytes in use",
            capacity,
            evicted.len(),
            self.store.usage()
        );
        evicted
    }

    fn give_chunk(&self, chunk: ChunkId, reply_to: Endpoint, data: Bytes) {
        let local = self.ring.id();
        match self.ring.successor() {
            Some(successor) if successor.id != local => self.session().send_to(
                &successor,
                Body::GiveChunk {
                    chunk,
                    reply_to,
                    barrier: local,
                    data,
                },
                None,
            ),
            _ => warn!("No peer to hand chunk {} to, dropping it", chunk),
        }
    }

    /// Takes the chunk if possible; otherwise passes it on until the next hop
    /// would be the node that gave it away.
    pub(super) fn handle_givechunk(&self, chunk: ChunkId, reply_to: Endpoint, barrier: NodeId, data: Bytes) {
        let local = self.ring.id();
        // back at the giver: it evicted this copy and must not take it again
        if barrier == local {
            warn!("Chunk {} came back to the node that gave it away, dropping it", chunk);
            return;
        }

        let eligible = !self.store.is_chunk_stored(&chunk) && !self.store.owns_file(&chunk.file_id);
        if eligible {
            match self.store.store_chunk(&chunk, &data, 1, reply_to) {
                Ok(()) => {
                    info!("Took over chunk {} given away by {}", chunk, barrier);
                    self.session()
                        .send(reply_to, Body::Stored { chunk }, None);
                    return;
                }
                Err(e) => debug!("Cannot take chunk {}: {}", chunk, e),
            }
        }

        // a successor equal to the barrier means every other node declined
        match self.ring.successor() {
            Some(successor) if successor.id != barrier && successor.id != local => self.session().send_to(
                &successor,
                Body::GiveChunk {
                    chunk,
                    reply_to,
                    barrier,
                    data,
                },
                None,
            ),
            _ => warn!("Chunk {} went around the ring without a taker, dropping it", chunk),
        }
    }
}
