use super::{chunking, Protocol};
use crate::chord::types::{Channel, Endpoint, NodeId};
use crate::error::ProtocolError;
use crate::network::messages::{Body, ChunkId, FileId};
use crate::storage::OwnedFile;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;

impl Protocol {
    /// Backs up the file at `path` with `replication` copies of every chunk.
    /// Returns once every PUTCHUNK is on its way; confirmations arrive later as
    /// STORED messages.
    pub async fn backup(self: &Arc<Self>, path: impl AsRef<Path>, replication: u32) -> Result<FileId, ProtocolError> {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        let read_err = |source| ProtocolError::Read {
            path: display.clone(),
            source,
        };

        let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
        let modified: DateTime<Utc> = metadata.modified().map_err(read_err)?.into();
        let data = tokio::fs::read(path).await.map_err(read_err)?;
        self.backup_bytes(display, modified.timestamp_millis(), Bytes::from(data), replication)
    }

    /// Backs up in-memory contents as if read from `path` at `modified_millis`.
    pub fn backup_bytes(
        self: &Arc<Self>,
        path: String,
        modified_millis: i64,
        data: Bytes,
        replication: u32,
    ) -> Result<FileId, ProtocolError> {
        if replication == 0 {
            return Err(ProtocolError::InvalidReplication);
        }
        let file_id = FileId::compute(&path, modified_millis);
        let chunks = chunking::split(&data, self.chunk_size);
        info!(
            "Backing up {} as {:?}: {} bytes in {} chunk(s), replication {}",
            path,
            file_id,
            data.len(),
            chunks.len(),
            replication
        );

        self.store.record_owned_file(OwnedFile::new(
            path,
            file_id.clone(),
            modified_millis,
            chunks.len() as u32,
            replication,
        ));
        for (index, data) in chunks.into_iter().enumerate() {
            self.send_putchunk(ChunkId::new(file_id.clone(), index as u32), replication, data);
        }
        Ok(file_id)
    }

    fn send_putchunk(self: &Arc<Self>, chunk: ChunkId, replication: u32, data: Bytes) {
        let protocol = self.clone();
        self.ring.find_successor(
            chunk.ring_key(),
            Box::new(move |owner| {
                debug!("Chunk {:?}#{} starts at node {}", chunk.file_id, chunk.index, owner.id);
                let reply_to = protocol.session().reply_endpoint(Channel::Backup);
                protocol.session().send_to(
                    &owner,
                    Body::PutChunk {
                        chunk,
                        remaining: replication,
                        reply_to,
                        data,
                    },
                    None,
                );
            }),
        );
    }

    pub(super) fn handle_putchunk(self: &Arc<Self>, chunk: ChunkId, remaining: u32, reply_to: Endpoint, data: Bytes) {
        let mut remaining = remaining;
        // a copy already held counts again without using up a replica, and
        // the owner never counts toward its own replication
        if self.store.is_chunk_stored(&chunk) {
            debug!("Chunk {} already here, acknowledging again", chunk);
            self.ack_stored(reply_to, &chunk);
        } else if self.store.owns_file(&chunk.file_id) {
            debug!("Chunk {} belongs to this node, passing it on", chunk);
        } else if remaining > 0 {
            match self.store.store_chunk(&chunk, &data, remaining, reply_to) {
                Ok(()) => {
                    self.ack_stored(reply_to, &chunk);
                    remaining -= 1;
                }
                Err(e) => debug!("Declined chunk {}: {}", chunk, e),
            }
        }

        if remaining == 0 {
            return;
        }
        let Some(successor) = self.ring.successor() else {
            return;
        };
        let local = self.ring.id();
        // the first holder is successor(key), so (local, successor] containing
        // the key means the next hop would start the walk over
        if successor.id == local || chunk.ring_key().in_half_open(local, successor.id) {
            warn!(
                "Chunk {:?}#{} went around the ring {} replica(s) short",
                chunk.file_id, chunk.index, remaining
            );
            return;
        }
        self.session().send_to(
            &successor,
            Body::PutChunk {
                chunk,
                remaining,
                reply_to,
                data,
            },
            None,
        );
    }

    fn ack_stored(&self, reply_to: Endpoint, chunk: &ChunkId) {
        self.session()
            .send(reply_to, Body::Stored { chunk: chunk.clone() }, None);
    }

    pub(super) fn handle_stored(&self, sender: NodeId, chunk: ChunkId) {
        if !self.store.owns_file(&chunk.file_id) {
            debug!("STORED for {} from {}, but the file is not ours", chunk, sender);
            return;
        }
        if self.store.add_confirmed_storer(&chunk, sender) {
            info!(
                "Chunk {:?}#{} confirmed by {} ({} of {})",
                chunk.file_id,
                chunk.index,
                sender,
                self.store.confirmed_storers(&chunk).len(),
                self.store.desired_replication(&chunk.file_id).unwrap_or_default()
            );
        }
    }

    pub(super) fn handle_removed(&self, sender: NodeId, chunk: ChunkId) {
        if self.store.remove_confirmed_storer(&chunk, sender) {
            info!("Chunk {:?}#{} dropped by {}", chunk.file_id, chunk.index, sender);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::routing::ChordRing;
    use crate::network::messages::Message;
    use crate::network::testing::{id, node, RecordingTransport};
    use crate::network::Session;
    use crate::storage::ChunkStore;

    fn protocol(local: u64, successor: u64) -> (Arc<Protocol>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let ring = Arc::new(ChordRing::new(Session::new(node(local), transport.clone())));
        ring.set_successor(node(successor));
        let store = Arc::new(ChunkStore::in_memory(1_000));
        (Arc::new(Protocol::new(ring, store, 4)), transport)
    }

    fn chunk_with_key_outside(lower: u64, upper: u64) -> ChunkId {
        (0..)
            .map(|i| ChunkId::new(FileId::compute("f", i), 0))
            .find(|c| !c.ring_key().in_half_open(id(lower), id(upper)))
            .unwrap()
    }

    fn owner() -> Endpoint {
        node(60).endpoint(Channel::Backup)
    }

    fn put(chunk: &ChunkId, remaining: u32) -> Message {
        Message::new(
            id(60),
            Body::PutChunk {
                chunk: chunk.clone(),
                remaining,
                reply_to: owner(),
                data: Bytes::from_static(b"data"),
            },
        )
    }

    #[test]
    fn eligible_node_stores_acks_and_forwards_decremented() {
        let (protocol, transport) = protocol(10, 20);
        let chunk = chunk_with_key_outside(10, 20);
        protocol.dispatch(put(&chunk, 2));

        assert!(protocol.store().is_chunk_stored(&chunk));
        let sent = transport.take();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, owner());
        assert_eq!(sent[0].1.body, Body::Stored { chunk: chunk.clone() });
        assert_eq!(sent[1].0, node(20).endpoint(Channel::Backup));
        assert!(matches!(sent[1].1.body, Body::PutChunk { remaining: 1, .. }));
    }

    #[test]
    fn last_replica_stops_the_chain() {
        let (protocol, transport) = protocol(10, 20);
        let chunk = chunk_with_key_outside(10, 20);
        protocol.dispatch(put(&chunk, 1));
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1.body, Body::Stored { .. }));
    }

    #[test]
    fn repeat_holder_reacks_without_decrementing() {
        let (protocol, transport) = protocol(10, 20);
        let chunk = chunk_with_key_outside(10, 20);
        protocol.dispatch(put(&chunk, 1));
        transport.take();

        protocol.dispatch(put(&chunk, 2));
        let sent = transport.take();
        assert_eq!(sent[0].1.body, Body::Stored { chunk: chunk.clone() });
        assert!(matches!(sent[1].1.body, Body::PutChunk { remaining: 2, .. }));
    }

    #[test]
    fn full_store_declines_and_forwards_unchanged() {
        let (protocol, transport) = protocol(10, 20);
        protocol.store().set_capacity(2);
        let chunk = chunk_with_key_outside(10, 20);
        protocol.dispatch(put(&chunk, 3));
        assert!(!protocol.store().is_chunk_stored(&chunk));
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1.body, Body::PutChunk { remaining: 3, .. }));
    }

    #[test]
    fn chain_stops_before_wrapping_to_first_holder() {
        let (protocol, transport) = protocol(10, 20);
        let chunk = (0..)
            .map(|i| ChunkId::new(FileId::compute("g", i), 0))
            .find(|c| c.ring_key().in_half_open(id(10), id(20)))
            .unwrap();
        protocol.dispatch(put(&chunk, 3));
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1.body, Body::Stored { .. }));
    }

    #[test]
    fn backup_records_file_and_confirmations_are_a_set() {
        let (protocol, transport) = protocol(10, 10);
        let file_id = protocol
            .backup_bytes("/tmp/x".into(), 7, Bytes::from_static(b"0123456789"), 2)
            .unwrap();
        let file = protocol.store().owned_file(&file_id).unwrap();
        assert_eq!(file.chunk_count(), 3);
        assert_eq!(file.desired, 2);

        // a lone node resolves every chunk to itself
        let sent = transport.take();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|(to, m)| *to == node(10).endpoint(Channel::Backup)
            && matches!(m.body, Body::PutChunk { remaining: 2, .. })));

        let chunk = ChunkId::new(file_id.clone(), 1);
        for sender in [30, 30, 45] {
            protocol.dispatch(Message::new(id(sender), Body::Stored { chunk: chunk.clone() }));
        }
        assert_eq!(protocol.store().confirmed_storers(&chunk).len(), 2);
        protocol.dispatch(Message::new(id(30), Body::Removed { chunk: chunk.clone() }));
        assert_eq!(protocol.store().confirmed_storers(&chunk).len(), 1);

        assert!(matches!(
            protocol.backup_bytes("/tmp/x".into(), 7, Bytes::new(), 0),
            Err(ProtocolError::InvalidReplication)
        ));
    }

    #[test]
    fn owner_never_stores_its_own_chunk() {
        let (protocol, transport) = protocol(10, 20);
        let file_id = protocol
            .backup_bytes("/tmp/own".into(), 1, Bytes::from_static(b"ab"), 1)
            .unwrap();
        transport.take();
        let chunk = ChunkId::new(file_id, 0);
        protocol.dispatch(put(&chunk, 1));
        assert!(!protocol.store().is_chunk_stored(&chunk));
    }
}
