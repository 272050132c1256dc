use super::Protocol;
use crate::chord::types::{Channel, Endpoint, NodeId};
use crate::error::ProtocolError;
use crate::network::messages::{Body, FileId};
use log::{debug, info, warn};
use std::sync::Arc;

impl Protocol {
    /// Deletes the newest backup of `path` from every peer known to hold part
    /// of it. Returns how many storers were contacted.
    pub fn delete(self: &Arc<Self>, path: &str) -> Result<usize, ProtocolError> {
        let file = self
            .store
            .owned_file_by_path(path)
            .ok_or_else(|| ProtocolError::UnknownFile(path.to_string()))?;
        self.delete_file(&file.file_id)
    }

    pub fn delete_file(self: &Arc<Self>, file_id: &FileId) -> Result<usize, ProtocolError> {
        let file = self
            .store
            .drop_owned_file(file_id)
            .ok_or_else(|| ProtocolError::UnknownFile(file_id.to_string()))?;
        let storers = file.all_storers();
        info!("Deleting {} from {} storer(s)", file.path, storers.len());
        for &storer in &storers {
            self.send_delete(storer, file_id.clone());
        }
        Ok(storers.len())
    }

    /// Resolves `storer` by id and sends it DELETE. A storer that has left the
    /// ring or cannot be reached keeps the file id in its pending record.
    fn send_delete(self: &Arc<Self>, storer: NodeId, file_id: FileId) {
        let protocol = self.clone();
        self.ring.find_successor(
            storer,
            Box::new(move |node| {
                // any other answer means the storer's id is now covered by someone else
                if node.id != storer {
                    warn!("Storer {} not in the ring, deferring delete of {:?}", storer, file_id);
                    protocol.store.add_pending_delete(storer, file_id);
                    return;
                }
                let deferred = protocol.clone();
                let pending = file_id.clone();
                protocol.session().send_to(
                    &node,
                    Body::Delete {
                        file_id,
                        reply_to: protocol.session().reply_endpoint(Channel::Delete),
                    },
                    Some(Box::new(move |err| {
                        warn!("DELETE to {} failed ({}), deferring", storer, err);
                        deferred.store.add_pending_delete(storer, pending);
                    })),
                );
            }),
        );
    }

    pub(super) fn resend_pending_deletes(self: &Arc<Self>, storer: NodeId) {
        let pending = self.store.take_pending_deletes(storer);
        if pending.is_empty() {
            return;
        }
        info!("Node {} is back, resending {} delete(s)", storer, pending.len());
        for file_id in pending {
            self.send_delete(storer, file_id);
        }
    }

    pub(super) fn handle_delete(&self, sender: NodeId, file_id: FileId, reply_to: Endpoint) {
        let removed = self.store.remove_file_chunks(&file_id);
        info!("Deleted {} chunk(s) of {:?} on request of {}", removed.len(), file_id, sender);
        self.session().send(reply_to, Body::Deleted { file_id }, None);
    }

    pub(super) fn handle_deleted(&self, sender: NodeId, file_id: FileId) {
        debug!("Node {} confirmed deletion of {:?}", sender, file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::routing::ChordRing;
    use crate::network::messages::{ChunkId, Message};
    use crate::network::testing::{id, node, RecordingTransport};
    use crate::network::Session;
    use crate::storage::{ChunkStore, OwnedFile};
    use bytes::Bytes;

    /// Node 10 whose successor 40 resolves every key in (10, 40].
    fn protocol() -> (Arc<Protocol>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let ring = Arc::new(ChordRing::new(Session::new(node(10), transport.clone())));
        ring.set_successor(node(40));
        let store = Arc::new(ChunkStore::in_memory(1_000));
        (Arc::new(Protocol::new(ring, store, 3)), transport)
    }

    fn owned_by(protocol: &Protocol, storers: &[u64]) -> FileId {
        let file_id = FileId::compute("/d", 5);
        let mut file = OwnedFile::new("/d".into(), file_id.clone(), 5, 2, 1);
        file.storers[0] = storers.iter().map(|v| id(*v)).collect();
        file.storers[1] = [id(storers[0])].into();
        protocol.store().record_owned_file(file);
        file_id
    }

    #[test]
    fn delete_reaches_storers_and_defers_the_rest() {
        let (protocol, transport) = protocol();
        let file_id = owned_by(&protocol, &[40, 25]);
        assert_eq!(protocol.delete("/d").unwrap(), 2);
        assert!(!protocol.store().owns_file(&file_id));

        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, node(40).endpoint(Channel::Delete));
        // 25 resolved to 40: no longer in the ring
        assert_eq!(protocol.store().pending_deletes(id(25)), vec![file_id.clone()]);
        assert!(matches!(protocol.delete("/d"), Err(ProtocolError::UnknownFile(_))));
    }

    #[test]
    fn unreachable_storer_is_retried_when_it_speaks_again() {
        let (protocol, transport) = protocol();
        transport.take_down(&node(40));
        let file_id = owned_by(&protocol, &[40]);
        protocol.delete("/d").unwrap();
        assert!(transport.take().is_empty());
        assert!(protocol.store().has_pending_deletes(id(40)));

        // any message from 40 triggers the resend
        transport.bring_up(&node(40));
        protocol.dispatch(Message::new(id(40), Body::CheckActive));
        assert!(!protocol.store().has_pending_deletes(id(40)));
        let sent = transport.take();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, node(40).endpoint(Channel::Delete));
        assert!(matches!(&sent[0].1.body, Body::Delete { file_id: f, .. } if *f == file_id));
    }

    #[test]
    fn storer_removes_chunks_and_confirms() {
        let (protocol, transport) = protocol();
        let file_id = FileId::compute("/remote", 1);
        let reply_to = node(40).endpoint(Channel::Delete);
        for index in 0..2 {
            protocol
                .store()
                .store_chunk(&ChunkId::new(file_id.clone(), index), &Bytes::from_static(b"x"), 1, reply_to)
                .unwrap();
        }
        protocol.dispatch(Message::new(id(40), Body::Delete { file_id: file_id.clone(), reply_to }));
        assert!(protocol.store().stored_chunks().is_empty());
        let sent = transport.take();
        assert_eq!(sent[0].0, reply_to);
        assert_eq!(sent[0].1.body, Body::Deleted { file_id });
    }
}
