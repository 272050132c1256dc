use super::{chunking, Protocol};
use crate::chord::types::{Channel, Endpoint, NodeId};
use crate::error::ProtocolError;
use crate::network::messages::{Body, ChunkId};
use crate::storage::OwnedFile;
use bytes::Bytes;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Chunks collected so far for one file being restored.
pub struct RestoreState {
    chunk_count: u32,
    chunks: BTreeMap<u32, Bytes>,
    done: oneshot::Sender<Bytes>,
}

impl Protocol {
    /// Starts restoring the newest backup of `path`. The receiver yields the
    /// reassembled contents once every chunk has come back.
    pub fn restore(self: &Arc<Self>, path: &str) -> Result<oneshot::Receiver<Bytes>, ProtocolError> {
        let file = self
            .store
            .owned_file_by_path(path)
            .ok_or_else(|| ProtocolError::UnknownFile(path.to_string()))?;
        self.restore_file(file)
    }

    pub fn restore_file(self: &Arc<Self>, file: OwnedFile) -> Result<oneshot::Receiver<Bytes>, ProtocolError> {
        if let Some(index) = file.storers.iter().position(|s| s.is_empty()) {
            return Err(ProtocolError::NoKnownStorers(file.chunk(index as u32).to_string()));
        }

        let (done, restored) = oneshot::channel();
        let previous = self.restores.insert(
            file.file_id.clone(),
            RestoreState {
                chunk_count: file.chunk_count(),
                chunks: BTreeMap::new(),
                done,
            },
        );
        if previous.is_some() {
            warn!("Restore of {} restarted, the earlier request is abandoned", file.path);
        }

        info!("Restoring {} ({} chunk(s))", file.path, file.chunk_count());
        for (index, storers) in file.storers.iter().enumerate() {
            let storers: Arc<[NodeId]> = storers.iter().copied().collect();
            self.request_chunk(file.chunk(index as u32), storers, 0);
        }
        Ok(restored)
    }

    /// Restores `path` and writes the contents to `out`; returns the byte count.
    pub async fn restore_to(self: &Arc<Self>, path: &str, out: impl AsRef<Path>) -> Result<usize, ProtocolError> {
        let contents = self
            .restore(path)?
            .await
            .map_err(|_| ProtocolError::RestoreAborted(path.to_string()))?;
        let out = out.as_ref();
        tokio::fs::write(out, &contents)
            .await
            .map_err(|source| ProtocolError::Write {
                path: out.to_string_lossy().to_string(),
                source,
            })?;
        Ok(contents.len())
    }

    /// Asks the storer at `position` (ascending id order) for `chunk`, moving
    /// on to the next one when it cannot be found or reached.
    fn request_chunk(self: &Arc<Self>, chunk: ChunkId, storers: Arc<[NodeId]>, position: usize) {
        let Some(&storer) = storers.get(position) else {
            warn!("No reachable storer left for chunk {}, restore stalls", chunk);
            return;
        };

        let protocol = self.clone();
        self.ring.find_successor(
            storer,
            Box::new(move |node| {
                // successor(id) is the storer itself only while it is in the ring
                if node.id != storer {
                    debug!("Storer {} of chunk {} is gone (lookup gave {})", storer, chunk, node.id);
                    protocol.request_chunk(chunk, storers, position + 1);
                    return;
                }
                let retry = protocol.clone();
                let retried = chunk.clone();
                protocol.session().send_to(
                    &node,
                    Body::GetChunk {
                        chunk,
                        reply_to: protocol.session().reply_endpoint(Channel::Restore),
                    },
                    Some(Box::new(move |err| {
                        debug!("GETCHUNK to {} failed: {}", storer, err);
                        retry.request_chunk(retried, storers, position + 1);
                    })),
                );
            }),
        );
    }

    pub(super) fn handle_getchunk(&self, chunk: ChunkId, reply_to: Endpoint) {
        match self.store.get_chunk(&chunk) {
            Ok(data) => self.session().send(reply_to, Body::Chunk { chunk, data }, None),
            Err(e) => debug!("Not answering GETCHUNK: {}", e),
        }
    }

    pub(super) fn handle_chunk(&self, chunk: ChunkId, data: Bytes) {
        let complete = {
            let Some(mut state) = self.restores.get_mut(&chunk.file_id) else {
                debug!("Unsolicited CHUNK {}", chunk);
                return;
            };
            if chunk.index >= state.chunk_count {
                return;
            }
            state.chunks.entry(chunk.index).or_insert(data);
            state.chunks.len() as u32 == state.chunk_count
        };
        if !complete {
            return;
        }

        if let Some((file_id, state)) = self.restores.remove(&chunk.file_id) {
            let contents = chunking::reassemble(state.chunks.into_values());
            info!("Restored {:?}: {} bytes", file_id, contents.len());
            let _ = state.done.send(contents);
        }
    }
}
