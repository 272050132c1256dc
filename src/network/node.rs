use crate::chord::routing::{ChordRing, RoutingSnapshot};
use crate::chord::types::{ChordNode, Endpoint, NodeId};
use crate::chord::workers::Maintenance;
use crate::error::{ChordError, NetworkError, ProtocolError, VaultError};
use crate::network::messages::{ChunkId, FileId, Message};
use crate::network::tcp::TcpServer;
use crate::network::{MessageHandler, PeerConfig, Session, Transport};
use crate::protocol::Protocol;
use crate::storage::{ChunkStore, StoreState};
use bytes::Bytes;
use log::{info, warn};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;

/// One backup peer: ring membership, protocol and local store behind a single
/// inbound message handler.
pub struct Peer {
    config: PeerConfig,
    ring: Arc<ChordRing>,
    protocol: Arc<Protocol>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl Peer {
    pub fn new(config: PeerConfig, transport: Arc<dyn Transport>) -> Result<Arc<Self>, VaultError> {
        let store = match &config.storage_dir {
            Some(dir) => ChunkStore::open(dir, config.capacity)?,
            None => ChunkStore::in_memory(config.capacity),
        };
        let local = config.local_node();
        let ring = Arc::new(ChordRing::new(Session::new(local.clone(), transport)));
        let protocol = Arc::new(Protocol::new(ring.clone(), Arc::new(store), config.chunk_size));
        info!("Peer {} ready (chunk size {} bytes)", local, config.chunk_size);

        Ok(Arc::new(Self {
            config,
            ring,
            protocol,
            maintenance: Mutex::new(None),
        }))
    }

    pub fn node(&self) -> &ChordNode {
        self.ring.local()
    }

    pub fn id(&self) -> NodeId {
        self.ring.id()
    }

    pub fn ring(&self) -> &Arc<ChordRing> {
        &self.ring
    }

    pub fn protocol(&self) -> &Arc<Protocol> {
        &self.protocol
    }

    pub fn store(&self) -> &Arc<ChunkStore> {
        self.protocol.store()
    }

    /// Starts the four TCP listeners of this peer.
    pub async fn serve_tcp(self: &Arc<Self>) -> Result<TcpServer, NetworkError> {
        let handler: Arc<dyn MessageHandler> = self.clone();
        TcpServer::bind(self.config.ip, self.config.ports, handler, self.config.workers).await
    }

    pub fn create_network(&self) {
        self.ring.create();
    }

    /// Joins through `via` and waits (up to `deadline`) for the successor.
    pub async fn join(&self, via: Endpoint, deadline: Duration) -> Result<ChordNode, ChordError> {
        match timeout(deadline, self.ring.join(via)).await {
            Ok(Ok(successor)) => {
                info!("Node {} joined the ring, successor {}", self.id(), successor);
                Ok(successor)
            }
            Ok(Err(_)) => Err(ChordError::JoinFailed(format!("lookup through {} was abandoned", via))),
            Err(_) => Err(ChordError::JoinFailed(format!("no answer from {} within {:?}", via, deadline))),
        }
    }

    pub fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(Maintenance::spawn(self.ring.clone(), &self.config.intervals));
        }
    }

    pub async fn stop_maintenance(&self) {
        let running = self.maintenance.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(maintenance) = running {
            maintenance.stop().await;
        }
    }

    /// Graceful exit: maintenance stops first, then the neighbours are linked.
    pub async fn leave(&self) {
        self.stop_maintenance().await;
        self.ring.leave();
        if let Err(e) = self.store().flush() {
            warn!("Failed to save store state on leave: {}", e);
        }
    }

    pub async fn backup(&self, path: impl AsRef<Path>, replication: u32) -> Result<FileId, ProtocolError> {
        self.protocol.backup(path, replication).await
    }

    pub fn restore(&self, path: &str) -> Result<oneshot::Receiver<Bytes>, ProtocolError> {
        self.protocol.restore(path)
    }

    pub async fn restore_to(&self, path: &str, out: impl AsRef<Path>) -> Result<usize, ProtocolError> {
        self.protocol.restore_to(path, out).await
    }

    pub fn delete(&self, path: &str) -> Result<usize, ProtocolError> {
        self.protocol.delete(path)
    }

    pub fn reclaim(&self, capacity: u64) -> Vec<ChunkId> {
        self.protocol.reclaim(capacity)
    }

    pub fn state(&self) -> PeerState {
        PeerState {
            routing: self.ring.snapshot(),
            store: self.store().snapshot(),
        }
    }
}

impl MessageHandler for Peer {
    fn handle(&self, message: Message) {
        self.protocol.dispatch(message);
    }
}

/// Routing slots and store contents of one peer, for the `state` command.
pub struct PeerState {
    pub routing: RoutingSnapshot,
    pub store: StoreState,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.routing)?;
        writeln!(f, "storage     {}/{} bytes", self.store.usage(), self.store.capacity)?;
        for file in self.store.owned.values() {
            writeln!(f, "backed up   {} ({:?}, replication {})", file.path, file.file_id, file.desired)?;
            for (index, storers) in file.storers.iter().enumerate() {
                let ids: Vec<String> = storers.iter().map(|s| s.to_string()).collect();
                writeln!(f, "  chunk {:>4} on [{}]", index, ids.join(", "))?;
            }
        }
        for (chunk, meta) in &self.store.stored {
            writeln!(f, "storing     {:?}#{} ({} bytes)", chunk.file_id, chunk.index, meta.size)?;
        }
        for (storer, files) in &self.store.pending_deletes {
            writeln!(f, "pending     {} delete(s) for node {}", files.len(), storer)?;
        }
        Ok(())
    }
}
