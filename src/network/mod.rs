pub mod local;
pub mod messages;
pub mod node;
pub mod tcp;

#[cfg(test)]
pub(crate) mod testing;

use crate::chord::types::{Channel, ChordNode, Endpoint, NodeId, NodePorts};
use crate::chord::{CHECK_PREDECESSOR_INTERVAL_MS, FIX_FINGERS_INTERVAL_MS, STABILIZE_INTERVAL_MS};
use crate::error::NetworkError;
use messages::{Body, Message};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 64_000;
pub const DEFAULT_CAPACITY: u64 = 1 << 30;
pub const DEFAULT_WORKERS: usize = 16;

/// Invoked when a one-way send could not be delivered.
pub type OnFailure = Box<dyn FnOnce(NetworkError) + Send + 'static>;

/// One-way message delivery. Implementations must not block the caller:
/// delivery happens in the background and failures are only reported through
/// `on_failure`, when one is given.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, to: Endpoint, message: Message, on_failure: Option<OnFailure>);
}

/// Receives decoded inbound messages.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: Message);
}

/// Outbound context of one peer: who we are and how to reach others.
/// Every message sent through it is stamped with the local node id.
#[derive(Clone)]
pub struct Session {
    local: ChordNode,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub fn new(local: ChordNode, transport: Arc<dyn Transport>) -> Self {
        Self { local, transport }
    }

    pub fn local(&self) -> &ChordNode {
        &self.local
    }

    pub fn local_id(&self) -> NodeId {
        self.local.id
    }

    /// Where replies of the given family should come back to.
    pub fn reply_endpoint(&self, channel: Channel) -> Endpoint {
        self.local.endpoint(channel)
    }

    /// Sends `body` to the listener of `node` that handles its kind.
    pub fn send_to(&self, node: &ChordNode, body: Body, on_failure: Option<OnFailure>) {
        let to = node.endpoint(body.channel());
        self.send(to, body, on_failure);
    }

    pub fn send(&self, to: Endpoint, body: Body, on_failure: Option<OnFailure>) {
        let message = Message::new(self.local.id, body);
        self.transport.send(to, message, on_failure);
    }
}

#[derive(Clone, Debug)]
pub struct MaintenanceIntervals {
    pub stabilize: Duration,
    pub fix_fingers: Duration,
    pub check_predecessor: Duration,
}

impl Default for MaintenanceIntervals {
    fn default() -> Self {
        Self {
            stabilize: Duration::from_millis(STABILIZE_INTERVAL_MS),
            fix_fingers: Duration::from_millis(FIX_FINGERS_INTERVAL_MS),
            check_predecessor: Duration::from_millis(CHECK_PREDECESSOR_INTERVAL_MS),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PeerConfig {
    /// Ring position; derived from `ip:control port` when not given.
    pub node_id: Option<NodeId>,
    pub ip: IpAddr,
    pub ports: NodePorts,
    /// Directory for chunks and metadata; everything stays in memory when absent.
    pub storage_dir: Option<PathBuf>,
    pub capacity: u64,
    pub chunk_size: usize,
    /// Upper bound on inbound messages handled concurrently.
    pub workers: usize,
    pub intervals: MaintenanceIntervals,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: NodePorts::consecutive(8000),
            storage_dir: None,
            capacity: DEFAULT_CAPACITY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: DEFAULT_WORKERS,
            intervals: MaintenanceIntervals::default(),
        }
    }
}

impl PeerConfig {
    pub fn local_node(&self) -> ChordNode {
        let id = self
            .node_id
            .unwrap_or_else(|| NodeId::from_endpoint(self.ip, self.ports.control));
        ChordNode::new(id, self.ip, self.ports)
    }
}
