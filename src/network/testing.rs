//! Transport doubles for unit tests.

use super::messages::Message;
use super::{OnFailure, Transport};
use crate::chord::types::{Channel, ChordNode, Endpoint, NodeId, NodePorts};
use crate::error::NetworkError;
use std::collections::HashSet;
use std::sync::Mutex;

/// Records outbound messages; sends to `down` endpoints fail on the spot.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(Endpoint, Message)>>,
    down: Mutex<HashSet<Endpoint>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<(Endpoint, Message)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Makes every listener of `node` unreachable.
    pub fn take_down(&self, node: &ChordNode) {
        let mut down = self.down.lock().unwrap();
        for channel in [Channel::Control, Channel::Backup, Channel::Restore, Channel::Delete] {
            down.insert(node.endpoint(channel));
        }
    }

    pub fn bring_up(&self, node: &ChordNode) {
        self.down.lock().unwrap().retain(|e| e.ip != node.ip || !node.ports.to_array().contains(&e.port));
    }
}

impl Transport for RecordingTransport {
    fn send(&self, to: Endpoint, message: Message, on_failure: Option<OnFailure>) {
        if self.down.lock().unwrap().contains(&to) {
            if let Some(callback) = on_failure {
                callback(NetworkError::PeerUnreachable(to.to_string()));
            }
            return;
        }
        self.sent.lock().unwrap().push((to, message));
    }
}

/// Loopback node with ports derived from its id.
pub fn node(id: u64) -> ChordNode {
    ChordNode::new(
        NodeId::new(id).unwrap(),
        "127.0.0.1".parse().unwrap(),
        NodePorts::consecutive(10_000 + (id as u16) * 10),
    )
}

pub fn id(value: u64) -> NodeId {
    NodeId::new(value).unwrap()
}
