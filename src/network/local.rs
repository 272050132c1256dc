use super::messages::Message;
use super::{MessageHandler, OnFailure, Transport};
use crate::chord::types::{Channel, ChordNode, Endpoint};
use crate::error::NetworkError;
use dashmap::{DashMap, DashSet};
use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

const CHANNELS: [Channel; 4] = [Channel::Control, Channel::Backup, Channel::Restore, Channel::Delete];

/// In-process message bus between peers of one process.
///
/// Delivery is asynchronous like a real network: every send is handed to a
/// spawned task. Peers can be taken offline, which makes sends to them fail
/// through the failure callback.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    peers: DashMap<Endpoint, Weak<dyn MessageHandler>>,
    offline: DashSet<Endpoint>,
    in_flight: AtomicUsize,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes all four listeners of `node` to `handler`. Only a weak reference
    /// is kept; a dropped peer behaves like a crashed one.
    pub fn register(&self, node: &ChordNode, handler: &Arc<dyn MessageHandler>) {
        for channel in CHANNELS {
            self.inner.peers.insert(node.endpoint(channel), Arc::downgrade(handler));
        }
    }

    pub fn set_offline(&self, node: &ChordNode, offline: bool) {
        for channel in CHANNELS {
            let endpoint = node.endpoint(channel);
            if offline {
                self.inner.offline.insert(endpoint);
            } else {
                self.inner.offline.remove(&endpoint);
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Waits until no message is in flight. Handlers that send while handling
    /// register their messages before their own delivery counts as done.
    pub async fn quiesce(&self) {
        while self.in_flight() > 0 {
            tokio::task::yield_now().await;
        }
    }
}

impl Inner {
    fn deliver(&self, to: Endpoint, message: Message, on_failure: Option<OnFailure>) {
        let handler = if self.offline.contains(&to) {
            None
        } else {
            self.peers.get(&to).and_then(|peer| peer.upgrade())
        };
        match handler {
            Some(handler) => handler.handle(message),
            None => {
                let err = NetworkError::PeerUnreachable(to.to_string());
                match on_failure {
                    Some(callback) => callback(err),
                    None => debug!("{} to {} lost: {}", message.kind(), to, err),
                }
            }
        }
    }
}

impl Transport for LocalNetwork {
    fn send(&self, to: Endpoint, message: Message, on_failure: Option<OnFailure>) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    inner.deliver(to, message, on_failure);
                    inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(_) => {
                inner.in_flight.fetch_sub(1, Ordering::SeqCst);
                if let Some(callback) = on_failure {
                    callback(NetworkError::ConnectionFailed("no async runtime".into()));
                }
            }
        }
    }
}
