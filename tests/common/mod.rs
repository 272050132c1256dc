#![allow(dead_code)]

use chordvault::chord::types::{Channel, NodeId, NodePorts};
use chordvault::chord::FINGER_TABLE_SIZE;
use chordvault::network::local::LocalNetwork;
use chordvault::network::node::Peer;
use chordvault::network::{MessageHandler, PeerConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const CHUNK_SIZE: usize = 16;

/// Peers wired through one in-process network, keyed by ring id.
pub struct Cluster {
    pub network: LocalNetwork,
    pub peers: BTreeMap<u64, Arc<Peer>>,
}

impl Cluster {
    /// Creates the ring on the first id, joins the rest through it one at a
    /// time and runs maintenance by hand until the routing state settles.
    pub async fn start(ids: &[u64]) -> Self {
        let network = LocalNetwork::new();
        let mut cluster = Cluster {
            network,
            peers: BTreeMap::new(),
        };

        let (&first, rest) = ids.split_first().expect("at least one node");
        let bootstrap = cluster.spawn(first);
        bootstrap.create_network();
        let via = bootstrap.node().endpoint(Channel::Control);

        for &id in rest {
            let peer = cluster.spawn(id);
            peer.join(via, Duration::from_secs(5)).await.expect("join");
            cluster.stabilize(3).await;
        }
        cluster.settle().await;
        cluster
    }

    fn spawn(&mut self, id: u64) -> Arc<Peer> {
        let config = PeerConfig {
            node_id: Some(NodeId::new(id).unwrap()),
            ports: NodePorts::consecutive(20_000 + (id as u16) * 10),
            chunk_size: CHUNK_SIZE,
            ..PeerConfig::default()
        };
        let peer = Peer::new(config, Arc::new(self.network.clone())).unwrap();
        let handler: Arc<dyn MessageHandler> = peer.clone();
        self.network.register(peer.node(), &handler);
        self.peers.insert(id, peer.clone());
        peer
    }

    pub fn peer(&self, id: u64) -> &Arc<Peer> {
        &self.peers[&id]
    }

    pub async fn quiesce(&self) {
        self.network.quiesce().await;
    }

    pub async fn stabilize(&self, rounds: usize) {
        for _ in 0..rounds {
            for peer in self.peers.values() {
                peer.ring().stabilize();
            }
            self.quiesce().await;
        }
    }

    pub async fn fix_fingers(&self) {
        for _ in 0..FINGER_TABLE_SIZE {
            for peer in self.peers.values() {
                peer.ring().fix_fingers();
            }
            self.quiesce().await;
        }
    }

    pub async fn settle(&self) {
        self.stabilize(2 * self.peers.len()).await;
        self.fix_fingers().await;
        self.stabilize(1).await;
    }

    /// Cuts `id` off the network and lets the survivors notice and repair
    /// their routing state around it.
    pub async fn fail(&mut self, id: u64) -> Arc<Peer> {
        let failed = self.peers.remove(&id).unwrap();
        self.network.set_offline(failed.node(), true);
        for peer in self.peers.values() {
            peer.ring().check_predecessor();
        }
        self.quiesce().await;
        self.settle().await;
        self.fix_fingers().await;
        failed
    }

    /// Id of the first peer at or after `key` going clockwise.
    pub fn expected_owner(&self, key: u64) -> u64 {
        self.peers
            .keys()
            .copied()
            .find(|&id| id >= key)
            .unwrap_or_else(|| *self.peers.keys().next().unwrap())
    }

    /// Ids of the peers currently holding `chunk`.
    pub fn holders(&self, chunk: &chordvault::network::messages::ChunkId) -> Vec<u64> {
        self.peers
            .iter()
            .filter(|(_, peer)| peer.store().is_chunk_stored(chunk))
            .map(|(&id, _)| id)
            .collect()
    }
}

/// Deterministic test contents spanning several chunks.
pub fn contents(len: usize) -> bytes::Bytes {
    (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
}
