mod common;

use chordvault::chord::types::{Channel, NodeId};
use chordvault::chord::RING_SIZE;
use common::Cluster;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

async fn lookups_from(cluster: &Cluster, from: u64) -> BTreeMap<u64, u64> {
    let answers = Arc::new(Mutex::new(BTreeMap::new()));
    for key in 0..RING_SIZE {
        let answers = answers.clone();
        cluster.peer(from).ring().find_successor(
            NodeId::new(key).unwrap(),
            Box::new(move |node| {
                answers.lock().unwrap().insert(key, node.id.value());
            }),
        );
    }
    cluster.quiesce().await;
    let answers = answers.lock().unwrap().clone();
    answers
}

#[tokio::test]
async fn three_nodes_agree_on_every_key() {
    let cluster = Cluster::start(&[5, 20, 50]).await;

    for (id, successor, predecessor) in [(5, 20, 50), (20, 50, 5), (50, 5, 20)] {
        let ring = cluster.peer(id).ring();
        assert_eq!(ring.successor().unwrap().id.value(), successor, "successor of {}", id);
        assert_eq!(ring.predecessor().unwrap().id.value(), predecessor, "predecessor of {}", id);
    }

    for from in [5, 20, 50] {
        let answers = lookups_from(&cluster, from).await;
        assert_eq!(answers.len(), RING_SIZE as usize);
        for (key, owner) in answers {
            assert_eq!(owner, cluster.expected_owner(key), "successor({}) asked at {}", key, from);
        }
    }
    assert_eq!(lookups_from(&cluster, 20).await[&60], 5);
}

#[tokio::test]
async fn second_node_links_both_ways() {
    let cluster = Cluster::start(&[40, 8]).await;

    let first = cluster.peer(40).ring();
    let second = cluster.peer(8).ring();
    assert_eq!(first.successor().unwrap().id.value(), 8);
    assert_eq!(first.predecessor().unwrap().id.value(), 8);
    assert_eq!(second.successor().unwrap().id.value(), 40);
    assert_eq!(second.predecessor().unwrap().id.value(), 40);
}

#[tokio::test]
async fn fingers_point_at_successors_of_their_starts() {
    let cluster = Cluster::start(&[1, 12, 30, 45, 58]).await;

    for (&id, peer) in &cluster.peers {
        let local = NodeId::new(id).unwrap();
        for (index, finger) in peer.ring().fingers().into_iter().enumerate() {
            let start = local.finger_start(index).value();
            assert_eq!(
                finger.map(|n| n.id.value()),
                Some(cluster.expected_owner(start)),
                "finger {} of node {}",
                index,
                id
            );
        }
    }
}

#[tokio::test]
async fn leaving_node_hands_over_its_neighbours() {
    let mut cluster = Cluster::start(&[5, 20, 50]).await;

    cluster.peer(20).leave().await;
    cluster.quiesce().await;
    let gone = cluster.peers.remove(&20).unwrap();
    cluster.network.set_offline(gone.node(), true);

    assert_eq!(cluster.peer(5).ring().successor().unwrap().id.value(), 50);
    assert_eq!(cluster.peer(50).ring().predecessor().unwrap().id.value(), 5);

    cluster.settle().await;
    for (key, owner) in lookups_from(&cluster, 50).await {
        assert_eq!(owner, cluster.expected_owner(key), "successor({})", key);
    }
}

#[tokio::test]
async fn join_through_unknown_address_times_out() {
    let cluster = Cluster::start(&[5]).await;
    let lonely = Cluster::start(&[33]).await;

    let nowhere = cluster.peer(5).node().endpoint(Channel::Control);
    let result = lonely
        .peer(33)
        .join(nowhere, std::time::Duration::from_millis(200))
        .await;
    assert!(result.is_err());
}
