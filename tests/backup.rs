mod common;

use chordvault::error::ProtocolError;
use chordvault::network::messages::{Body, FileId, Message};
use chordvault::network::MessageHandler;
use common::{contents, Cluster, CHUNK_SIZE};

#[tokio::test]
async fn every_chunk_reaches_the_requested_replication() {
    let cluster = Cluster::start(&[5, 18, 29, 41, 57]).await;
    let owner = cluster.peer(29);
    let data = contents(CHUNK_SIZE * 3 + 5);

    let file_id = owner
        .protocol()
        .backup_bytes("/home/alice/notes.txt".into(), 1_700_000_000_000, data, 3)
        .unwrap();
    cluster.quiesce().await;

    let file = owner.store().owned_file(&file_id).unwrap();
    assert_eq!(file.chunk_count(), 4);
    for index in 0..file.chunk_count() {
        let chunk = file.chunk(index);
        let confirmed: Vec<u64> = file.storers[index as usize].iter().map(|id| id.value()).collect();
        assert_eq!(confirmed.len(), 3, "confirmed storers of chunk {}", index);
        assert!(!confirmed.contains(&29), "owner must not store its own chunk");
        assert_eq!(cluster.holders(&chunk), confirmed);
    }
}

#[tokio::test]
async fn replication_is_capped_by_the_ring() {
    let cluster = Cluster::start(&[10, 40]).await;
    let owner = cluster.peer(10);

    let file_id = owner
        .protocol()
        .backup_bytes("small".into(), 1, contents(CHUNK_SIZE - 1), 5)
        .unwrap();
    cluster.quiesce().await;

    let file = owner.store().owned_file(&file_id).unwrap();
    let confirmed: Vec<u64> = file.storers[0].iter().map(|id| id.value()).collect();
    assert_eq!(confirmed, vec![40]);
}

#[tokio::test]
async fn duplicate_stored_does_not_inflate_the_count() {
    let cluster = Cluster::start(&[5, 20, 50]).await;
    let owner = cluster.peer(5);

    let file_id = owner
        .protocol()
        .backup_bytes("dup".into(), 7, contents(CHUNK_SIZE / 2), 2)
        .unwrap();
    cluster.quiesce().await;
    let file = owner.store().owned_file(&file_id).unwrap();
    let chunk = file.chunk(0);
    let before = owner.store().confirmed_storers(&chunk);
    assert_eq!(before.len(), 2);

    let storer = *before.iter().next().unwrap();
    owner.handle(Message::new(storer, Body::Stored { chunk: chunk.clone() }));
    assert_eq!(owner.store().confirmed_storers(&chunk), before);
}

#[tokio::test]
async fn stored_for_unknown_file_is_ignored() {
    let cluster = Cluster::start(&[5, 20]).await;
    let peer = cluster.peer(5);
    let stranger = chordvault::network::messages::ChunkId::new(FileId::compute("elsewhere", 3), 0);

    peer.handle(Message::new(cluster.peer(20).id(), Body::Stored { chunk: stranger }));
    assert!(peer.store().owned_files().is_empty());
}

#[tokio::test]
async fn backup_of_missing_file_fails() {
    let cluster = Cluster::start(&[5]).await;
    let result = cluster.peer(5).backup("/definitely/not/here.bin", 2).await;
    assert!(matches!(result, Err(ProtocolError::Read { .. })));
}

#[tokio::test]
async fn backup_reads_the_file_from_disk() {
    let cluster = Cluster::start(&[5, 33]).await;
    let path = std::env::temp_dir().join(format!("chordvault-backup-{}.bin", rand::random::<u32>()));
    tokio::fs::write(&path, contents(CHUNK_SIZE * 2)).await.unwrap();

    let file_id = cluster.peer(5).backup(&path, 1).await.unwrap();
    cluster.quiesce().await;

    let file = cluster.peer(5).store().owned_file(&file_id).unwrap();
    assert_eq!(file.path, path.to_string_lossy());
    assert_eq!(file.chunk_count(), 3);
    assert!(file.storers.iter().all(|s| s.len() == 1));
    tokio::fs::remove_file(&path).await.unwrap();
}
