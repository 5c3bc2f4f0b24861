//! Deleting files: chunk records, server load and reuse of the path

mod common;

use common::{beat, FakeChunkServers};
use gfs_master::common::{Error, MasterConfig};
use gfs_master::Coordinator;
use std::sync::Arc;

fn master() -> Coordinator<FakeChunkServers> {
    Coordinator::new(MasterConfig::default(), FakeChunkServers::default())
}

#[tokio::test]
async fn test_delete_releases_server_load() {
    let coord = master();
    beat(&coord, &["A", "B", "C", "D"]).await;
    coord.create_file("/big").await.unwrap();
    for index in 0..20 {
        coord.get_chunk_handle("/big", index).await.unwrap();
    }
    let held: usize = coord
        .server_manager()
        .snapshot()
        .iter()
        .map(|s| s.chunks)
        .sum();
    assert_eq!(held, 60);

    coord.delete("/big").await.unwrap();
    assert_eq!(coord.chunk_manager().chunk_count(), 0);
    for server in coord.server_manager().snapshot() {
        assert_eq!(server.chunks, 0, "{} still counts deleted chunks", server.address);
    }

    // placement sees all four servers as empty again
    coord.create_file("/next").await.unwrap();
    let handle = coord.get_chunk_handle("/next", 0).await.unwrap();
    assert_eq!(coord.get_replicas(handle).await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_delete_racing_recreate_keeps_chunks_consistent() {
    let coord = Arc::new(master());

    for _ in 0..200 {
        beat(&coord, &["A", "B", "C"]).await;
        if coord.create_file("/f").await.is_ok() {
            coord.get_chunk_handle("/f", 0).await.unwrap();
        }

        let deleter = {
            let coord = coord.clone();
            tokio::spawn(async move { coord.delete("/f").await })
        };
        let creator = {
            let coord = coord.clone();
            tokio::spawn(async move {
                if coord.create_file("/f").await.is_ok() {
                    let _ = coord.get_chunk_handle("/f", 0).await;
                }
            })
        };
        let _ = deleter.await.unwrap();
        creator.await.unwrap();

        // whatever won, every chunk the file claims resolves to a live record
        match coord.get_file_info("/f").await {
            Ok(info) => {
                for index in 0..info.chunks {
                    let handle = coord.get_chunk_handle("/f", index).await.unwrap();
                    assert!(!coord.get_replicas(handle).await.unwrap().is_empty());
                }
                assert_eq!(coord.chunk_manager().chunk_count() as u64, info.chunks);
            }
            Err(Error::NotFound(_)) => assert_eq!(coord.chunk_manager().chunk_count(), 0),
            Err(e) => panic!("unexpected error {:?}", e),
        }

        let _ = coord.delete("/f").await;
        assert_eq!(coord.chunk_manager().chunk_count(), 0);
        for server in coord.server_manager().snapshot() {
            assert_eq!(server.chunks, 0);
        }
    }
}
