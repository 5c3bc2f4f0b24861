//! Dead chunkserver detection, re-replication and lease failover

mod common;

use common::{addr, addrs, beat, FakeChunkServers};
use gfs_master::common::{ChunkHandle, Error, HeartbeatArgs, MasterConfig};
use gfs_master::Coordinator;
use std::time::Duration;
use tokio::time::advance;

fn master() -> (Coordinator<FakeChunkServers>, FakeChunkServers) {
    let fake = FakeChunkServers::default();
    (Coordinator::new(MasterConfig::default(), fake.clone()), fake)
}

#[tokio::test(start_paused = true)]
async fn test_dead_server_is_replaced() {
    let (coord, fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/f").await.unwrap();
    let handle = coord.get_chunk_handle("/f", 0).await.unwrap();
    assert_eq!(handle, ChunkHandle(1));
    assert_eq!(coord.get_replicas(handle).await.unwrap(), addrs(&["A", "B", "C"]));

    // C goes silent, D joins
    advance(Duration::from_millis(600)).await;
    beat(&coord, &["A", "B", "D"]).await;
    advance(Duration::from_millis(600)).await;
    beat(&coord, &["A", "B", "D"]).await;

    let report = coord.run_maintenance_cycle().await.unwrap();
    assert_eq!(report.dead_servers, addrs(&["C"]));
    assert_eq!(coord.get_replicas(handle).await.unwrap(), addrs(&["A", "B"]));
    // replica loss restarts the grace period
    assert!(report.repaired.is_empty());

    advance(Duration::from_millis(1100)).await;
    beat(&coord, &["A", "B", "D"]).await;
    let live = coord.server_manager().live_servers();
    assert_eq!(coord.chunk_manager().get_needlist(&live).await, vec![handle]);

    let report = coord.run_maintenance_cycle().await.unwrap();
    assert!(report.dead_servers.is_empty());
    assert_eq!(report.repaired, vec![handle]);
    assert_eq!(
        coord.get_replicas(handle).await.unwrap(),
        addrs(&["A", "B", "D"])
    );

    let copies = fake.copies();
    assert_eq!(copies.len(), 1);
    let (source, copied, destination) = &copies[0];
    assert!(*source == addr("A") || *source == addr("B"));
    assert_eq!(*copied, handle);
    assert_eq!(*destination, addr("D"));
    assert!(fake.created().contains(&(addr("D"), handle)));

    let live = coord.server_manager().live_servers();
    assert!(coord.chunk_manager().get_needlist(&live).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unrepairable_chunk_does_not_block_others() {
    let (coord, fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/x").await.unwrap();
    coord.create_file("/y").await.unwrap();

    fake.set_down(&["C"]);
    let x = coord.get_chunk_handle("/x", 0).await.unwrap();
    fake.set_down(&["B", "C"]);
    let y = coord.get_chunk_handle("/y", 0).await.unwrap();
    fake.set_down(&[]);
    assert_eq!(coord.get_replicas(x).await.unwrap(), addrs(&["A", "B"]));
    assert_eq!(coord.get_replicas(y).await.unwrap(), addrs(&["A"]));

    // C dies; only A and B are left
    advance(Duration::from_millis(700)).await;
    beat(&coord, &["A", "B"]).await;
    advance(Duration::from_millis(500)).await;
    beat(&coord, &["A", "B"]).await;

    let report = coord.run_maintenance_cycle().await.unwrap();
    assert_eq!(report.dead_servers, addrs(&["C"]));
    assert_eq!(report.needlist, vec![x, y]);
    assert_eq!(report.failed, vec![x]);
    assert_eq!(report.repaired, vec![y]);
    assert_eq!(coord.get_replicas(y).await.unwrap(), addrs(&["A", "B"]));

    assert!(matches!(
        coord.server_manager().choose_re_replication(x),
        Err(Error::NoAvailableServers { .. })
    ));

    // still under-replicated, still reported, cycle keeps running
    let report = coord.run_maintenance_cycle().await.unwrap();
    assert!(report.needlist.contains(&x));
    assert_eq!(coord.get_replicas(x).await.unwrap(), addrs(&["A", "B"]));
}

#[tokio::test(start_paused = true)]
async fn test_removed_server_leaves_every_replica_set() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C", "D"]).await;
    coord.create_file("/f").await.unwrap();
    let mut handles = Vec::new();
    for index in 0..4 {
        handles.push(coord.get_chunk_handle("/f", index).await.unwrap());
    }

    advance(Duration::from_millis(1200)).await;
    beat(&coord, &["A", "B", "C"]).await;
    assert_eq!(coord.sweep_dead_servers().await, addrs(&["D"]));
    assert!(coord.sweep_dead_servers().await.is_empty());

    for handle in handles {
        assert!(!coord.get_replicas(handle).await.unwrap().contains(&addr("D")));
    }
}

#[tokio::test(start_paused = true)]
async fn test_rejoining_server_reregisters_its_chunks() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/f").await.unwrap();
    let handle = coord.get_chunk_handle("/f", 0).await.unwrap();

    advance(Duration::from_millis(1200)).await;
    beat(&coord, &["A", "B"]).await;
    coord.run_maintenance_cycle().await.unwrap();
    assert_eq!(coord.get_replicas(handle).await.unwrap(), addrs(&["A", "B"]));

    coord
        .heartbeat(HeartbeatArgs {
            address: addr("C"),
            chunks: vec![handle],
            lease_extensions: vec![],
        })
        .await;
    assert_eq!(
        coord.get_replicas(handle).await.unwrap(),
        addrs(&["A", "B", "C"])
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejoining_server_does_not_overfill_repaired_chunk() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/f").await.unwrap();
    let handle = coord.get_chunk_handle("/f", 0).await.unwrap();

    // C dies and is swept, D joins
    advance(Duration::from_millis(1200)).await;
    beat(&coord, &["A", "B", "D"]).await;
    coord.run_maintenance_cycle().await.unwrap();
    advance(Duration::from_millis(1100)).await;
    beat(&coord, &["A", "B", "D"]).await;
    let report = coord.run_maintenance_cycle().await.unwrap();
    assert_eq!(report.repaired, vec![handle]);
    assert_eq!(
        coord.get_replicas(handle).await.unwrap(),
        addrs(&["A", "B", "D"])
    );

    // C comes back still holding its old copy
    for _ in 0..2 {
        coord
            .heartbeat(HeartbeatArgs {
                address: addr("C"),
                chunks: vec![handle],
                lease_extensions: vec![],
            })
            .await;
    }
    let replicas = coord.get_replicas(handle).await.unwrap();
    assert_eq!(replicas, addrs(&["A", "B", "D"]));
    assert!(replicas.len() <= coord.chunk_manager().replication_target());

    let status = coord.server_manager().snapshot();
    let c = status.iter().find(|s| s.address == addr("C")).unwrap();
    assert!(c.live);
    assert_eq!(c.chunks, 0);
}

#[tokio::test(start_paused = true)]
async fn test_lease_moves_to_live_replica_after_expiry() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/f").await.unwrap();
    let handle = coord.get_chunk_handle("/f", 0).await.unwrap();

    let lease = coord.get_primary_and_secondaries(handle).await.unwrap();
    assert_eq!(lease.primary, addr("A"));
    assert_eq!(lease.secondaries, addrs(&["B", "C"]));

    // A stops heartbeating; its lease is still in force
    advance(Duration::from_millis(1200)).await;
    beat(&coord, &["B", "C"]).await;
    let during = coord.get_primary_and_secondaries(handle).await.unwrap();
    assert_eq!(during.primary, lease.primary);
    assert_eq!(during.secondaries, lease.secondaries);

    advance(Duration::from_millis(900)).await;
    beat(&coord, &["B", "C"]).await;
    let after = coord.get_primary_and_secondaries(handle).await.unwrap();
    assert_eq!(after.primary, addr("B"));
    assert_eq!(after.secondaries, addrs(&["C"]));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_lease_alive() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.create_file("/f").await.unwrap();
    let handle = coord.get_chunk_handle("/f", 0).await.unwrap();
    let live = coord.server_manager().live_servers();
    let lease = coord
        .chunk_manager()
        .get_lease_holder(handle, &live)
        .await
        .unwrap();

    for _ in 0..5 {
        advance(Duration::from_millis(800)).await;
        coord
            .heartbeat(HeartbeatArgs {
                address: addr("A"),
                chunks: vec![handle],
                lease_extensions: vec![handle],
            })
            .await;
        beat(&coord, &["B", "C"]).await;
    }

    // 4s later the original 2s lease would be long gone
    let live = coord.server_manager().live_servers();
    let current = coord
        .chunk_manager()
        .get_lease_holder(handle, &live)
        .await
        .unwrap();
    assert_eq!(current.primary, addr("A"));
    assert!(current.expire > lease.expire);
}

#[tokio::test]
async fn test_chunk_resolution_is_idempotent_and_sequential() {
    let (coord, _fake) = master();
    beat(&coord, &["A", "B", "C"]).await;
    coord.mkdir("/logs").await.unwrap();
    coord.create_file("/logs/a").await.unwrap();
    coord.create_file("/logs/b").await.unwrap();

    let a0 = coord.get_chunk_handle("/logs/a", 0).await.unwrap();
    let b0 = coord.get_chunk_handle("/logs/b", 0).await.unwrap();
    let a1 = coord.get_chunk_handle("/logs/a", 1).await.unwrap();
    assert_ne!(a0, b0);
    assert_ne!(a0, a1);

    for _ in 0..3 {
        assert_eq!(coord.get_chunk_handle("/logs/a", 0).await.unwrap(), a0);
        assert_eq!(coord.get_chunk_handle("/logs/a", 1).await.unwrap(), a1);
    }
    assert!(matches!(
        coord.get_chunk_handle("/logs/b", 3).await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        coord.get_chunk_handle("/logs/missing", 0).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        coord.get_chunk_handle("/logs", 0).await,
        Err(Error::InvalidRequest(_))
    ));
    assert_eq!(coord.get_file_info("/logs/a").await.unwrap().chunks, 2);
}
