//! Periodic maintenance: dead-server sweep and re-replication
//!
//! A cycle first removes chunkservers that stopped heartbeating and scrubs them from every
//! replica set, then repairs each under-replicated chunk while holding that chunk's lock.
//! Failures are isolated per server and per chunk.

use crate::common::{ChunkHandle, Result, ServerAddress, METRICS};
use crate::master::chunkserver_client::ChunkServerClient;
use crate::master::coordinator::Coordinator;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Outcome of one maintenance cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub dead_servers: Vec<ServerAddress>,
    pub needlist: Vec<ChunkHandle>,
    pub repaired: Vec<ChunkHandle>,
    pub failed: Vec<ChunkHandle>,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.dead_servers.is_empty() && self.needlist.is_empty()
    }
}

impl<C: ChunkServerClient> Coordinator<C> {
    /// Run one cycle, or return `None` if another cycle is still in progress
    pub async fn run_maintenance_cycle(&self) -> Option<CycleReport> {
        let Ok(_running) = self.cycle.try_lock() else {
            METRICS.cycles_skipped.inc();
            tracing::debug!("maintenance cycle still running, skipping");
            return None;
        };

        let dead_servers = self.sweep_dead_servers().await;

        let live = self.servers.live_servers();
        let mut needlist = self.chunks.get_needlist(&live).await;
        needlist.sort();

        let mut repaired = Vec::new();
        let mut failed = Vec::new();
        for &handle in &needlist {
            match self.repair_chunk(handle).await {
                Ok(true) => repaired.push(handle),
                Ok(false) => {}
                Err(e) => {
                    METRICS.repairs_failed.inc();
                    tracing::warn!(%handle, error = %e, "re-replication failed");
                    failed.push(handle);
                }
            }
        }

        METRICS.live_servers.set(live.len() as u64);
        METRICS
            .under_replicated_chunks
            .set(needlist.len().saturating_sub(repaired.len()) as u64);

        let report = CycleReport {
            dead_servers,
            needlist,
            repaired,
            failed,
        };
        if !report.is_idle() {
            tracing::info!(
                dead = report.dead_servers.len(),
                needlist = report.needlist.len(),
                repaired = report.repaired.len(),
                failed = report.failed.len(),
                "maintenance cycle finished"
            );
        }
        Some(report)
    }

    /// Remove every server that missed its heartbeat deadline.
    ///
    /// Returns the servers detected dead, whether or not their scrub succeeded.
    pub async fn sweep_dead_servers(&self) -> Vec<ServerAddress> {
        let dead = self.servers.detect_dead_servers();
        for server in &dead {
            if let Err(e) = self.remove_dead_server(server).await {
                tracing::warn!(%server, error = %e, "failed to scrub dead chunkserver");
            }
        }
        dead
    }

    async fn remove_dead_server(&self, server: &ServerAddress) -> Result<()> {
        let handles = self.servers.remove_server(server)?;
        METRICS.dead_servers_removed.inc();
        tracing::warn!(%server, chunks = handles.len(), "removing dead chunkserver");
        self.chunks.remove_chunks(&handles, server).await
    }

    /// Copy one replica of `handle` to a new server.
    ///
    /// Returns `Ok(false)` when, under the chunk lock, the chunk turns out not to need
    /// repair any more (or its grace period is not over).
    async fn repair_chunk(&self, handle: ChunkHandle) -> Result<bool> {
        let mut chunk = self.chunks.lock_chunk(handle).await?;
        let live = self.servers.live_servers();
        if !chunk.is_repair_eligible(Instant::now()) || !chunk.needs_repair(&live) {
            return Ok(false);
        }

        let (source, destination) = self.servers.choose_re_replication(handle)?;
        tracing::info!(%handle, %source, %destination, "re-replicating chunk");

        self.call_chunkserver(&destination, || {
            self.client.create_chunk(&destination, handle)
        })
        .await?;
        self.call_chunkserver(&source, || {
            self.client.send_copy(&source, handle, &destination)
        })
        .await?;

        // a file deleted meanwhile leaves nothing to register
        if !chunk.register_replica(&destination) || !self.chunks.contains(handle) {
            return Ok(false);
        }
        self.servers
            .add_chunk(std::slice::from_ref(&destination), handle);
        METRICS.repairs_succeeded.inc();
        Ok(true)
    }
}

/// Run maintenance cycles on a fixed tick until the task is aborted
pub fn spawn_background<C: ChunkServerClient>(coordinator: Arc<Coordinator<C>>) -> JoinHandle<()> {
    let period = coordinator.config().background_interval();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            coordinator.run_maintenance_cycle().await;
        }
    })
}
