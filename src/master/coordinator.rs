//! RPC handlers of the master
//!
//! The coordinator owns the three registries (namespace, chunks, chunkservers) and the
//! chunkserver client. It is built once at startup and shared behind an `Arc` by the HTTP
//! layer and the background worker.

use crate::common::{
    instant_to_utc, retry_with_backoff, split_path, ChunkHandle, Error, FileInfo, HeartbeatArgs,
    LeaseInfo, MasterConfig, MasterRequest, MasterResponse, PathEntry, Result, ServerAddress,
    METRICS,
};
use crate::master::chunk_manager::ChunkManager;
use crate::master::chunkserver_client::ChunkServerClient;
use crate::master::namespace::{FileGuard, NamespaceManager};
use crate::master::server_manager::ChunkServerManager;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::cmp::Ordering;
use std::future::Future;
use std::time::Duration;

/// First backoff delay between attempts of a chunkserver call
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

pub struct Coordinator<C> {
    pub(super) config: MasterConfig,
    pub(super) namespace: NamespaceManager,
    pub(super) chunks: ChunkManager,
    pub(super) servers: ChunkServerManager,
    pub(super) client: C,
    /// Held for the duration of a maintenance cycle
    pub(super) cycle: tokio::sync::Mutex<()>,
}

/// Canonical form of a path, used as the key of a file's chunk list
fn canonical(path: &str) -> Result<String> {
    Ok(format!("/{}", split_path(path)?.join("/")))
}

impl<C: ChunkServerClient> Coordinator<C> {
    pub fn new(config: MasterConfig, client: C) -> Self {
        let chunks = ChunkManager::new(
            config.replicas,
            config.lease_timeout(),
            config.repair_grace(),
        );
        let servers = ChunkServerManager::new(config.server_timeout());
        Self {
            config,
            namespace: NamespaceManager::new(),
            chunks,
            servers,
            client,
            cycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn chunk_manager(&self) -> &ChunkManager {
        &self.chunks
    }

    pub fn server_manager(&self) -> &ChunkServerManager {
        &self.servers
    }

    /// Route a request to its handler
    pub async fn dispatch(&self, request: MasterRequest) -> Result<MasterResponse> {
        match request {
            MasterRequest::Heartbeat(args) => {
                self.heartbeat(args).await;
                Ok(MasterResponse::Heartbeat)
            }
            MasterRequest::GetPrimaryAndSecondaries { handle } => self
                .get_primary_and_secondaries(handle)
                .await
                .map(MasterResponse::GetPrimaryAndSecondaries),
            MasterRequest::ExtendLease { handle, address } => {
                let expire = self.extend_lease(handle, &address).await?;
                Ok(MasterResponse::ExtendLease { expire })
            }
            MasterRequest::GetReplicas { handle } => {
                let locations = self.get_replicas(handle).await?;
                Ok(MasterResponse::GetReplicas { locations })
            }
            MasterRequest::CreateFile { path } => {
                self.create_file(&path).await?;
                Ok(MasterResponse::CreateFile)
            }
            MasterRequest::Mkdir { path } => {
                self.mkdir(&path).await?;
                Ok(MasterResponse::Mkdir)
            }
            MasterRequest::List { path } => {
                let entries = self.list(&path).await?;
                Ok(MasterResponse::List { entries })
            }
            MasterRequest::Delete { path } => {
                self.delete(&path).await?;
                Ok(MasterResponse::Delete)
            }
            MasterRequest::GetFileInfo { path } => {
                self.get_file_info(&path).await.map(MasterResponse::GetFileInfo)
            }
            MasterRequest::GetChunkHandle { path, index } => {
                let handle = self.get_chunk_handle(&path, index).await?;
                Ok(MasterResponse::GetChunkHandle { handle })
            }
        }
    }

    /// Refresh liveness, register newly reported replicas and extend requested leases.
    ///
    /// Per-chunk problems (a handle the master no longer knows, a copy beyond the
    /// replication target) are logged, never returned: the heartbeat itself always succeeds.
    pub async fn heartbeat(&self, args: HeartbeatArgs) {
        METRICS.heartbeats.inc();
        let address = args.address;

        for handle in self.servers.heartbeat(&address, &args.chunks) {
            match self.chunks.register_replica(handle, &address).await {
                Ok(true) => self.servers.add_chunk(std::slice::from_ref(&address), handle),
                Ok(false) => {
                    tracing::info!(server = %address, %handle, "replica set full, ignoring surplus copy")
                }
                Err(e) => {
                    tracing::debug!(server = %address, %handle, error = %e, "ignoring reported chunk")
                }
            }
        }

        for handle in args.lease_extensions {
            if let Err(e) = self.chunks.extend_lease(handle, &address).await {
                tracing::debug!(server = %address, %handle, error = %e, "lease extension skipped");
            }
        }
    }

    pub async fn get_primary_and_secondaries(&self, handle: ChunkHandle) -> Result<LeaseInfo> {
        let live = self.servers.live_servers();
        let lease = self.chunks.get_lease_holder(handle, &live).await?;
        Ok(LeaseInfo {
            primary: lease.primary,
            secondaries: lease.secondaries,
            expire: instant_to_utc(lease.expire),
        })
    }

    /// Extend the lease when `address` is its current primary; `None` otherwise
    pub async fn extend_lease(
        &self,
        handle: ChunkHandle,
        address: &ServerAddress,
    ) -> Result<Option<DateTime<Utc>>> {
        let expire = self.chunks.extend_lease(handle, address).await?;
        Ok(expire.map(instant_to_utc))
    }

    pub async fn get_replicas(&self, handle: ChunkHandle) -> Result<Vec<ServerAddress>> {
        self.chunks.get_replicas(handle).await
    }

    pub async fn create_file(&self, path: &str) -> Result<()> {
        self.namespace.create(path).await?;
        tracing::debug!(path, "created file");
        Ok(())
    }

    pub async fn mkdir(&self, path: &str) -> Result<()> {
        self.namespace.mkdir(path).await?;
        tracing::debug!(path, "created directory");
        Ok(())
    }

    pub async fn list(&self, path: &str) -> Result<Vec<PathEntry>> {
        self.namespace.list(path).await
    }

    /// Remove a file (dropping its chunk records) or an empty directory
    pub async fn delete(&self, path: &str) -> Result<()> {
        let key = canonical(path)?;
        let removed = self
            .namespace
            .delete(path, || {
                let dropped = self.chunks.remove_file(&key);
                self.servers.remove_chunks(&dropped);
                dropped.len()
            })
            .await?;
        match removed {
            Some(chunks) => tracing::info!(path, chunks, "deleted file"),
            None => tracing::info!(path, "deleted directory"),
        }
        Ok(())
    }

    pub async fn get_file_info(&self, path: &str) -> Result<FileInfo> {
        self.namespace.get_file_info(path).await
    }

    /// Resolve chunk `index` of `path`, allocating it when it is exactly the next chunk
    pub async fn get_chunk_handle(&self, path: &str, index: u64) -> Result<ChunkHandle> {
        let key = canonical(path)?;
        let mut file = self.namespace.lock_file(path).await?;
        let count = file.chunk_count();

        match index.cmp(&count) {
            Ordering::Less => self.chunks.get_chunk(&key, index),
            Ordering::Equal => self.allocate_chunk(&key, &mut file).await,
            Ordering::Greater => Err(Error::InvalidRequest(format!(
                "chunk index {} of {} is not the next chunk (file has {})",
                index, path, count
            ))),
        }
    }

    /// Append a new chunk to a locked file and have the chosen servers create it
    async fn allocate_chunk(&self, path: &str, file: &mut FileGuard) -> Result<ChunkHandle> {
        let candidates = self.servers.choose_servers(self.chunks.replication_target())?;
        let (handle, targets) = self.chunks.create_chunk(path, candidates)?;

        let calls: Vec<_> = targets
            .iter()
            .map(|server| {
                self.call_chunkserver(server, move || self.client.create_chunk(server, handle))
            })
            .collect();
        let results = join_all(calls).await;

        let mut created = Vec::with_capacity(targets.len());
        for (server, res) in targets.iter().zip(results) {
            match res {
                Ok(()) => created.push(server.clone()),
                Err(e) => {
                    tracing::warn!(%handle, %server, error = %e, "chunk creation failed")
                }
            }
        }

        if created.is_empty() {
            self.chunks.discard_chunk(path, handle);
            let nodes: Vec<&str> = targets.iter().map(|s| s.as_str()).collect();
            return Err(Error::downstream(
                nodes.join(","),
                format!("no chunkserver created chunk {}", handle),
            ));
        }

        let mut registered = Vec::with_capacity(created.len());
        for server in created {
            if self.chunks.register_replica(handle, &server).await? {
                registered.push(server);
            }
        }
        self.servers.add_chunk(&registered, handle);
        file.set_chunk_count(file.chunk_count() + 1);

        if registered.len() < targets.len() {
            tracing::warn!(
                %handle,
                path,
                created = registered.len(),
                wanted = targets.len(),
                "chunk allocated under-replicated"
            );
        } else {
            tracing::info!(%handle, path, "allocated chunk");
        }
        Ok(handle)
    }

    /// One chunkserver call with per-attempt timeout and bounded retry
    pub(super) async fn call_chunkserver<F, Fut>(&self, server: &ServerAddress, f: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        retry_with_backoff(
            server.as_str(),
            f,
            self.config.downstream_retries,
            self.config.downstream_timeout(),
            RETRY_BASE_DELAY,
        )
        .await
    }
}
