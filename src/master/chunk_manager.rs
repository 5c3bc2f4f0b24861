//! Chunk registry and lease state machine
//!
//! Every chunk record sits behind its own async mutex. Lease grants, replica changes and
//! re-replication all take that lock, so repair copies and lease grants on the same chunk
//! never interleave while unrelated chunks proceed in parallel. The registry maps themselves
//! are only locked for structural changes (insert/remove of a record).

use crate::common::{ChunkHandle, Error, Result, ServerAddress, METRICS};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Exclusive write authorization for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub primary: ServerAddress,
    pub secondaries: Vec<ServerAddress>,
    pub expire: Instant,
}

impl Lease {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire <= now
    }
}

#[derive(Debug)]
struct ChunkInfo {
    /// Ordered so that lease primaries are picked deterministically
    replicas: BTreeSet<ServerAddress>,
    lease: Option<Lease>,
    /// Not eligible for repair before this instant
    repair_after: Instant,
}

impl ChunkInfo {
    fn live_replica_count(&self, live: &HashSet<ServerAddress>) -> usize {
        self.replicas.iter().filter(|s| live.contains(*s)).count()
    }

    fn needs_repair(&self, live: &HashSet<ServerAddress>, target: usize, now: Instant) -> bool {
        self.live_replica_count(live) < target && self.repair_after <= now
    }

    /// Add `server` unless the set is already at `target`; `true` if it is now a replica
    fn admit(&mut self, server: &ServerAddress, target: usize) -> bool {
        if self.replicas.contains(server) {
            return true;
        }
        if self.replicas.len() >= target {
            return false;
        }
        self.replicas.insert(server.clone())
    }
}

pub struct ChunkManager {
    replicas: usize,
    lease_timeout: Duration,
    repair_grace: Duration,
    next_handle: AtomicU64,
    chunks: RwLock<HashMap<ChunkHandle, Arc<Mutex<ChunkInfo>>>>,
    /// path → handles in chunk-index order
    files: RwLock<HashMap<String, Vec<ChunkHandle>>>,
}

impl ChunkManager {
    pub fn new(replicas: usize, lease_timeout: Duration, repair_grace: Duration) -> Self {
        Self {
            replicas,
            lease_timeout,
            repair_grace,
            next_handle: AtomicU64::new(1),
            chunks: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
        }
    }

    pub fn replication_target(&self) -> usize {
        self.replicas
    }

    fn entry(&self, handle: ChunkHandle) -> Result<Arc<Mutex<ChunkInfo>>> {
        self.chunks
            .read()
            .unwrap()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chunk {}", handle)))
    }

    /// Allocate a new handle as the next chunk of `path`.
    ///
    /// The replica set starts empty; replicas are registered once the chosen
    /// servers have actually created the chunk.
    pub fn create_chunk(
        &self,
        path: &str,
        servers: Vec<ServerAddress>,
    ) -> Result<(ChunkHandle, Vec<ServerAddress>)> {
        if servers.len() < self.replicas {
            return Err(Error::NoAvailableServers {
                needed: self.replicas,
                available: servers.len(),
            });
        }

        let handle = ChunkHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let info = ChunkInfo {
            replicas: BTreeSet::new(),
            lease: None,
            repair_after: Instant::now() + self.repair_grace,
        };
        self.chunks
            .write()
            .unwrap()
            .insert(handle, Arc::new(Mutex::new(info)));
        self.files
            .write()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(handle);

        tracing::debug!(%handle, path, "allocated chunk");
        Ok((handle, servers))
    }

    /// Forget a freshly allocated chunk that no server managed to create
    pub fn discard_chunk(&self, path: &str, handle: ChunkHandle) {
        self.chunks.write().unwrap().remove(&handle);
        let mut files = self.files.write().unwrap();
        if let Some(handles) = files.get_mut(path) {
            handles.retain(|h| *h != handle);
            if handles.is_empty() {
                files.remove(path);
            }
        }
    }

    pub fn get_chunk(&self, path: &str, index: u64) -> Result<ChunkHandle> {
        let files = self.files.read().unwrap();
        let handles = files
            .get(path)
            .ok_or_else(|| Error::NotFound(format!("no chunks for {}", path)))?;
        usize::try_from(index)
            .ok()
            .and_then(|i| handles.get(i))
            .copied()
            .ok_or_else(|| Error::NotFound(format!("chunk {} of {}", index, path)))
    }

    /// Drop every chunk record of a deleted file
    pub fn remove_file(&self, path: &str) -> Vec<ChunkHandle> {
        let handles = self.files.write().unwrap().remove(path).unwrap_or_default();
        let mut chunks = self.chunks.write().unwrap();
        for handle in &handles {
            chunks.remove(handle);
        }
        handles
    }

    pub fn contains(&self, handle: ChunkHandle) -> bool {
        self.chunks.read().unwrap().contains_key(&handle)
    }

    /// Record `server` as holding `handle`.
    ///
    /// A replica set never grows past the replication target: a copy reported by a server
    /// once the set is full is refused and `Ok(false)` is returned.
    pub async fn register_replica(&self, handle: ChunkHandle, server: &ServerAddress) -> Result<bool> {
        let chunk = self.entry(handle)?;
        let mut info = chunk.lock().await;
        let known = info.replicas.contains(server);
        let accepted = info.admit(server, self.replicas);
        if accepted && !known {
            tracing::debug!(%handle, %server, "registered replica");
        }
        Ok(accepted)
    }

    pub async fn get_replicas(&self, handle: ChunkHandle) -> Result<Vec<ServerAddress>> {
        let chunk = self.entry(handle)?;
        let info = chunk.lock().await;
        Ok(info.replicas.iter().cloned().collect())
    }

    /// Return the current lease, granting a fresh one if none is in force.
    ///
    /// The primary is the smallest live replica address; the other live
    /// replicas become secondaries.
    pub async fn get_lease_holder(
        &self,
        handle: ChunkHandle,
        live: &HashSet<ServerAddress>,
    ) -> Result<Lease> {
        let chunk = self.entry(handle)?;
        let mut info = chunk.lock().await;
        let now = Instant::now();

        if let Some(lease) = info.lease.as_ref().filter(|l| !l.is_expired(now)) {
            return Ok(lease.clone());
        }

        let mut candidates = info.replicas.iter().filter(|s| live.contains(*s)).cloned();
        let primary = candidates.next().ok_or(Error::NoAvailableServers {
            needed: 1,
            available: 0,
        })?;
        let lease = Lease {
            primary,
            secondaries: candidates.collect(),
            expire: now + self.lease_timeout,
        };
        info.lease = Some(lease.clone());

        METRICS.leases_granted.inc();
        tracing::info!(%handle, primary = %lease.primary, "granted lease");
        Ok(lease)
    }

    /// Extend the lease if `server` is the primary of a lease still in force.
    ///
    /// Returns the new expiry, or `None` when nothing was extended.
    pub async fn extend_lease(
        &self,
        handle: ChunkHandle,
        server: &ServerAddress,
    ) -> Result<Option<Instant>> {
        let chunk = self.entry(handle)?;
        let mut info = chunk.lock().await;
        let now = Instant::now();

        match info.lease.as_mut() {
            Some(lease) if lease.primary == *server && !lease.is_expired(now) => {
                lease.expire = lease.expire.max(now + self.lease_timeout);
                METRICS.leases_extended.inc();
                Ok(Some(lease.expire))
            }
            _ => Ok(None),
        }
    }

    /// Remove `server` from the replica set of every handle.
    ///
    /// Unknown handles do not stop the scrub; they are reported once all
    /// known handles have been processed.
    pub async fn remove_chunks(&self, handles: &[ChunkHandle], server: &ServerAddress) -> Result<()> {
        let mut missing = Vec::new();
        for &handle in handles {
            let chunk = match self.entry(handle) {
                Ok(chunk) => chunk,
                Err(_) => {
                    missing.push(handle);
                    continue;
                }
            };
            let mut info = chunk.lock().await;
            if info.replicas.remove(server) && info.replicas.len() < self.replicas {
                info.repair_after = Instant::now() + self.repair_grace;
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "chunks {:?} held by {} are not registered",
                missing, server
            )))
        }
    }

    /// Handles with fewer live replicas than the target whose grace period is over
    pub async fn get_needlist(&self, live: &HashSet<ServerAddress>) -> Vec<ChunkHandle> {
        let entries: Vec<(ChunkHandle, Arc<Mutex<ChunkInfo>>)> = self
            .chunks
            .read()
            .unwrap()
            .iter()
            .map(|(handle, chunk)| (*handle, chunk.clone()))
            .collect();

        let now = Instant::now();
        let mut needed = Vec::new();
        for (handle, chunk) in entries {
            if chunk.lock().await.needs_repair(live, self.replicas, now) {
                needed.push(handle);
            }
        }
        needed
    }

    /// Like [`get_needlist`](Self::get_needlist) but never waits: chunks locked by an
    /// operation in progress (typically a repair) are left out.
    pub fn peek_needlist(&self, live: &HashSet<ServerAddress>) -> Vec<ChunkHandle> {
        let now = Instant::now();
        let chunks = self.chunks.read().unwrap();
        let mut needed: Vec<ChunkHandle> = chunks
            .iter()
            .filter(|(_, chunk)| {
                chunk
                    .try_lock()
                    .map(|info| info.needs_repair(live, self.replicas, now))
                    .unwrap_or(false)
            })
            .map(|(handle, _)| *handle)
            .collect();
        needed.sort();
        needed
    }

    /// Take the chunk's lock for a multi-step operation such as re-replication.
    ///
    /// Lease grants on the chunk wait until the guard is dropped.
    pub async fn lock_chunk(&self, handle: ChunkHandle) -> Result<ChunkGuard> {
        let chunk = self.entry(handle)?;
        Ok(ChunkGuard {
            handle,
            replicas_target: self.replicas,
            info: chunk.lock_owned().await,
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().unwrap().len()
    }
}

/// Scoped exclusive access to one chunk; released on drop on every path
pub struct ChunkGuard {
    handle: ChunkHandle,
    replicas_target: usize,
    info: OwnedMutexGuard<ChunkInfo>,
}

impl ChunkGuard {
    pub fn handle(&self) -> ChunkHandle {
        self.handle
    }

    pub fn replicas(&self) -> Vec<ServerAddress> {
        self.info.replicas.iter().cloned().collect()
    }

    pub fn is_repair_eligible(&self, now: Instant) -> bool {
        self.info.repair_after <= now
    }

    /// Fewer live replicas than the target, and room in the set for another one.
    ///
    /// A full set with dead members waits for the dead-server sweep to scrub them.
    pub fn needs_repair(&self, live: &HashSet<ServerAddress>) -> bool {
        self.info.live_replica_count(live) < self.replicas_target
            && self.info.replicas.len() < self.replicas_target
    }

    pub fn register_replica(&mut self, server: &ServerAddress) -> bool {
        self.info.admit(server, self.replicas_target)
    }
}
