//! Chunkserver registry: liveness from heartbeats, and placement decisions
//!
//! Each server record has its own lock so heartbeats from different servers do not
//! serialize; the registry map is write-locked only to add or remove a server.

use crate::common::{ChunkHandle, Error, Result, ServerAddress};
use rand::seq::SliceRandom;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct ServerInfo {
    last_heartbeat: Instant,
    chunks: HashSet<ChunkHandle>,
    /// Already returned by `detect_dead_servers`
    reported_dead: bool,
}

impl ServerInfo {
    fn is_live(&self, now: Instant, timeout: Duration) -> bool {
        !self.reported_dead && now.saturating_duration_since(self.last_heartbeat) <= timeout
    }
}

/// Point-in-time view of one chunkserver
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub address: ServerAddress,
    pub live: bool,
    pub chunks: usize,
    pub last_heartbeat_ms: u64,
}

pub struct ChunkServerManager {
    server_timeout: Duration,
    servers: RwLock<HashMap<ServerAddress, Arc<Mutex<ServerInfo>>>>,
}

impl ChunkServerManager {
    pub fn new(server_timeout: Duration) -> Self {
        Self {
            server_timeout,
            servers: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, addr: &ServerAddress) -> Option<Arc<Mutex<ServerInfo>>> {
        self.servers.read().unwrap().get(addr).cloned()
    }

    fn entries(&self) -> Vec<(ServerAddress, Arc<Mutex<ServerInfo>>)> {
        self.servers
            .read()
            .unwrap()
            .iter()
            .map(|(addr, info)| (addr.clone(), info.clone()))
            .collect()
    }

    /// Record a heartbeat, registering the server on first contact.
    ///
    /// Returns the reported handles this registry did not yet associate with the server.
    pub fn heartbeat(&self, addr: &ServerAddress, reported: &[ChunkHandle]) -> Vec<ChunkHandle> {
        let now = Instant::now();
        let server = match self.get(addr) {
            Some(server) => server,
            None => self
                .servers
                .write()
                .unwrap()
                .entry(addr.clone())
                .or_insert_with(|| {
                    tracing::info!(server = %addr, "registered chunkserver");
                    Arc::new(Mutex::new(ServerInfo {
                        last_heartbeat: now,
                        chunks: HashSet::new(),
                        reported_dead: false,
                    }))
                })
                .clone(),
        };

        let mut info = server.lock().unwrap();
        if info.reported_dead {
            tracing::info!(server = %addr, "chunkserver is back before removal");
        }
        info.last_heartbeat = now;
        info.reported_dead = false;

        let unknown: BTreeSet<ChunkHandle> = reported
            .iter()
            .filter(|h| !info.chunks.contains(h))
            .copied()
            .collect();
        unknown.into_iter().collect()
    }

    /// Servers whose last heartbeat is older than the timeout.
    ///
    /// A server is reported once per missed-liveness episode.
    pub fn detect_dead_servers(&self) -> Vec<ServerAddress> {
        let now = Instant::now();
        let mut dead = Vec::new();
        for (addr, server) in self.entries() {
            let mut info = server.lock().unwrap();
            if !info.reported_dead
                && now.saturating_duration_since(info.last_heartbeat) > self.server_timeout
            {
                info.reported_dead = true;
                dead.push(addr);
            }
        }
        dead.sort();
        dead
    }

    /// Deregister a server, returning every chunk it was known to hold
    pub fn remove_server(&self, addr: &ServerAddress) -> Result<Vec<ChunkHandle>> {
        let server = self
            .servers
            .write()
            .unwrap()
            .remove(addr)
            .ok_or_else(|| Error::NotFound(format!("chunkserver {}", addr)))?;
        let info = server.lock().unwrap();
        let mut handles: Vec<ChunkHandle> = info.chunks.iter().copied().collect();
        handles.sort();
        Ok(handles)
    }

    pub fn live_servers(&self) -> HashSet<ServerAddress> {
        let now = Instant::now();
        self.entries()
            .into_iter()
            .filter(|(_, server)| server.lock().unwrap().is_live(now, self.server_timeout))
            .map(|(addr, _)| addr)
            .collect()
    }

    /// Live servers with their chunk count, in random order
    fn live_loads(&self, exclude: Option<ChunkHandle>) -> (Vec<ServerAddress>, Vec<(ServerAddress, usize)>) {
        let now = Instant::now();
        let mut holders = Vec::new();
        let mut others = Vec::new();
        for (addr, server) in self.entries() {
            let info = server.lock().unwrap();
            if !info.is_live(now, self.server_timeout) {
                continue;
            }
            match exclude {
                Some(handle) if info.chunks.contains(&handle) => holders.push(addr),
                _ => others.push((addr, info.chunks.len())),
            }
        }
        let mut rng = rand::thread_rng();
        holders.shuffle(&mut rng);
        others.shuffle(&mut rng);
        (holders, others)
    }

    /// Pick `count` distinct live servers, least loaded first (random among equals)
    pub fn choose_servers(&self, count: usize) -> Result<Vec<ServerAddress>> {
        let (_, mut candidates) = self.live_loads(None);
        if candidates.len() < count {
            return Err(Error::NoAvailableServers {
                needed: count,
                available: candidates.len(),
            });
        }
        candidates.sort_by_key(|(_, load)| *load);
        Ok(candidates
            .into_iter()
            .take(count)
            .map(|(addr, _)| addr)
            .collect())
    }

    /// Pick a live holder of `handle` as copy source and the least loaded live
    /// non-holder as destination
    pub fn choose_re_replication(
        &self,
        handle: ChunkHandle,
    ) -> Result<(ServerAddress, ServerAddress)> {
        let (holders, mut others) = self.live_loads(Some(handle));
        let source = holders.into_iter().next().ok_or(Error::NoAvailableServers {
            needed: 1,
            available: 0,
        })?;
        others.sort_by_key(|(_, load)| *load);
        let destination = others
            .into_iter()
            .next()
            .map(|(addr, _)| addr)
            .ok_or(Error::NoAvailableServers {
                needed: 1,
                available: 0,
            })?;
        Ok((source, destination))
    }

    /// Record that each of `addrs` now holds `handle`
    pub fn add_chunk(&self, addrs: &[ServerAddress], handle: ChunkHandle) {
        for addr in addrs {
            match self.get(addr) {
                Some(server) => {
                    server.lock().unwrap().chunks.insert(handle);
                }
                None => tracing::debug!(server = %addr, %handle, "add_chunk for unknown server"),
            }
        }
    }

    /// Forget `handles` on every server, e.g. once their file is deleted
    pub fn remove_chunks(&self, handles: &[ChunkHandle]) {
        for (_, server) in self.entries() {
            let mut info = server.lock().unwrap();
            for handle in handles {
                info.chunks.remove(handle);
            }
        }
    }

    pub fn server_count(&self) -> usize {
        self.servers.read().unwrap().len()
    }

    pub fn snapshot(&self) -> Vec<ServerStatus> {
        let now = Instant::now();
        let mut out: Vec<ServerStatus> = self
            .entries()
            .into_iter()
            .map(|(address, server)| {
                let info = server.lock().unwrap();
                ServerStatus {
                    address,
                    live: info.is_live(now, self.server_timeout),
                    chunks: info.chunks.len(),
                    last_heartbeat_ms: now.saturating_duration_since(info.last_heartbeat).as_millis()
                        as u64,
                }
            })
            .collect();
        out.sort_by(|a, b| a.address.cmp(&b.address));
        out
    }
}
