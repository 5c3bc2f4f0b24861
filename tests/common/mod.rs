//! In-memory chunkservers for driving the master in tests

#![allow(dead_code)]

use gfs_master::common::{ChunkHandle, Error, HeartbeatArgs, Result, ServerAddress};
use gfs_master::master::ChunkServerClient;
use gfs_master::Coordinator;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    down: HashSet<ServerAddress>,
    created: Vec<(ServerAddress, ChunkHandle)>,
    copies: Vec<(ServerAddress, ChunkHandle, ServerAddress)>,
}

/// Records every call; servers marked down refuse them
#[derive(Clone, Default)]
pub struct FakeChunkServers {
    state: Arc<Mutex<State>>,
}

impl FakeChunkServers {
    pub fn set_down(&self, servers: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.down = servers.iter().map(|s| ServerAddress::from(*s)).collect();
    }

    pub fn created(&self) -> Vec<(ServerAddress, ChunkHandle)> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn copies(&self) -> Vec<(ServerAddress, ChunkHandle, ServerAddress)> {
        self.state.lock().unwrap().copies.clone()
    }

    fn check(&self, server: &ServerAddress) -> Result<()> {
        if self.state.lock().unwrap().down.contains(server) {
            return Err(Error::downstream(server, "connection refused"));
        }
        Ok(())
    }
}

impl ChunkServerClient for FakeChunkServers {
    async fn create_chunk(&self, server: &ServerAddress, handle: ChunkHandle) -> Result<()> {
        self.check(server)?;
        self.state
            .lock()
            .unwrap()
            .created
            .push((server.clone(), handle));
        Ok(())
    }

    async fn send_copy(
        &self,
        source: &ServerAddress,
        handle: ChunkHandle,
        destination: &ServerAddress,
    ) -> Result<()> {
        self.check(source)?;
        self.check(destination)?;
        self.state
            .lock()
            .unwrap()
            .copies
            .push((source.clone(), handle, destination.clone()));
        Ok(())
    }
}

pub fn addr(s: &str) -> ServerAddress {
    ServerAddress::from(s)
}

pub fn addrs(servers: &[&str]) -> Vec<ServerAddress> {
    servers.iter().map(|s| addr(s)).collect()
}

/// Heartbeat from each server, reporting no chunks
pub async fn beat(coordinator: &Coordinator<FakeChunkServers>, servers: &[&str]) {
    for s in servers {
        coordinator
            .heartbeat(HeartbeatArgs {
                address: addr(s),
                ..Default::default()
            })
            .await;
    }
}
