//! Identifiers and RPC messages shared by the master, its clients and chunkservers
//!
//! The master's protocol surface is the closed set of [`MasterRequest`] variants.
//! Every request is a JSON object `{"method": "...", "params": {...}}` posted to `/rpc`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Globally unique chunk identifier, issued by the master in increasing order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkHandle(pub u64);

impl std::fmt::Display for ChunkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network address of a chunkserver (`host:port`)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerAddress(pub String);

impl ServerAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// === Master RPC ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum MasterRequest {
    Heartbeat(HeartbeatArgs),
    GetPrimaryAndSecondaries { handle: ChunkHandle },
    ExtendLease { handle: ChunkHandle, address: ServerAddress },
    GetReplicas { handle: ChunkHandle },
    CreateFile { path: String },
    Mkdir { path: String },
    List { path: String },
    Delete { path: String },
    GetFileInfo { path: String },
    GetChunkHandle { path: String, index: u64 },
}

impl MasterRequest {
    /// Method name, used for logging and per-method metrics
    pub fn method(&self) -> &'static str {
        match self {
            MasterRequest::Heartbeat(_) => "Heartbeat",
            MasterRequest::GetPrimaryAndSecondaries { .. } => "GetPrimaryAndSecondaries",
            MasterRequest::ExtendLease { .. } => "ExtendLease",
            MasterRequest::GetReplicas { .. } => "GetReplicas",
            MasterRequest::CreateFile { .. } => "CreateFile",
            MasterRequest::Mkdir { .. } => "Mkdir",
            MasterRequest::List { .. } => "List",
            MasterRequest::Delete { .. } => "Delete",
            MasterRequest::GetFileInfo { .. } => "GetFileInfo",
            MasterRequest::GetChunkHandle { .. } => "GetChunkHandle",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "result")]
pub enum MasterResponse {
    Heartbeat,
    GetPrimaryAndSecondaries(LeaseInfo),
    ExtendLease { expire: Option<DateTime<Utc>> },
    GetReplicas { locations: Vec<ServerAddress> },
    CreateFile,
    Mkdir,
    List { entries: Vec<PathEntry> },
    Delete,
    GetFileInfo(FileInfo),
    GetChunkHandle { handle: ChunkHandle },
}

/// Periodic report from a chunkserver
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatArgs {
    pub address: ServerAddress,
    /// Chunks the server currently stores
    #[serde(default)]
    pub chunks: Vec<ChunkHandle>,
    /// Chunks whose lease the server (as primary) wants extended
    #[serde(default)]
    pub lease_extensions: Vec<ChunkHandle>,
}

/// Lease holder of a chunk as seen by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseInfo {
    pub primary: ServerAddress,
    pub secondaries: Vec<ServerAddress>,
    pub expire: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub is_dir: bool,
    pub length: u64,
    pub chunks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub name: String,
    pub is_dir: bool,
    pub length: u64,
    pub chunks: u64,
}

// === Chunkserver RPC (issued by the master) ===

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum ChunkServerRequest {
    /// Materialize an empty chunk
    CreateChunk { handle: ChunkHandle },
    /// Push a full copy of a chunk to another chunkserver
    SendCopy {
        handle: ChunkHandle,
        destination: ServerAddress,
    },
}
