//! Common utilities and types shared across the master, its clients and tools

pub mod config;
pub mod error;
pub mod metrics;
pub mod tracing_middleware;
pub mod types;
pub mod utils;

pub use config::MasterConfig;
pub use error::{Error, ErrorBody, ErrorCode, Result};
pub use metrics::METRICS;
pub use types::{
    ChunkHandle, ChunkServerRequest, FileInfo, HeartbeatArgs, LeaseInfo, MasterRequest,
    MasterResponse, PathEntry, ServerAddress,
};
pub use utils::{instant_to_utc, retry_with_backoff, split_path};
