//! Configuration for the master

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix (`GFS_REPLICAS=2`, `GFS_LEASE_TIMEOUT_MS=5000`, ...)
pub const ENV_PREFIX: &str = "GFS";

/// Master configuration
///
/// All values are fixed for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Bind address for the RPC listener
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Target replication factor
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Heartbeat period expected from chunkservers
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// A chunkserver silent for longer than this is dead
    #[serde(default = "default_server_timeout")]
    pub server_timeout_ms: u64,

    /// Maintenance cycle period
    #[serde(default = "default_background_interval")]
    pub background_interval_ms: u64,

    /// Lease duration
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_ms: u64,

    /// Grace period before a chunk that lost a replica is eligible for repair
    #[serde(default = "default_repair_grace")]
    pub repair_grace_ms: u64,

    /// Timeout of a single call to a chunkserver
    #[serde(default = "default_downstream_timeout")]
    pub downstream_timeout_ms: u64,

    /// Attempts per chunkserver call
    #[serde(default = "default_downstream_retries")]
    pub downstream_retries: usize,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7000))
}
fn default_replicas() -> usize {
    3
}
fn default_heartbeat_interval() -> u64 {
    100
}
fn default_server_timeout() -> u64 {
    1_000
}
fn default_background_interval() -> u64 {
    200
}
fn default_lease_timeout() -> u64 {
    2_000
}
fn default_repair_grace() -> u64 {
    1_000
}
fn default_downstream_timeout() -> u64 {
    2_000
}
fn default_downstream_retries() -> usize {
    3
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            replicas: default_replicas(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            server_timeout_ms: default_server_timeout(),
            background_interval_ms: default_background_interval(),
            lease_timeout_ms: default_lease_timeout(),
            repair_grace_ms: default_repair_grace(),
            downstream_timeout_ms: default_downstream_timeout(),
            downstream_retries: default_downstream_retries(),
            log_level: default_log_level(),
        }
    }
}

impl MasterConfig {
    /// Load defaults, then the optional TOML file, then `GFS_*` environment variables.
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let config: Self = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error::InvalidConfig;

        if self.replicas == 0 {
            return Err(InvalidConfig("replicas must be at least 1".into()));
        }
        if self.heartbeat_interval_ms == 0
            || self.background_interval_ms == 0
            || self.lease_timeout_ms == 0
            || self.downstream_timeout_ms == 0
        {
            return Err(InvalidConfig("intervals must be non-zero".into()));
        }
        if self.server_timeout_ms <= self.heartbeat_interval_ms {
            return Err(InvalidConfig(format!(
                "server_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.server_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        if self.downstream_retries == 0 {
            return Err(InvalidConfig("downstream_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }

    pub fn lease_timeout(&self) -> Duration {
        Duration::from_millis(self.lease_timeout_ms)
    }

    pub fn repair_grace(&self) -> Duration {
        Duration::from_millis(self.repair_grace_ms)
    }

    pub fn downstream_timeout(&self) -> Duration {
        Duration::from_millis(self.downstream_timeout_ms)
    }
}
