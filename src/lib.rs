//! # gfs-master
//!
//! Metadata master of a GFS-style chunked file store:
//! - Files map to ordered sequences of chunks, appended strictly in order
//! - One time-bounded write lease per chunk, granted to a live replica
//! - Chunkserver liveness from heartbeats, least-loaded placement
//! - Background sweep of dead chunkservers and re-replication of lost copies
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!            clients                     chunkservers
//!               │  POST /rpc                │ Heartbeat
//! ┌─────────────▼───────────────────────────▼──────┐
//! │                    Master                      │
//! │  Namespace │ ChunkManager │ ChunkServerManager │
//! │        (per-dir, per-chunk, per-server locks)  │
//! │  background: dead sweep ▸ needlist ▸ repair    │
//! └────────────────────────┬───────────────────────┘
//!                          │ CreateChunk / SendCopy
//!              ┌───────────┴──────────┬──────────────┐
//!          ┌───▼─────┐          ┌─────▼───┐     ┌────▼────┐
//!          │ cs-1    │          │ cs-2    │     │ cs-3    │
//!          └─────────┘          └─────────┘     └─────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start the master
//! ```bash
//! gfs-master serve --bind 0.0.0.0:7000 --replicas 3
//! ```
//!
//! ### Use the CLI
//! ```bash
//! gfs mkdir /logs
//! gfs create /logs/app
//! gfs chunk /logs/app 0
//! gfs lease 1
//! gfs status
//! ```

pub mod client;
pub mod common;
pub mod master;

// Re-export commonly used types
pub use client::MasterClient;
pub use common::{Error, MasterConfig, Result};
pub use master::{Coordinator, MasterServer};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
