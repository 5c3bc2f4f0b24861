//! Master node: namespace, chunk and chunkserver registries, RPC surface, maintenance

pub mod background;
pub mod chunk_manager;
pub mod chunkserver_client;
pub mod coordinator;
pub mod http;
pub mod namespace;
pub mod server;
pub mod server_manager;

pub use background::{spawn_background, CycleReport};
pub use chunk_manager::{ChunkGuard, ChunkManager, Lease};
pub use chunkserver_client::{ChunkServerClient, HttpChunkServerClient};
pub use coordinator::Coordinator;
pub use http::create_router;
pub use namespace::{FileGuard, NamespaceManager};
pub use server::MasterServer;
pub use server_manager::{ChunkServerManager, ServerStatus};
