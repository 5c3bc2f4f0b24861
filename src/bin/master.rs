//! Master binary

use clap::{Parser, Subcommand};
use gfs_master::{MasterConfig, MasterServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "gfs-master")]
#[command(about = "Metadata master for a GFS-style chunked file store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the master server
    Serve {
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address for the RPC listener
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Replication factor
        #[arg(long)]
        replicas: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            replicas,
        } => {
            // File and GFS_* environment first, then CLI flags
            let mut config = MasterConfig::load(config.as_deref())?;
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if let Some(replicas) = replicas {
                config.replicas = replicas;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            MasterServer::new(config).serve().await?;
        }
    }

    Ok(())
}
