//! CLI for the master

use clap::{Parser, Subcommand};
use gfs_master::common::{ChunkHandle, ServerAddress};
use gfs_master::MasterClient;

#[derive(Parser)]
#[command(name = "gfs")]
#[command(about = "gfs chunked file store CLI")]
#[command(version)]
struct Cli {
    /// Master address
    #[arg(long, default_value = "http://localhost:7000")]
    master: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a directory
    Mkdir {
        path: String,
    },

    /// Create an empty file
    Create {
        path: String,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Delete a file or an empty directory
    Rm {
        path: String,
    },

    /// Show file or directory information
    Stat {
        path: String,
    },

    /// Resolve (or append) the chunk at an index of a file
    Chunk {
        path: String,

        /// Chunk index
        index: u64,
    },

    /// Show (granting if needed) the lease holder of a chunk
    Lease {
        handle: u64,
    },

    /// Extend a chunk's lease on behalf of its primary
    Extend {
        handle: u64,

        /// Address of the primary
        #[arg(long)]
        primary: String,
    },

    /// List the replicas of a chunk
    Replicas {
        handle: u64,
    },

    /// Show cluster status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let client = MasterClient::new(&cli.master)?;

    match cli.command {
        Commands::Mkdir { path } => {
            client.mkdir(&path).await?;
            println!("✓ Created directory {}", path);
        }

        Commands::Create { path } => {
            client.create_file(&path).await?;
            println!("✓ Created {}", path);
        }

        Commands::Ls { path } => {
            for entry in client.list(&path).await? {
                if entry.is_dir {
                    println!("{}/", entry.name);
                } else {
                    println!("{}\t{} chunks\t{} bytes", entry.name, entry.chunks, entry.length);
                }
            }
        }

        Commands::Rm { path } => {
            client.delete(&path).await?;
            println!("✓ Deleted {}", path);
        }

        Commands::Stat { path } => {
            let info = client.get_file_info(&path).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Chunk { path, index } => {
            let handle = client.get_chunk_handle(&path, index).await?;
            println!("{}", handle);
        }

        Commands::Lease { handle } => {
            let lease = client.get_primary_and_secondaries(ChunkHandle(handle)).await?;
            println!("primary:     {}", lease.primary);
            let secondaries: Vec<&str> = lease.secondaries.iter().map(|s| s.as_str()).collect();
            println!("secondaries: {}", secondaries.join(", "));
            println!("expires:     {}", lease.expire.to_rfc3339());
        }

        Commands::Extend { handle, primary } => {
            match client
                .extend_lease(ChunkHandle(handle), ServerAddress::from(primary))
                .await?
            {
                Some(expire) => println!("✓ Lease extended until {}", expire.to_rfc3339()),
                None => println!("✗ Not extended (not the primary of a live lease)"),
            }
        }

        Commands::Replicas { handle } => {
            for server in client.get_replicas(ChunkHandle(handle)).await? {
                println!("{}", server);
            }
        }

        Commands::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
