//! Replica node binary

use clap::{Parser, Subcommand};
use replikv::common::{Config, PeerConfig};
use replikv::NodeServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replikv-node")]
#[command(about = "replikv replica node with quorum coordinator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a replica node
    Serve {
        /// Node ID (overrides the config file)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Peers as id=url (comma-separated)
        #[arg(long, value_delimiter = ',')]
        peers: Vec<PeerConfig>,

        /// TOML config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            id,
            bind,
            peers,
            config,
        } => {
            // Load config from file, then override with CLI arguments
            let mut config = match (&config, &id) {
                (None, Some(id)) => Config::new(id.clone()),
                (path, _) => Config::load(path.as_deref())?,
            };
            if let Some(id) = id {
                config.node_id = id;
            }
            if let Some(bind) = bind {
                config.bind_addr = bind;
            }
            if !peers.is_empty() {
                config.peers = peers;
            }
            config.validate()?;

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.clone().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            NodeServer::new(config)?.serve().await?;
        }
    }

    Ok(())
}
