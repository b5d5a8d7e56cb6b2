//! Royale relay server.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use royale_relay::{RelayConfig, RelayServer};

/// Command-line arguments for the relay.
#[derive(Parser, Debug)]
#[command(name = "royale-relay")]
#[command(about = "Match relay for the tower battle")]
struct Args {
    /// RON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the config file.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> royale_relay::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RelayConfig::load(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    tracing::info!(bind = %config.bind, "Starting royale relay");
    let server = RelayServer::bind(config).await?;
    server.run().await
}
