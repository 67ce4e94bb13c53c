//! TuneMesh peer binary
//!
//! Starts a peer, optionally joins an overlay and publishes track files,
//! then runs until interrupted. The runtime is sized from the loaded
//! configuration, so it is built after argument and config parsing.

use clap::Parser;
use std::path::PathBuf;
use tunemesh::config::Config;
use tunemesh::peer::Peer;
use tunemesh::Result;
use url::Url;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "tunemesh=debug"
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    /// Overlay endpoint to publish, e.g. udp://localhost:8001/kademlia
    #[arg(long)]
    endpoint: Option<Url>,

    /// Peer to join the overlay through
    #[arg(long)]
    bootstrap: Option<Url>,

    /// Track files to publish once the peer is up
    #[arg(long = "publish")]
    publish: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    use tracing_subscriber::{fmt, EnvFilter};
    fmt()
        .with_env_filter(EnvFilter::new(&args.verbosity))
        .init();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(endpoint) = args.endpoint {
        config.network.endpoint = endpoint;
    }
    if let Some(bootstrap) = args.bootstrap {
        config.network.bootstrap = Some(bootstrap);
    }
    config.validate()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.runtime.worker_threads)
        .enable_all()
        .build()?;
    runtime.block_on(run(config, args.publish))
}

async fn run(config: Config, publish: Vec<PathBuf>) -> Result<()> {
    let peer = Peer::start(config).await?;
    if peer.bootstrap().await {
        tracing::info!("joined the overlay");
    }
    for path in &publish {
        if let Err(e) = peer.store_file(path).await {
            tracing::warn!("could not publish {}: {}", path.display(), e);
        }
    }

    let stats = peer.stats().await;
    tracing::info!(
        "node {} up with {} contacts and {} stored tracks",
        stats.node_id,
        stats.contacts,
        stats.stored_resources
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    peer.shutdown().await?;
    Ok(())
}
