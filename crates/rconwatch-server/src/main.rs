//! rconwatch binary.
//!
//! # Usage
//!
//! ```bash
//! # Record into a database file
//! rconwatch --servers servers.json --db rconwatch.redb
//!
//! # Throwaway run with in-memory storage and verbose logs
//! rconwatch --servers servers.json --log-level debug
//! ```

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use rconwatch_server::{MemoryStorage, RedbStorage, RuntimeConfig, Server, Storage, load_servers};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Hell Let Loose remote-console event recorder
#[derive(Parser, Debug)]
#[command(name = "rconwatch")]
#[command(about = "Records in-game events from Hell Let Loose servers over the remote console")]
#[command(version)]
struct Args {
    /// JSON file listing the servers to connect to
    #[arg(short, long)]
    servers: PathBuf,

    /// Database file; sessions are kept in memory when omitted
    #[arg(long)]
    db: Option<PathBuf>,

    /// Milliseconds between capture ticks
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,

    /// Milliseconds within which equivalent events are merged
    #[arg(long, default_value = "2000")]
    dedup_tolerance_ms: u64,

    /// Days to keep the event logs of finished sessions
    #[arg(long, default_value = "14")]
    retention_days: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let servers = load_servers(&args.servers)?;
    tracing::info!(servers = servers.len(), "rconwatch starting");

    let mut config = RuntimeConfig::default();
    config.poller.interval = Duration::from_millis(args.poll_interval_ms);
    config.derivation.dedup_tolerance = Duration::from_millis(args.dedup_tolerance_ms);
    config.session.retention = Duration::from_secs(args.retention_days.saturating_mul(86_400));

    match args.db {
        Some(path) => {
            tracing::info!(path = %path.display(), "using database storage");
            run(Server::new(servers, RedbStorage::open(&path)?, config)?).await
        },
        None => {
            tracing::warn!("no database given, sessions will be lost on exit");
            run(Server::new(servers, MemoryStorage::new(), config)?).await
        },
    }
}

async fn run<S: Storage>(server: Server<S>) -> Result<(), Box<dyn std::error::Error>> {
    let handle = server.handle();
    let runtime = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    handle.shutdown().await?;
    runtime.await?;
    Ok(())
}
