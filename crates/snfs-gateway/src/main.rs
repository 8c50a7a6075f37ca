#![warn(missing_docs)]

//! snfsd: hosts an SNFS instance and reaps idle sessions until interrupted

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use snfs_gateway::{Snfs, SnfsConfig};

#[derive(Parser)]
#[command(name = "snfsd", about = "SNFS multi-tenant file storage daemon")]
struct Cli {
    /// Config file (.toml or .json); defaults apply when omitted
    #[arg(short, long, env = "SNFS_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the config and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => SnfsConfig::from_file(path)?,
        None => SnfsConfig::default(),
    };
    config.validate()?;

    if cli.check {
        tracing::info!(?config, "configuration ok");
        return Ok(());
    }

    if config.bootstrap_admin.is_none() {
        tracing::warn!("no bootstrap_admin configured; nobody will be able to log in");
    }

    let snfs = Snfs::new(config)?;
    tracing::info!(
        chunk_size = snfs.config().chunk_size,
        idle_timeout_secs = snfs.config().session_idle_timeout_secs,
        "snfsd started"
    );

    let mut reap = tokio::time::interval(Duration::from_secs(snfs.config().reap_interval_secs));
    loop {
        tokio::select! {
            _ = reap.tick() => {
                snfs.reap_idle_sessions();
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                break;
            }
        }
    }

    tracing::info!(sessions = snfs.session_count(), "snfsd shutting down");
    Ok(())
}
