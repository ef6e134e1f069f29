//! Accident Sentinel - Main Entry Point

use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sentinel::{init_logging, init_metrics, AppConfig, System};
use tracing::info;
use vehicle::{ensure_provisioned, VehicleStore};

#[derive(Debug, Parser)]
#[command(name = "accident-sentinel", version, about = "Crash-triggered accident recorder")]
struct Cli {
    /// Configuration file (TOML); missing files are ignored
    #[arg(long, env = "SENTINEL_CONFIG", default_value = "sentinel.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("invalid configuration in {}", cli.config.display()))?;

    init_logging(&config.logging)?;
    if let Some(listen) = &config.metrics.listen {
        init_metrics(listen)?;
    }

    info!("=== Accident Sentinel v{} ===", env!("CARGO_PKG_VERSION"));

    let store = VehicleStore::new(&config.storage.vehicle_file);
    let vehicle = tokio::task::spawn_blocking(move || {
        let stdin = io::stdin();
        ensure_provisioned(&store, &mut stdin.lock(), &mut io::stdout())
    })
    .await?
    .context("vehicle identity could not be provisioned")?;

    let system = System::bring_up(&config, vehicle)?;
    if system.is_degraded() {
        info!("Running in degraded mode");
    }
    info!("Accident sentinel running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tokio::task::spawn_blocking(move || system.shutdown()).await?;
    Ok(())
}
