//! Logging and metrics set-up

use std::net::SocketAddr;
use std::str::FromStr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::LoggingSection;
use crate::SystemError;

/// Install the global tracing subscriber
pub fn init_logging(config: &LoggingSection) -> Result<(), SystemError> {
    let level = Level::from_str(&config.level)
        .map_err(|_| SystemError::Configuration(format!("unknown log level {:?}", config.level)))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };

    installed.map_err(|e| SystemError::Logging(e.to_string()))
}

/// Serve Prometheus metrics on `listen`; must run inside a tokio runtime
pub fn init_metrics(listen: &str) -> Result<(), SystemError> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|_| SystemError::Configuration(format!("invalid metrics address {:?}", listen)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| SystemError::Metrics(e.to_string()))?;

    info!("Prometheus metrics on http://{}/metrics", addr);
    Ok(())
}
