//! Accident Sentinel
//!
//! Application crate for the accident sensing unit: configuration, logging,
//! metrics, hardware bring-up with graceful degradation, and shutdown.

pub mod config;
pub mod logging;
pub mod system;

pub use crate::config::{AppConfig, TriggerBackend, VideoFormat};
pub use logging::{init_logging, init_metrics};
pub use system::System;

use thiserror::Error;

/// System error types
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Metrics exporter failed: {0}")]
    Metrics(String),

    #[error(transparent)]
    Vehicle(#[from] vehicle::VehicleError),

    #[error(transparent)]
    Detector(#[from] crash_detector::DetectorError),

    #[error("Notification channel: {0}")]
    Notifier(#[from] accident_reporter::BackendError),
}
