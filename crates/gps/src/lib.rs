//! GPS Location Service
//!
//! Tracks the last known vehicle position from `$GPGGA` sentences read off a
//! serial GPS receiver. Until the first fix the fallback coordinate is reported.

pub mod location;
pub mod nmea;
pub mod service;

pub use location::{FixedLocation, LastKnownLocation, Location, LocationProvider};
pub use nmea::parse_gpgga;
pub use service::{GpsConfig, GpsService};

use thiserror::Error;

/// GPS error types
#[derive(Error, Debug)]
pub enum GpsError {
    #[error("Failed to open GPS port {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Malformed NMEA sentence: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
