//! Crash Detection Library
//!
//! Polls a digital crash input on a dedicated thread and reports each
//! LOW to HIGH transition exactly once. After firing, the detector stays
//! suspended until it is explicitly rearmed, so a crash that is still being
//! handled can never be reported twice.

pub mod detector;
pub mod trigger;

pub use detector::{CrashDetector, CrashListener, DetectorConfig, DetectorHandle, DetectorState};
pub use trigger::{Level, ManualTrigger, ScriptedTrigger, SysfsGpio, TriggerInput};

use thiserror::Error;

/// Trigger input error types
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("GPIO {pin} unavailable: {reason}")]
    Unavailable { pin: u32, reason: String },

    #[error("Unexpected input value: {0:?}")]
    InvalidLevel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detector error types
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Detector has been stopped")]
    Stopped,

    #[error("Failed to spawn detector thread: {0}")]
    Spawn(String),
}
