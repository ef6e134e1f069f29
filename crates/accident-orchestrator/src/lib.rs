//! Accident Orchestration
//!
//! Runs on the crash detector's thread for every detected crash:
//! 1. Freezes capture and takes the window preceding the crash
//! 2. Lets capture run for one more window and takes it too
//! 3. Saves both as one video and builds the accident record
//! 4. Hands the record to the reporter and rearms the detector

pub mod capability;
pub mod orchestrator;

pub use capability::{Capability, Health};
pub use orchestrator::{AccidentOrchestrator, AccidentSummary, OrchestratorConfig, ReportSink};

use camera_capture::CaptureError;
use thiserror::Error;

/// Accident handling error types
#[derive(Error, Debug)]
pub enum AccidentError {
    #[error("Camera unavailable: {0}")]
    CameraAbsent(String),

    #[error("Camera did not start streaming within {0:?}")]
    CameraNotInitialized(std::time::Duration),

    #[error(transparent)]
    Capture(#[from] CaptureError),
}
