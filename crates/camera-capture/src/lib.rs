//! Camera Capture Library for Accident Recording
//!
//! Keeps the most recent video window in memory so that a crash can be
//! recorded from a few seconds before the impact. Supports:
//! - Continuous capture on a dedicated thread into a rolling buffer
//! - Synchronous suspend/resume with an acknowledgement handshake
//! - Snapshot-and-clear of the live window while capture is frozen
//! - Persisting a window to `captures/<timestamp>.<ext>`, MP4 through ffmpeg
//!   or raw Motion-JPEG
//!
//! The `v4l2` feature adds a Video4Linux2 backend for `/dev/videoN` nodes.

pub mod driver;
pub mod encoder;
pub mod engine;
pub mod frame;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use driver::{open_driver, CameraDriver, SyntheticCamera};
pub use encoder::{EncodeError, FfmpegMp4Encoder, MjpegEncoder, VideoEncoder};
#[cfg(feature = "v4l2")]
pub use v4l2::V4l2Camera;
pub use engine::{CaptureEngine, CaptureMode, FrameBuffer};
pub use frame::{SharedFrame, VideoFrame};

use std::time::Duration;
use thiserror::Error;

/// Camera driver error types
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    Open(String),

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Camera not initialized")]
    NotInitialized,
}

/// Capture engine error types
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Camera hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Failed to save capture: {0}")]
    CaptureFailure(String),

    #[error("Snapshot requested while capture is not suspended")]
    ConcurrencyViolation,

    #[error("Capture thread did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Capture thread is not running")]
    NotRunning,

    #[error("Capture engine has been stopped")]
    Stopped,

    #[error("Invalid capture configuration: {0}")]
    Config(String),
}

/// Camera configuration
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Device path (e.g., "/dev/video0", or "stub://" for the synthetic camera)
    pub device: String,
    /// Capture width
    pub width: u32,
    /// Capture height
    pub height: u32,
    /// Target FPS
    pub fps: u32,
    /// Length of each rolling window (seconds)
    pub window_seconds: u32,
    /// Flip frames vertically (camera mounted upside down)
    pub vflip: bool,
    /// How long the capture thread waits on the driver for one frame
    pub frame_timeout: Duration,
    /// Upper bound on the suspend and drain handshakes
    pub handshake_timeout: Duration,
    /// Upper bound on waiting for a full window
    pub fill_timeout: Duration,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            fps: 30,
            window_seconds: 5,
            vflip: true,
            frame_timeout: Duration::from_millis(200),
            handshake_timeout: Duration::from_secs(2),
            fill_timeout: Duration::from_secs(15),
        }
    }
}

impl CameraConfig {
    /// Bench config backed by the synthetic camera
    pub fn synthetic() -> Self {
        Self {
            device: "stub://bench".to_string(),
            vflip: false,
            ..Default::default()
        }
    }

    /// Number of frames in one window (framerate x window length)
    pub fn capacity(&self) -> usize {
        self.fps as usize * self.window_seconds as usize
    }
}
