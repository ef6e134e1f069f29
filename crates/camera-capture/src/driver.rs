//! Camera driver seam
//!
//! Frame acquisition itself is delegated to a [`CameraDriver`]. The bundled
//! [`SyntheticCamera`] serves `stub://` devices on benches without a sensor;
//! device nodes are served by `V4l2Camera` when built with the `v4l2` feature.

use std::path::Path;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::{CameraConfig, CameraError, VideoFrame};

/// Device prefix selecting the synthetic camera
pub const SYNTHETIC_PREFIX: &str = "stub://";

/// Source of raw frames, driven from the capture thread
pub trait CameraDriver: Send {
    /// Apply resolution, framerate and orientation before streaming
    fn configure(&mut self, width: u32, height: u32, fps: u32, vflip: bool)
        -> Result<(), CameraError>;

    /// Start streaming
    fn start_streaming(&mut self) -> Result<(), CameraError>;

    /// Read next frame, waiting at most `timeout`; `None` when no frame arrived
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>, CameraError>;

    /// Stop streaming and release the device
    fn stop(&mut self);

    /// Human-readable driver name for logs
    fn name(&self) -> &str;
}

/// Open the driver for a configured device path
pub fn open_driver(config: &CameraConfig) -> Result<Box<dyn CameraDriver>, CameraError> {
    if config.device.starts_with(SYNTHETIC_PREFIX) {
        return Ok(Box::new(SyntheticCamera::new(&config.device)));
    }

    if !Path::new(&config.device).exists() {
        return Err(CameraError::Open(format!("{} not found", config.device)));
    }

    #[cfg(feature = "v4l2")]
    {
        Ok(Box::new(crate::v4l2::V4l2Camera::open(&config.device)?))
    }

    #[cfg(not(feature = "v4l2"))]
    {
        Err(CameraError::Open(format!(
            "no capture backend for {} (build with the `v4l2` feature)",
            config.device
        )))
    }
}

/// Synthetic camera producing a moving gradient at the configured rate
pub struct SyntheticCamera {
    name: String,
    width: u32,
    height: u32,
    vflip: bool,
    interval: Duration,
    next_due: Option<Instant>,
    sequence: u64,
    streaming: bool,
}

impl SyntheticCamera {
    pub fn new(device: &str) -> Self {
        Self {
            name: device.to_string(),
            width: 640,
            height: 480,
            vflip: false,
            interval: Duration::from_millis(33),
            next_due: None,
            sequence: 0,
            streaming: false,
        }
    }

    fn render(&self) -> Vec<u8> {
        let pixel_count = (self.width * self.height) as usize;
        let mut data = Vec::with_capacity(pixel_count * 3);
        for i in 0..pixel_count {
            let x = (i % self.width as usize) as u64;
            let y = (i / self.width as usize) as u64;
            data.push(((x + self.sequence) % 256) as u8);
            data.push((y % 256) as u8);
            data.push((self.sequence % 256) as u8);
        }
        data
    }
}

impl CameraDriver for SyntheticCamera {
    fn configure(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        vflip: bool,
    ) -> Result<(), CameraError> {
        if width == 0 || height == 0 {
            return Err(CameraError::Format(format!("{}x{}", width, height)));
        }
        if fps == 0 {
            return Err(CameraError::Format("framerate must be positive".to_string()));
        }

        self.width = width;
        self.height = height;
        self.vflip = vflip;
        self.interval = Duration::from_micros(1_000_000 / fps as u64);
        debug!(target: "camera", "Synthetic camera configured: {}x{} @ {}fps", width, height, fps);
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), CameraError> {
        self.streaming = true;
        self.next_due = Some(Instant::now());
        info!(target: "camera", "Synthetic camera {} streaming", self.name);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>, CameraError> {
        if !self.streaming {
            return Err(CameraError::NotInitialized);
        }

        let now = Instant::now();
        let mut due = self.next_due.unwrap_or(now);
        // Missed ticks while nobody was reading are dropped, not replayed
        if due + self.interval < now {
            due = now;
        }
        if due > now {
            let wait = due - now;
            if wait > timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(wait);
        }
        self.next_due = Some(due + self.interval);
        self.sequence += 1;

        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let frame = VideoFrame::new(
            self.render(),
            self.width,
            self.height,
            timestamp_ns,
            self.sequence,
        );
        Ok(Some(if self.vflip { frame.flip_vertical() } else { frame }))
    }

    fn stop(&mut self) {
        if self.streaming {
            self.streaming = false;
            info!(target: "camera", "Synthetic camera {} stopped", self.name);
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
