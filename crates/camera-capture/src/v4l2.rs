//! Video4Linux2 camera backend
//!
//! Streams from a `/dev/videoN` node through memory-mapped buffers. The
//! device is asked for packed RGB; sensors that only offer YUYV are
//! converted on the capture thread.

use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ouroboros::self_referencing;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::FourCC;

use crate::{CameraDriver, CameraError, VideoFrame};

const BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PixelLayout {
    Rgb24,
    Yuyv,
}

impl PixelLayout {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb24),
            b"YUYV" => Some(Self::Yuyv),
            _ => None,
        }
    }
}

#[self_referencing]
struct StreamState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

/// Camera driven through the kernel V4L2 interface
pub struct V4l2Camera {
    path: String,
    device: Option<v4l::Device>,
    state: Option<StreamState>,
    width: u32,
    height: u32,
    layout: PixelLayout,
    vflip: bool,
    sequence: u64,
}

impl V4l2Camera {
    /// Open the device node; no streaming happens until [`CameraDriver::start_streaming`]
    pub fn open(path: &str) -> Result<Self, CameraError> {
        let device = v4l::Device::with_path(path)
            .map_err(|e| CameraError::Open(format!("{}: {}", path, e)))?;

        Ok(Self {
            path: path.to_string(),
            device: Some(device),
            state: None,
            width: 0,
            height: 0,
            layout: PixelLayout::Rgb24,
            vflip: false,
            sequence: 0,
        })
    }

    fn to_frame(&self, data: &[u8]) -> Result<VideoFrame, CameraError> {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let frame = match self.layout {
            PixelLayout::Rgb24 => {
                let expected = self.width as usize * self.height as usize * 3;
                if data.len() < expected {
                    return Err(CameraError::Format(format!(
                        "short RGB frame: {} of {} bytes",
                        data.len(),
                        expected
                    )));
                }
                VideoFrame::new(
                    data[..expected].to_vec(),
                    self.width,
                    self.height,
                    timestamp_ns,
                    self.sequence,
                )
            }
            PixelLayout::Yuyv => VideoFrame::from_yuyv(
                data,
                self.width,
                self.height,
                timestamp_ns,
                self.sequence,
            )
            .ok_or_else(|| {
                CameraError::Format(format!("short YUYV frame: {} bytes", data.len()))
            })?,
        };

        Ok(if self.vflip { frame.flip_vertical() } else { frame })
    }
}

impl CameraDriver for V4l2Camera {
    fn configure(
        &mut self,
        width: u32,
        height: u32,
        fps: u32,
        vflip: bool,
    ) -> Result<(), CameraError> {
        let device = self.device.as_mut().ok_or(CameraError::NotInitialized)?;

        let mut format = device
            .format()
            .map_err(|e| CameraError::Format(e.to_string()))?;
        format.width = width;
        format.height = height;
        format.fourcc = FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(e) => {
                warn!(target: "camera", "{} rejected RGB format: {}", self.path, e);
                device
                    .format()
                    .map_err(|e| CameraError::Format(e.to_string()))?
            }
        };

        let layout = PixelLayout::from_fourcc(format.fourcc).ok_or_else(|| {
            CameraError::Format(format!("unsupported pixel format {}", format.fourcc))
        })?;

        let params = v4l::video::capture::Parameters::with_fps(fps);
        if let Err(e) = device.set_params(&params) {
            warn!(target: "camera", "{} rejected {} fps: {}", self.path, fps, e);
        }

        self.width = format.width;
        self.height = format.height;
        self.layout = layout;
        self.vflip = vflip;
        info!(
            target: "camera",
            "{} configured: {}x{} {} @ {}fps",
            self.path, self.width, self.height, format.fourcc, fps
        );
        Ok(())
    }

    fn start_streaming(&mut self) -> Result<(), CameraError> {
        if self.state.is_some() {
            return Ok(());
        }
        let device = self.device.take().ok_or(CameraError::NotInitialized)?;

        let state = StreamStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
            },
        }
        .try_build()
        .map_err(|e| CameraError::Stream(e.to_string()))?;

        self.state = Some(state);
        info!(target: "camera", "{} streaming", self.path);
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<VideoFrame>, CameraError> {
        let state = self.state.as_mut().ok_or(CameraError::NotInitialized)?;

        let dequeued = state.with_mut(|fields| {
            fields.stream.set_timeout(timeout);
            fields.stream.next().map(|(buf, meta)| {
                let used = meta.bytesused as usize;
                if used > 0 && used <= buf.len() {
                    buf[..used].to_vec()
                } else {
                    buf.to_vec()
                }
            })
        });

        let data = match dequeued {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
            Err(e) => return Err(CameraError::Stream(e.to_string())),
        };

        self.sequence += 1;
        self.to_frame(&data).map(Some)
    }

    fn stop(&mut self) {
        if self.state.take().is_some() {
            info!(target: "camera", "{} stopped", self.path);
        }
        self.device = None;
    }

    fn name(&self) -> &str {
        &self.path
    }
}
