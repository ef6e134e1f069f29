//! Video file encoding
//!
//! [`FfmpegMp4Encoder`] pipes raw RGB into an `ffmpeg` child and produces an
//! MP4 at the capture framerate. [`MjpegEncoder`] needs no external tools and
//! writes concatenated JPEGs.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{FrameBuffer, VideoFrame};

/// Encoder error types
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Frame {sequence} has {actual} bytes, expected {expected}")]
    MalformedFrame {
        sequence: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Frame {sequence} is {width}x{height}, stream is {expected_width}x{expected_height}")]
    ShapeChanged {
        sequence: u64,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("ffmpeg failed: {0}")]
    Ffmpeg(String),
}

/// Writes a window of frames to a video file
pub trait VideoEncoder: Send + Sync {
    fn encode(&self, frames: &FrameBuffer, path: &Path, fps: u32) -> Result<(), EncodeError>;

    /// File extension of the produced container
    fn extension(&self) -> &'static str {
        "mp4"
    }
}

fn check_frame(frame: &VideoFrame) -> Result<(), EncodeError> {
    if frame.is_well_formed() {
        Ok(())
    } else {
        Err(EncodeError::MalformedFrame {
            sequence: frame.sequence,
            expected: frame.expected_len(),
            actual: frame.data.len(),
        })
    }
}

/// MPEG-4 Part 2 video in an MP4 container, encoded by an `ffmpeg` process
#[derive(Debug, Clone)]
pub struct FfmpegMp4Encoder {
    program: PathBuf,
}

impl FfmpegMp4Encoder {
    /// Use `ffmpeg` from `PATH`
    pub fn new() -> Self {
        Self::with_program("ffmpeg")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegMp4Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for FfmpegMp4Encoder {
    fn encode(&self, frames: &FrameBuffer, path: &Path, fps: u32) -> Result<(), EncodeError> {
        let first = frames
            .into_iter()
            .next()
            .ok_or_else(|| EncodeError::Ffmpeg("no frames to encode".to_string()))?;
        let (width, height) = (first.width, first.height);
        for frame in frames {
            check_frame(frame)?;
            if frame.width != width || frame.height != height {
                return Err(EncodeError::ShapeChanged {
                    sequence: frame.sequence,
                    width: frame.width,
                    height: frame.height,
                    expected_width: width,
                    expected_height: height,
                });
            }
        }

        let mut child = Command::new(&self.program)
            .args(["-hide_banner", "-loglevel", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{}x{}", width, height)])
            .args(["-framerate", &fps.max(1).to_string()])
            .args(["-i", "pipe:0"])
            .args(["-c:v", "mpeg4", "-q:v", "3", "-pix_fmt", "yuv420p"])
            .args(["-movflags", "+faststart", "-f", "mp4", "-y"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EncodeError::Ffmpeg(format!("cannot run {}: {}", self.program.display(), e))
            })?;

        // Drained concurrently so a chatty ffmpeg cannot block on a full pipe
        let stderr = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let written = match child.stdin.take() {
            Some(mut stdin) => frames
                .into_iter()
                .try_for_each(|frame| stdin.write_all(&frame.data)),
            None => Ok(()),
        };

        let status = child.wait()?;
        let diagnostics = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if !status.success() {
            let detail = diagnostics.trim();
            return Err(EncodeError::Ffmpeg(if detail.is_empty() {
                status.to_string()
            } else {
                detail.to_string()
            }));
        }
        if !diagnostics.trim().is_empty() {
            warn!(target: "camera", "ffmpeg: {}", diagnostics.trim());
        }
        written?;

        File::open(path)?.sync_all()?;
        debug!(
            target: "camera",
            "Encoded {} frames {}x{} @ {}fps into {}",
            frames.len(),
            width,
            height,
            fps,
            path.display()
        );
        Ok(())
    }
}

/// Motion-JPEG stream: each frame is written as a baseline JPEG, back to back
///
/// Carries no timing; players assume their own rate.
#[derive(Debug, Clone)]
pub struct MjpegEncoder {
    quality: u8,
}

impl MjpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for MjpegEncoder {
    fn default() -> Self {
        Self::new(85)
    }
}

impl VideoEncoder for MjpegEncoder {
    fn encode(&self, frames: &FrameBuffer, path: &Path, _fps: u32) -> Result<(), EncodeError> {
        let mut writer = BufWriter::new(File::create(path)?);

        for frame in frames {
            check_frame(frame)?;
            JpegEncoder::new_with_quality(&mut writer, self.quality).encode(
                &frame.data,
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            )?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn extension(&self) -> &'static str {
        "mjpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VideoFrame;
    use rolling_buffer::RollingBuffer;
    use std::sync::Arc;

    fn gray_frames(count: u64, width: u32, height: u32) -> FrameBuffer {
        let mut frames = RollingBuffer::new(count as usize).unwrap();
        for sequence in 0..count {
            let data = vec![(sequence * 20) as u8; (width * height * 3) as usize];
            frames.push(Arc::new(VideoFrame::new(data, width, height, 0, sequence)));
        }
        frames
    }

    fn ffmpeg_installed() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[test]
    fn test_encodes_every_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let frames = gray_frames(3, 4, 4);

        MjpegEncoder::default().encode(&frames, &path, 30).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let start_markers = bytes.windows(2).filter(|w| w[0] == 0xFF && w[1] == 0xD8).count();
        assert_eq!(start_markers, 3);
    }

    #[test]
    fn test_rejects_malformed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = RollingBuffer::new(1).unwrap();
        frames.push(Arc::new(VideoFrame::new(vec![0; 7], 4, 4, 0, 9)));

        let err = MjpegEncoder::default()
            .encode(&frames, &dir.path().join("bad.mjpeg"), 30)
            .unwrap_err();
        assert!(matches!(err, EncodeError::MalformedFrame { sequence: 9, .. }));
    }

    #[test]
    fn test_extensions_follow_container() {
        assert_eq!(MjpegEncoder::default().extension(), "mjpeg");
        assert_eq!(FfmpegMp4Encoder::default().extension(), "mp4");
    }

    #[test]
    fn test_mp4_without_ffmpeg_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        let err = FfmpegMp4Encoder::with_program("/nonexistent/ffmpeg")
            .encode(&gray_frames(2, 4, 4), &path, 10)
            .unwrap_err();
        assert!(matches!(err, EncodeError::Ffmpeg(_)));
    }

    #[test]
    fn test_mp4_rejects_shape_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut frames = RollingBuffer::new(2).unwrap();
        frames.push(Arc::new(VideoFrame::new(vec![0; 4 * 4 * 3], 4, 4, 0, 1)));
        frames.push(Arc::new(VideoFrame::new(vec![0; 8 * 4 * 3], 8, 4, 0, 2)));

        let err = FfmpegMp4Encoder::default()
            .encode(&frames, &dir.path().join("clip.mp4"), 10)
            .unwrap_err();
        assert!(matches!(err, EncodeError::ShapeChanged { sequence: 2, .. }));
    }

    #[test]
    fn test_mp4_container_written() {
        if !ffmpeg_installed() {
            eprintln!("ffmpeg not installed, skipping");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");

        FfmpegMp4Encoder::default()
            .encode(&gray_frames(10, 16, 16), &path, 10)
            .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(bytes.windows(4).any(|w| w == b"moov"));
    }
}
