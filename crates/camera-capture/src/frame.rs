//! Video frame types

use std::sync::Arc;

/// Frame as held by the rolling buffer; immutable once captured
pub type SharedFrame = Arc<VideoFrame>;

/// Decoded RGB video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// RGB pixel data (width * height * 3)
    pub data: Vec<u8>,
    /// Frame width
    pub width: u32,
    /// Frame height
    pub height: u32,
    /// Capture timestamp (nanoseconds since epoch)
    pub timestamp_ns: u64,
    /// Frame sequence number
    pub sequence: u64,
}

impl VideoFrame {
    /// Create a new video frame from raw RGB data
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp_ns: u64, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ns,
            sequence,
        }
    }

    /// Convert packed YUYV 4:2:2 (two pixels per four bytes) to RGB
    ///
    /// `None` when `data` is too short for the shape or `width` is odd.
    pub fn from_yuyv(
        data: &[u8],
        width: u32,
        height: u32,
        timestamp_ns: u64,
        sequence: u64,
    ) -> Option<Self> {
        let pixels = width as usize * height as usize;
        if width % 2 != 0 || data.len() < pixels * 2 {
            return None;
        }

        let mut rgb = Vec::with_capacity(pixels * 3);
        for chunk in data[..pixels * 2].chunks_exact(4) {
            let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
            rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
            rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
        }
        Some(Self::new(rgb, width, height, timestamp_ns, sequence))
    }

    /// Byte length an RGB24 frame of this shape must have
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Pixel buffer matches the declared shape
    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    /// Get pixel at (x, y)
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.data
            .get(idx..idx + 3)
            .map(|p| [p[0], p[1], p[2]])
    }

    /// Mirror the frame top-to-bottom
    pub fn flip_vertical(mut self) -> Self {
        let row = self.width as usize * 3;
        if row == 0 || self.data.len() != self.expected_len() {
            return self;
        }

        let rows = self.height as usize;
        for top in 0..rows / 2 {
            let bottom = rows - 1 - top;
            let (upper, lower) = self.data.split_at_mut(bottom * row);
            upper[top * row..(top + 1) * row].swap_with_slice(&mut lower[..row]);
        }
        self
    }
}

/// BT.601 limited-range conversion
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ]
}
