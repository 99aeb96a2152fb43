//! Decoded video frames.
//!
//! Every pipeline hands out frames in one fixed layout: packed RGB24, row-major,
//! `width * height * 3` bytes, no row padding. A `VideoFrame` owns its pixels,
//! so callers may keep it past the next `FrameSource::read()`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

use crate::bbox::ImageSize;

/// Bytes per pixel of the RGB24 layout.
pub const RGB_CHANNELS: usize = 3;

pub struct VideoFrame {
    data: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Wall-clock time the frame left the pipeline.
    captured_at: DateTime<Utc>,
}

impl VideoFrame {
    /// Wraps packed RGB24 pixels, stamping the capture time.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Utc::now(),
        })
    }

    /// Overrides the capture timestamp (replayed or externally clocked sources).
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width, self.height)
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// RGB triple at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        let px = self.data.get(idx..idx + RGB_CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("captured_at", &self.captured_at)
            .finish_non_exhaustive()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))
}

/// Copies `height` rows of `width * 3` bytes out of a buffer whose rows are
/// `stride` bytes apart, dropping any row padding.
pub(crate) fn pack_rgb_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Result<Vec<u8>> {
    let row_bytes = width as usize * RGB_CHANNELS;
    if stride == row_bytes {
        let expected = rgb_len(width, height)?;
        return data
            .get(..expected)
            .map(|slice| slice.to_vec())
            .ok_or_else(|| anyhow!("frame buffer is shorter than {} bytes", expected));
    }
    if stride < row_bytes {
        return Err(anyhow!(
            "frame stride {} is smaller than the row width {}",
            stride,
            row_bytes
        ));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| anyhow!("frame buffer row {} is out of bounds", row))?,
        );
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(VideoFrame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(VideoFrame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn pixel_lookup_is_row_major() -> Result<()> {
        let mut data = vec![0u8; 2 * 2 * 3];
        // (x=1, y=1) starts at byte (1 * 2 + 1) * 3.
        data[9] = 9;
        let frame = VideoFrame::new(data, 2, 2)?;
        assert_eq!(frame.pixel(1, 1), Some([9, 0, 0]));
        assert_eq!(frame.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn packs_padded_rows() -> Result<()> {
        // 1x2 image, 3 bytes per row plus 1 byte of padding.
        let padded = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let packed = pack_rgb_rows(&padded, 1, 2, 4)?;
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }

    #[test]
    fn pack_rejects_short_buffers() {
        assert!(pack_rgb_rows(&[0u8; 5], 1, 2, 3).is_err());
        assert!(pack_rgb_rows(&[0u8; 6], 1, 2, 4).is_err());
    }

    #[test]
    fn last_row_needs_no_padding() -> Result<()> {
        let unpadded_tail = [1u8, 2, 3, 0, 4, 5, 6];
        let packed = pack_rgb_rows(&unpadded_tail, 1, 2, 4)?;
        assert_eq!(packed, vec![1, 2, 3, 4, 5, 6]);
        Ok(())
    }
}
