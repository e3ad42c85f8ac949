//! Process-owned frame buffer.
//!
//! A `Frame` is allocated once per capture session from the *negotiated*
//! dimensions and reused for every capture: the copy path truncates rather
//! than reallocates, so `capacity` never changes and `bytes_used` can never
//! exceed it.

use crate::error::CaptureError;

/// Pixel formats the capture path understands.
///
/// Only packed YUYV 4:2:2 is supported for now. The frame-size math below
/// assumes it, so extending this enum means revisiting `bytes_per_pixel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Yuyv,
}

impl PixelFormat {
    /// V4L2 fourcc code for this format.
    pub fn fourcc(self) -> u32 {
        match self {
            PixelFormat::Yuyv => u32::from_le_bytes(*b"YUYV"),
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Yuyv => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PixelFormat::Yuyv => "YUYV",
        }
    }
}

/// Reusable image buffer plus usage metadata.
///
/// Created by `DeviceBufferManager::configure`, mutated in place on every
/// capture, dropped when the session closes.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    bytes_used: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Device-reported capture time, seconds since the epoch.
    pub sec: i64,
    /// Microsecond part of the capture time.
    pub usec: i64,
}

impl Frame {
    /// Allocate a frame sized for `width` x `height` in `format`.
    pub fn with_format(width: u32, height: u32, format: PixelFormat) -> Result<Self, CaptureError> {
        let capacity = (width as usize)
            .checked_mul(height as usize)
            .and_then(|area| area.checked_mul(format.bytes_per_pixel()))
            .filter(|size| *size > 0)
            .ok_or(CaptureError::InvalidDimensions { width, height })?;
        Ok(Self {
            data: vec![0u8; capacity],
            bytes_used: 0,
            width,
            height,
            format,
            sec: 0,
            usec: 0,
        })
    }

    /// Fixed allocation size; never changes after construction.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    /// The captured bytes of the most recent fill.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.bytes_used]
    }

    /// Copy `src` into the frame, truncating at `capacity`, and record the
    /// capture timestamp. Returns the number of bytes kept.
    pub(crate) fn fill_from(&mut self, src: &[u8], sec: i64, usec: i64) -> usize {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
        self.bytes_used = len;
        self.sec = sec;
        self.usec = usec;
        len
    }

    /// Discard the current contents without releasing the allocation.
    pub(crate) fn clear(&mut self) {
        self.bytes_used = 0;
        self.sec = 0;
        self.usec = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_follows_negotiated_dimensions() {
        let frame = Frame::with_format(320, 240, PixelFormat::Yuyv).expect("alloc frame");
        assert_eq!(frame.capacity(), 153_600);
        assert_eq!(frame.bytes_used(), 0);
    }

    #[test]
    fn zero_area_dimensions_are_rejected() {
        assert!(matches!(
            Frame::with_format(0, 240, PixelFormat::Yuyv),
            Err(CaptureError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn fill_truncates_at_capacity() {
        let mut frame = Frame::with_format(4, 2, PixelFormat::Yuyv).expect("alloc frame");
        let oversized = vec![7u8; 100];
        let kept = frame.fill_from(&oversized, 12, 34);
        assert_eq!(kept, 16);
        assert_eq!(frame.bytes_used(), frame.capacity());
        assert_eq!(frame.payload(), &oversized[..16]);
        assert_eq!((frame.sec, frame.usec), (12, 34));
    }

    #[test]
    fn refill_reuses_the_allocation() {
        let mut frame = Frame::with_format(4, 2, PixelFormat::Yuyv).expect("alloc frame");
        frame.fill_from(&[1u8; 16], 0, 0);
        frame.fill_from(&[2u8; 4], 1, 2);
        assert_eq!(frame.capacity(), 16);
        assert_eq!(frame.payload(), &[2u8; 4]);
    }
}
