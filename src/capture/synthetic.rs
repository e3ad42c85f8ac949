//! Synthetic capture backend for `stub://` device paths.
//!
//! Behaves like a tiny, well-mannered driver: it grants a small buffer
//! pool, fills each buffer with a deterministic YUYV pattern and reports
//! wall-clock capture timestamps. Lets the daemon and the tests run the
//! full request/queue/dequeue protocol without hardware.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::capture::{CaptureDevice, DequeuedBuffer, MappedBuffer};
use crate::error::CaptureError;
use crate::frame::PixelFormat;

const SYNTHETIC_BUFFERS: u32 = 4;

pub(crate) struct SyntheticDevice {
    frame_size: usize,
    granted: u32,
    queued: VecDeque<u32>,
    streaming: bool,
    sequence: u64,
}

impl SyntheticDevice {
    pub(crate) fn new() -> Self {
        Self {
            frame_size: 0,
            granted: 0,
            queued: VecDeque::new(),
            streaming: false,
            sequence: 0,
        }
    }
}

impl CaptureDevice for SyntheticDevice {
    fn negotiate_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(u32, u32), CaptureError> {
        self.frame_size = width as usize * height as usize * format.bytes_per_pixel();
        Ok((width, height))
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError> {
        self.granted = count.min(SYNTHETIC_BUFFERS);
        self.queued.clear();
        Ok(self.granted)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MappedBuffer, CaptureError> {
        if index >= self.granted {
            return Err(CaptureError::DeviceUnavailable(format!(
                "synthetic buffer index {index} out of range"
            )));
        }
        // YUYV gray ramp; varies per buffer so captures are tellable apart.
        let mut data = vec![0u8; self.frame_size];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = if i % 2 == 0 {
                (i / 2 + index as usize * 31) as u8
            } else {
                0x80
            };
        }
        Ok(MappedBuffer::from_vec(data))
    }

    fn queue_buffer(&mut self, index: u32) -> Result<(), CaptureError> {
        if index >= self.granted {
            return Err(CaptureError::CaptureFailed(format!(
                "cannot queue unknown buffer index {index}"
            )));
        }
        self.queued.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> Result<DequeuedBuffer, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::CaptureFailed(
                "synthetic device is not streaming".to_string(),
            ));
        }
        let index = self.queued.pop_front().ok_or_else(|| {
            CaptureError::CaptureFailed("synthetic capture queue is empty".to_string())
        })?;
        self.sequence += 1;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| CaptureError::CaptureFailed(e.to_string()))?;
        Ok(DequeuedBuffer {
            index,
            bytes_used: self.frame_size,
            sec: now.as_secs() as i64,
            usec: i64::from(now.subsec_micros()),
        })
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        self.streaming = false;
        Ok(())
    }
}
