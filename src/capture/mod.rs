//! Capture device buffer management.
//!
//! `DeviceBufferManager` owns the device handle, a small pool of
//! kernel-owned memory-mapped capture buffers, and the reusable process
//! frame. It walks the request -> map -> queue -> capture -> dequeue ->
//! requeue cycle and the `Closed -> Configured -> Streaming -> Closed`
//! state machine.
//!
//! Raw buffer handles never leave this module: the pool is an arena of
//! indexed slots and consumers only ever see copies placed into the
//! process-owned `Frame`.
//!
//! The kernel interface sits behind the `CaptureDevice` trait so the
//! manager's protocol can be exercised without hardware. `open` on a
//! `stub://` path yields a synthetic in-process device for tests and dry
//! runs; real paths go through the V4L2 ioctl backend.

mod synthetic;
#[cfg(target_os = "linux")]
mod v4l2;

use crate::error::CaptureError;
use crate::frame::{Frame, PixelFormat};

/// Buffers requested from the driver. Over-provisioned so one slow consumer
/// does not stall the device's internal queue.
pub const REQUESTED_BUFFERS: u32 = 16;

/// Hard floor on the grant: anything below this cannot double-buffer and is
/// treated as fatal rather than degraded.
pub const MIN_BUFFERS: u32 = 2;

/// One completed buffer as reported by the driver.
pub(crate) struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: usize,
    pub sec: i64,
    pub usec: i64,
}

/// Kernel capture interface, one implementor per backend.
///
/// Implementors validate capability flags at construction, so a value of
/// this trait is always a usable capture device.
pub(crate) trait CaptureDevice: Send {
    /// Negotiate the capture format. Returns the dimensions the device
    /// actually adopted, which may differ from the request.
    fn negotiate_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(u32, u32), CaptureError>;

    /// Ask the driver for `count` capture buffers; returns the granted
    /// count. A count of zero releases the driver-side allocation.
    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError>;

    /// Map the granted buffer at `index` read-only into the process.
    fn map_buffer(&mut self, index: u32) -> Result<MappedBuffer, CaptureError>;

    /// Hand the buffer at `index` back to the driver's incoming queue.
    fn queue_buffer(&mut self, index: u32) -> Result<(), CaptureError>;

    /// Block until the driver completes a buffer.
    fn dequeue_buffer(&mut self) -> Result<DequeuedBuffer, CaptureError>;

    fn stream_on(&mut self) -> Result<(), CaptureError>;

    fn stream_off(&mut self) -> Result<(), CaptureError>;
}

enum Mapping {
    #[cfg(target_os = "linux")]
    Kernel { ptr: *const u8, len: usize },
    Owned(Vec<u8>),
}

/// One kernel-owned capture buffer mapped read-only into the process.
/// Owned exclusively by the manager for its whole mapped lifetime; unmapped
/// on drop.
pub(crate) struct MappedBuffer {
    mapping: Mapping,
}

// The mapping is read-only and only ever accessed by the manager's thread.
unsafe impl Send for MappedBuffer {}

impl MappedBuffer {
    /// Wrap a live mmap region. Caller guarantees `ptr` is a valid mapping
    /// of `len` bytes that stays valid until this value is dropped.
    #[cfg(target_os = "linux")]
    pub(crate) unsafe fn from_raw(ptr: *const u8, len: usize) -> Self {
        Self {
            mapping: Mapping::Kernel { ptr, len },
        }
    }

    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        Self {
            mapping: Mapping::Owned(data),
        }
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            #[cfg(target_os = "linux")]
            Mapping::Kernel { ptr, len } => unsafe { std::slice::from_raw_parts(*ptr, *len) },
            Mapping::Owned(data) => data,
        }
    }

    pub(crate) fn len(&self) -> usize {
        match &self.mapping {
            #[cfg(target_os = "linux")]
            Mapping::Kernel { len, .. } => *len,
            Mapping::Owned(data) => data.len(),
        }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        if let Mapping::Kernel { ptr, len } = self.mapping {
            unsafe {
                libc::munmap(ptr as *mut libc::c_void, len);
            }
        }
    }
}

/// Owns the capture device and its buffer pool; produces one `Frame` per
/// successful `capture_frame` call.
pub struct DeviceBufferManager {
    device: Option<Box<dyn CaptureDevice>>,
    pool: Vec<MappedBuffer>,
    frame: Option<Frame>,
    streaming: bool,
}

impl DeviceBufferManager {
    /// Acquire the device at `path`. Paths beginning with `stub://` get the
    /// synthetic backend; anything else is opened as a V4L2 device node.
    pub fn open(path: &str) -> Result<Self, CaptureError> {
        let device: Box<dyn CaptureDevice> = if path.starts_with("stub://") {
            Box::new(synthetic::SyntheticDevice::new())
        } else {
            #[cfg(target_os = "linux")]
            {
                Box::new(v4l2::V4l2Device::open(path)?)
            }
            #[cfg(not(target_os = "linux"))]
            {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "v4l2 device {path} is only supported on linux"
                )));
            }
        };
        log::info!("opened capture device {path}");
        Ok(Self::with_device(device))
    }

    pub(crate) fn with_device(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device: Some(device),
            pool: Vec::new(),
            frame: None,
            streaming: false,
        }
    }

    /// Negotiate the capture format and allocate the reusable frame from
    /// the dimensions the device *returned*, not the requested ones.
    pub fn configure(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(), CaptureError> {
        let device = self.device.as_mut().ok_or(CaptureError::Closed)?;
        let (adopted_w, adopted_h) = device.negotiate_format(width, height, format)?;
        if (adopted_w, adopted_h) != (width, height) {
            log::info!("device adopted {adopted_w}x{adopted_h} (requested {width}x{height})");
        }
        self.frame = Some(Frame::with_format(adopted_w, adopted_h, format)?);
        Ok(())
    }

    /// Ask the device for `requested` buffers, map each granted one
    /// read-only and queue it so capture can begin. A grant below `minimum`
    /// is fatal: the pool is unwound and nothing stays mapped.
    pub fn allocate_buffer_pool(
        &mut self,
        requested: u32,
        minimum: u32,
    ) -> Result<usize, CaptureError> {
        if self.frame.is_none() {
            return Err(CaptureError::NotConfigured);
        }
        let device = self.device.as_mut().ok_or(CaptureError::Closed)?;
        let granted = device.request_buffers(requested)?;
        if granted < minimum {
            let _ = device.request_buffers(0);
            return Err(CaptureError::InsufficientBuffers { granted, minimum });
        }

        let mut pool = Vec::with_capacity(granted as usize);
        for index in 0..granted {
            let mapped = match device.map_buffer(index) {
                Ok(mapped) => mapped,
                Err(err) => {
                    drop(pool);
                    let _ = device.request_buffers(0);
                    return Err(err);
                }
            };
            pool.push(mapped);
            if let Err(err) = device.queue_buffer(index) {
                drop(pool);
                let _ = device.request_buffers(0);
                return Err(err);
            }
        }
        log::info!("mapped and queued {granted} capture buffers");
        self.pool = pool;
        Ok(granted as usize)
    }

    /// Tell the driver to start filling queued buffers. Starting twice is a
    /// no-op returning success.
    pub fn start_streaming(&mut self) -> Result<(), CaptureError> {
        if self.streaming {
            return Ok(());
        }
        if self.pool.is_empty() {
            return Err(CaptureError::NotConfigured);
        }
        let device = self.device.as_mut().ok_or(CaptureError::Closed)?;
        device.stream_on()?;
        self.streaming = true;
        Ok(())
    }

    /// Stop the capture queue. A no-op when not streaming.
    pub fn stop_streaming(&mut self) -> Result<(), CaptureError> {
        if !self.streaming {
            return Ok(());
        }
        if let Some(device) = self.device.as_mut() {
            device.stream_off()?;
        }
        self.streaming = false;
        Ok(())
    }

    /// Block until the device completes one buffer, copy at most
    /// `frame.capacity()` bytes into the reusable frame, requeue the buffer
    /// and return the populated frame.
    pub fn capture_frame(&mut self) -> Result<&Frame, CaptureError> {
        if !self.streaming {
            return Err(CaptureError::CaptureFailed(
                "streaming is not active".to_string(),
            ));
        }
        let device = self.device.as_mut().ok_or(CaptureError::Closed)?;
        let frame = self.frame.as_mut().ok_or(CaptureError::NotConfigured)?;

        let done = device.dequeue_buffer()?;
        let buffer = self.pool.get(done.index as usize).ok_or_else(|| {
            CaptureError::CaptureFailed(format!(
                "device completed unknown buffer index {}",
                done.index
            ))
        })?;
        let data = buffer.as_slice();
        let used = done.bytes_used.min(data.len());
        frame.fill_from(&data[..used], done.sec, done.usec);

        // Requeue right away so the slot is available to the driver again.
        if let Err(err) = device.queue_buffer(done.index) {
            frame.clear();
            return Err(err);
        }
        Ok(frame)
    }

    /// Most recently captured frame, if any.
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Dimensions adopted at configure time.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.frame.as_ref().map(|f| (f.width, f.height))
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn buffer_count(&self) -> usize {
        self.pool.len()
    }

    /// Stop streaming, unmap every buffer, close the device and release the
    /// frame. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.streaming {
            if let Some(device) = self.device.as_mut() {
                let _ = device.stream_off();
            }
            self.streaming = false;
        }
        self.pool.clear();
        self.frame = None;
        if self.device.take().is_some() {
            log::info!("capture device closed");
        }
    }
}

impl Drop for DeviceBufferManager {
    fn drop(&mut self) {
        self.close();
    }
}
