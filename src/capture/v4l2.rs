//! V4L2 ioctl backend.
//!
//! Speaks the kernel streaming I/O protocol directly: QUERYCAP at open,
//! S_FMT for negotiation, REQBUFS/QUERYBUF plus mmap for the pool, and
//! QBUF/DQBUF/STREAMON/STREAMOFF for the capture cycle. Struct layouts
//! mirror `linux/videodev2.h` for the 64-bit ABI; only the fields this
//! crate touches are read.

// Layout-only fields in the ABI mirrors below are never read.
#![allow(dead_code)]

use std::ffi::CString;
use std::io;
use std::mem::size_of;

use crate::capture::{CaptureDevice, DequeuedBuffer, MappedBuffer};
use crate::error::CaptureError;
use crate::frame::PixelFormat;

const BUF_TYPE_VIDEO_CAPTURE: u32 = 1;
const MEMORY_MMAP: u32 = 1;
const FIELD_ANY: u32 = 0;
const CAP_VIDEO_CAPTURE: u32 = 0x0000_0001;
const CAP_STREAMING: u32 = 0x0400_0000;

#[repr(C)]
#[derive(Clone, Copy)]
struct Capability {
    driver: [u8; 16],
    card: [u8; 32],
    bus_info: [u8; 32],
    version: u32,
    capabilities: u32,
    device_caps: u32,
    reserved: [u32; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct PixFormat {
    width: u32,
    height: u32,
    pixelformat: u32,
    field: u32,
    bytesperline: u32,
    sizeimage: u32,
    colorspace: u32,
    priv_: u32,
    flags: u32,
    ycbcr_enc: u32,
    quantization: u32,
    xfer_func: u32,
}

#[repr(C)]
#[derive(Clone, Copy)]
union FormatUnion {
    pix: PixFormat,
    // The kernel union is 200 bytes with 8-byte alignment.
    raw: [u64; 25],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Format {
    type_: u32,
    fmt: FormatUnion,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct RequestBuffers {
    count: u32,
    type_: u32,
    memory: u32,
    capabilities: u32,
    flags: u8,
    reserved: [u8; 3],
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Timecode {
    type_: u32,
    flags: u32,
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
    userbits: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy)]
union BufferM {
    offset: u32,
    userptr: libc::c_ulong,
    planes: *mut libc::c_void,
    fd: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct Buffer {
    index: u32,
    type_: u32,
    bytesused: u32,
    flags: u32,
    field: u32,
    timestamp: libc::timeval,
    timecode: Timecode,
    sequence: u32,
    memory: u32,
    m: BufferM,
    length: u32,
    reserved2: u32,
    request_fd: u32,
}

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn vidioc(dir: u32, nr: u8, size: usize) -> libc::c_ulong {
    ((dir << 30) | ((size as u32) << 16) | ((b'V' as u32) << 8) | nr as u32) as libc::c_ulong
}

const VIDIOC_QUERYCAP: libc::c_ulong = vidioc(IOC_READ, 0, size_of::<Capability>());
const VIDIOC_S_FMT: libc::c_ulong = vidioc(IOC_READ | IOC_WRITE, 4, size_of::<Format>());
const VIDIOC_REQBUFS: libc::c_ulong = vidioc(IOC_READ | IOC_WRITE, 8, size_of::<RequestBuffers>());
const VIDIOC_QUERYBUF: libc::c_ulong = vidioc(IOC_READ | IOC_WRITE, 9, size_of::<Buffer>());
const VIDIOC_QBUF: libc::c_ulong = vidioc(IOC_READ | IOC_WRITE, 15, size_of::<Buffer>());
const VIDIOC_DQBUF: libc::c_ulong = vidioc(IOC_READ | IOC_WRITE, 17, size_of::<Buffer>());
const VIDIOC_STREAMON: libc::c_ulong = vidioc(IOC_WRITE, 18, size_of::<libc::c_int>());
const VIDIOC_STREAMOFF: libc::c_ulong = vidioc(IOC_WRITE, 19, size_of::<libc::c_int>());

/// `ioctl` with EINTR retry.
fn xioctl<T>(fd: libc::c_int, request: libc::c_ulong, arg: &mut T) -> io::Result<()> {
    loop {
        let rc = unsafe { libc::ioctl(fd, request, arg as *mut T) };
        if rc != -1 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EINTR) {
            return Err(err);
        }
    }
}

fn fourcc_label(code: u32) -> String {
    code.to_le_bytes()
        .iter()
        .map(|b| {
            if b.is_ascii_graphic() {
                *b as char
            } else {
                '.'
            }
        })
        .collect()
}

pub(crate) struct V4l2Device {
    fd: libc::c_int,
    path: String,
}

impl V4l2Device {
    /// Open the device node and verify it can capture and stream.
    pub(crate) fn open(path: &str) -> Result<Self, CaptureError> {
        let cpath = CString::new(path)
            .map_err(|_| CaptureError::DeviceUnavailable(format!("bad device path {path:?}")))?;
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "open {path}: {}",
                io::Error::last_os_error()
            )));
        }
        let device = Self {
            fd,
            path: path.to_string(),
        };

        let mut cap: Capability = unsafe { std::mem::zeroed() };
        xioctl(device.fd, VIDIOC_QUERYCAP, &mut cap).map_err(|err| {
            CaptureError::DeviceUnavailable(format!("VIDIOC_QUERYCAP on {path}: {err}"))
        })?;
        if cap.capabilities & CAP_VIDEO_CAPTURE == 0 || cap.capabilities & CAP_STREAMING == 0 {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{path} lacks capture+streaming capability (caps {:#010x})",
                cap.capabilities
            )));
        }
        Ok(device)
    }
}

impl Drop for V4l2Device {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl CaptureDevice for V4l2Device {
    fn negotiate_format(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<(u32, u32), CaptureError> {
        let mut fmt: Format = unsafe { std::mem::zeroed() };
        fmt.type_ = BUF_TYPE_VIDEO_CAPTURE;
        unsafe {
            fmt.fmt.pix.width = width;
            fmt.fmt.pix.height = height;
            fmt.fmt.pix.pixelformat = format.fourcc();
            fmt.fmt.pix.field = FIELD_ANY;
        }

        xioctl(self.fd, VIDIOC_S_FMT, &mut fmt).map_err(|err| {
            CaptureError::DeviceUnavailable(format!("VIDIOC_S_FMT on {}: {err}", self.path))
        })?;

        let pix = unsafe { fmt.fmt.pix };
        if pix.pixelformat != format.fourcc() {
            // The driver substituted a format we cannot interpret.
            return Err(CaptureError::UnsupportedFormat {
                fourcc: fourcc_label(pix.pixelformat),
            });
        }
        Ok((pix.width, pix.height))
    }

    fn request_buffers(&mut self, count: u32) -> Result<u32, CaptureError> {
        let mut req: RequestBuffers = unsafe { std::mem::zeroed() };
        req.count = count;
        req.type_ = BUF_TYPE_VIDEO_CAPTURE;
        req.memory = MEMORY_MMAP;
        xioctl(self.fd, VIDIOC_REQBUFS, &mut req).map_err(|err| {
            CaptureError::DeviceUnavailable(format!("VIDIOC_REQBUFS on {}: {err}", self.path))
        })?;
        Ok(req.count)
    }

    fn map_buffer(&mut self, index: u32) -> Result<MappedBuffer, CaptureError> {
        let mut buf: Buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = MEMORY_MMAP;
        xioctl(self.fd, VIDIOC_QUERYBUF, &mut buf).map_err(|err| {
            CaptureError::DeviceUnavailable(format!(
                "VIDIOC_QUERYBUF {index} on {}: {err}",
                self.path
            ))
        })?;

        let length = buf.length as usize;
        let offset = unsafe { buf.m.offset };
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                length,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CaptureError::DeviceUnavailable(format!(
                "mmap buffer {index} on {}: {}",
                self.path,
                io::Error::last_os_error()
            )));
        }
        Ok(unsafe { MappedBuffer::from_raw(ptr as *const u8, length) })
    }

    fn queue_buffer(&mut self, index: u32) -> Result<(), CaptureError> {
        let mut buf: Buffer = unsafe { std::mem::zeroed() };
        buf.index = index;
        buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = MEMORY_MMAP;
        xioctl(self.fd, VIDIOC_QBUF, &mut buf)
            .map_err(|err| CaptureError::CaptureFailed(format!("VIDIOC_QBUF {index}: {err}")))
    }

    fn dequeue_buffer(&mut self) -> Result<DequeuedBuffer, CaptureError> {
        let mut buf: Buffer = unsafe { std::mem::zeroed() };
        buf.type_ = BUF_TYPE_VIDEO_CAPTURE;
        buf.memory = MEMORY_MMAP;
        xioctl(self.fd, VIDIOC_DQBUF, &mut buf)
            .map_err(|err| CaptureError::CaptureFailed(format!("VIDIOC_DQBUF: {err}")))?;
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused as usize,
            sec: buf.timestamp.tv_sec as i64,
            usec: buf.timestamp.tv_usec as i64,
        })
    }

    fn stream_on(&mut self) -> Result<(), CaptureError> {
        let mut buf_type: libc::c_int = BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd, VIDIOC_STREAMON, &mut buf_type)
            .map_err(|err| CaptureError::CaptureFailed(format!("VIDIOC_STREAMON: {err}")))
    }

    fn stream_off(&mut self) -> Result<(), CaptureError> {
        let mut buf_type: libc::c_int = BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        xioctl(self.fd, VIDIOC_STREAMOFF, &mut buf_type)
            .map_err(|err| CaptureError::CaptureFailed(format!("VIDIOC_STREAMOFF: {err}")))
    }
}
