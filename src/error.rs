//! Error types for the capture and stream-decode cores.
//!
//! Fatal conditions (device open/capability/format failures, an undersized
//! buffer pool) abort the capture session; the caller tears down and may
//! start a whole new session later. `CaptureFailed` is per-iteration: the
//! current frame is lost, the loop continues.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The device could not be opened, or lacks the capture/streaming
    /// capability flags.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The requested pixel format is not the single supported one, or the
    /// driver substituted a different format during negotiation.
    #[error("unsupported pixel format {fourcc}")]
    UnsupportedFormat { fourcc: String },

    /// Format negotiation produced a zero-area frame.
    #[error("invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The device granted fewer buffers than the configured floor. The pool
    /// has been unwound; nothing stays mapped.
    #[error("device granted {granted} buffers, need at least {minimum}")]
    InsufficientBuffers { granted: u32, minimum: u32 },

    /// An operation that needs a negotiated format and an allocated frame
    /// was called before `configure`/`allocate_buffer_pool`.
    #[error("capture device is not configured")]
    NotConfigured,

    /// The manager was closed; open a new session to capture again.
    #[error("capture device is closed")]
    Closed,

    /// A single dequeue/requeue cycle failed. Transient: log and keep going.
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The structural parser hit malformed input. The decoder has already
    /// reset itself and will resync at the next top-level object; only the
    /// malformed object is lost.
    #[error("stream syntax error at byte {offset}: {message}")]
    Syntax { offset: u64, message: String },
}
