//! camrelay
//!
//! Captures frames from a memory-mapped V4L2 webcam and exchanges them
//! with a remote relay service: the daemon pushes frames out as JSON
//! objects carrying base64 images, and the viewer pulls the relay's
//! never-terminating frame stream, decoding it incrementally as bytes
//! arrive.
//!
//! # Architecture
//!
//! - `capture`: device handle, mmap buffer pool and the
//!   request/queue/dequeue capture cycle (`DeviceBufferManager`)
//! - `stream`: incremental decoder for the live frame stream
//!   (`StreamDecoder`)
//! - `ring`: single-producer/single-consumer handoff between the decode
//!   and display threads (`RingHandoff`)
//! - `frame`, `jpeg`, `relay`, `config`: frame model and the thin glue
//!   around the core

pub mod capture;
pub mod config;
pub mod error;
pub mod frame;
pub mod jpeg;
pub mod relay;
pub mod ring;
pub mod stream;

pub use capture::{DeviceBufferManager, MIN_BUFFERS, REQUESTED_BUFFERS};
pub use config::CamRelayConfig;
pub use error::{CaptureError, DecodeError};
pub use frame::{Frame, PixelFormat};
pub use relay::{encode_frame_object, RelayClient};
pub use ring::RingHandoff;
pub use stream::{DecoderState, StreamDecoder};
