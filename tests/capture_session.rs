//! Full capture session against the synthetic `stub://` backend: the same
//! protocol the daemon walks, minus hardware.

use camrelay::{CaptureError, DeviceBufferManager, PixelFormat, MIN_BUFFERS, REQUESTED_BUFFERS};

#[test]
fn session_walks_the_whole_protocol() {
    let mut camera = DeviceBufferManager::open("stub://camera").expect("open");
    camera
        .configure(320, 240, PixelFormat::Yuyv)
        .expect("configure");
    let granted = camera
        .allocate_buffer_pool(REQUESTED_BUFFERS, MIN_BUFFERS)
        .expect("pool");
    assert!(granted >= MIN_BUFFERS as usize);
    camera.start_streaming().expect("stream on");

    for _ in 0..granted * 2 {
        let frame = camera.capture_frame().expect("capture");
        assert_eq!((frame.width, frame.height), (320, 240));
        assert_eq!(frame.bytes_used(), 153_600);
        assert_eq!(frame.payload().len(), 153_600);
        assert!(frame.sec > 0);
    }

    camera.stop_streaming().expect("stream off");
    camera.stop_streaming().expect("stop twice is fine");
    camera.close();
    camera.close();
}

#[test]
fn capture_requires_streaming() {
    let mut camera = DeviceBufferManager::open("stub://camera").expect("open");
    camera
        .configure(320, 240, PixelFormat::Yuyv)
        .expect("configure");
    camera
        .allocate_buffer_pool(REQUESTED_BUFFERS, MIN_BUFFERS)
        .expect("pool");
    assert!(matches!(
        camera.capture_frame(),
        Err(CaptureError::CaptureFailed(_))
    ));
}

#[test]
fn pool_before_configure_is_rejected() {
    let mut camera = DeviceBufferManager::open("stub://camera").expect("open");
    assert!(matches!(
        camera.allocate_buffer_pool(REQUESTED_BUFFERS, MIN_BUFFERS),
        Err(CaptureError::NotConfigured)
    ));
}

#[test]
fn consecutive_captures_reuse_one_frame() {
    let mut camera = DeviceBufferManager::open("stub://camera").expect("open");
    camera
        .configure(16, 8, PixelFormat::Yuyv)
        .expect("configure");
    camera
        .allocate_buffer_pool(REQUESTED_BUFFERS, MIN_BUFFERS)
        .expect("pool");
    camera.start_streaming().expect("stream on");

    let first = camera.capture_frame().expect("capture").payload().to_vec();
    let second = camera.capture_frame().expect("capture").payload().to_vec();
    // The synthetic backend patterns each buffer differently, so two
    // consecutive captures come from different pool slots.
    assert_ne!(first, second);
    assert_eq!(first.len(), second.len());
}
