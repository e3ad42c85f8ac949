//! camrelayd - capture daemon
//!
//! Opens the capture device, walks the configure/pool/streaming setup and
//! pushes one frame object to the relay per capture: continuously with
//! `-S`, once with `-s`, or every `wait` seconds otherwise. Frames can be
//! re-encoded as JPEG with `-j`.
//!
//! Fatal setup errors print a single diagnostic and exit non-zero; a
//! failed capture or push only costs that iteration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use camrelay::{
    jpeg, CamRelayConfig, CaptureError, DeviceBufferManager, PixelFormat, RelayClient,
    MIN_BUFFERS, REQUESTED_BUFFERS,
};

#[derive(Parser, Debug)]
#[command(
    name = "camrelayd",
    version,
    about = "Capture webcam frames and push them to the relay service"
)]
struct Args {
    /// Relay application name (or set CAMRELAY_APP)
    app: Option<String>,

    /// Relay username (or set CAMRELAY_USERNAME)
    username: Option<String>,

    /// Relay password (or set CAMRELAY_PASSWORD)
    password: Option<String>,

    /// Sleep this many seconds between shots
    #[arg(short = 'w', long = "wait")]
    wait: Option<u64>,

    /// Take one single shot and exit
    #[arg(short = 's', long)]
    oneshot: bool,

    /// Stream as fast as possible (no sleep between shots)
    #[arg(short = 'S', long)]
    stream: bool,

    /// Convert frames to JPEG before pushing
    #[arg(short = 'j', long)]
    jpeg: bool,

    /// Display debug messages
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();
    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = run(args) {
        log::error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut cfg = CamRelayConfig::load()?;
    if let Some(app) = args.app.clone() {
        cfg.relay.app = Some(app);
    }
    if let Some(username) = args.username.clone() {
        cfg.relay.username = Some(username);
    }
    if let Some(password) = args.password.clone() {
        cfg.relay.password = Some(password);
    }
    if let Some(wait) = args.wait {
        cfg.wait = Duration::from_secs(wait);
    }

    let (app, username, password) = cfg.relay.credentials()?;
    let relay = RelayClient::new(&cfg.relay.base_url, app, username, password)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            stop.store(true, Ordering::Relaxed);
        })
        .context("install signal handler")?;
    }

    let mut camera = DeviceBufferManager::open(&cfg.device)?;
    camera.configure(cfg.capture.width, cfg.capture.height, PixelFormat::Yuyv)?;
    camera.allocate_buffer_pool(REQUESTED_BUFFERS, MIN_BUFFERS)?;
    camera.start_streaming()?;
    if let Some((width, height)) = camera.dimensions() {
        log::info!("capturing {width}x{height} YUYV from {}", cfg.device);
    }

    while !stop.load(Ordering::Relaxed) {
        match camera.capture_frame() {
            Ok(frame) => {
                let (width, height) = (frame.width, frame.height);
                let (sec, usec) = (frame.sec, frame.usec);
                let payload = if args.jpeg {
                    match jpeg::encode_yuyv(frame.payload(), width, height) {
                        Ok(jpeg) => jpeg,
                        Err(err) => {
                            log::warn!("could not encode frame as jpeg: {err:#}");
                            continue;
                        }
                    }
                } else {
                    frame.payload().to_vec()
                };
                if let Err(err) = relay.push_frame(&payload, sec, usec) {
                    log::warn!("could not send frame: {err:#}");
                }
            }
            Err(err @ CaptureError::CaptureFailed(_)) => {
                log::warn!("could not capture frame: {err}");
            }
            Err(err) => return Err(err.into()),
        }

        if args.oneshot {
            break;
        }
        if !args.stream {
            sleep_observing(&stop, cfg.wait);
        }
    }

    camera.close();
    Ok(())
}

/// Sleep for `duration` in short slices so a shutdown request is observed
/// promptly.
fn sleep_observing(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(Duration::from_millis(200)));
    }
}
