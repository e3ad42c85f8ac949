//! camrelay-view - live stream viewer
//!
//! Pulls the relay's frame stream on a producer thread (stream decoder
//! feeding the handoff ring) while the main thread polls the ring the way
//! a render loop would. Rendering proper is a collaborator behind
//! `FrameSink`; the built-in sink just reports what arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use camrelay::{CamRelayConfig, RelayClient, RingHandoff, StreamDecoder};

#[derive(Parser, Debug)]
#[command(
    name = "camrelay-view",
    version,
    about = "Pull the live frame stream from the relay service"
)]
struct Args {
    /// Relay application name (or set CAMRELAY_APP)
    app: Option<String>,

    /// Relay username (or set CAMRELAY_USERNAME)
    username: Option<String>,

    /// Relay password (or set CAMRELAY_PASSWORD)
    password: Option<String>,

    /// Display debug messages
    #[arg(short = 'd', long)]
    debug: bool,
}

/// Display collaborator: presents one decoded frame and reports whether
/// the user asked to shut down.
trait FrameSink {
    fn present(&mut self, payload: &[u8]) -> Result<bool>;
}

/// Fallback sink used when no renderer is wired in.
struct LogSink {
    frames: u64,
}

impl FrameSink for LogSink {
    fn present(&mut self, payload: &[u8]) -> Result<bool> {
        self.frames += 1;
        log::info!("frame {} received ({} bytes)", self.frames, payload.len());
        Ok(true)
    }
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
    if let Some(app) = args.app {
        cfg.relay.app = Some(app);
    }
    if let Some(username) = args.username {
        cfg.relay.username = Some(username);
    }
    if let Some(password) = args.password {
        cfg.relay.password = Some(password);
    }
    let (app, username, password) = cfg.relay.credentials()?;
    let relay = RelayClient::new(&cfg.relay.base_url, app, username, password)?;

    let ring = Arc::new(RingHandoff::with_capacity(cfg.ring_capacity)?);
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            stop.store(true, Ordering::Relaxed);
        })
        .context("install signal handler")?;
    }

    // Producer: network + decode. Never blocks on the consumer; the ring
    // drops the oldest frame if the display falls behind.
    let producer = {
        let ring = Arc::clone(&ring);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            let sink = Arc::clone(&ring);
            let mut decoder = StreamDecoder::new(move |payload| match payload {
                Some(bytes) => sink.append(bytes.to_vec()),
                None => log::warn!("relay sent a frame that failed base64 decode"),
            });
            if let Err(err) = relay.stream_into(&mut decoder, &stop) {
                log::error!("relay stream failed: {err:#}");
            }
            stop.store(true, Ordering::Relaxed);
        })
    };

    // Consumer: poll the ring the way a render/event loop would.
    let mut sink = LogSink { frames: 0 };
    while !stop.load(Ordering::Relaxed) {
        match ring.try_take() {
            Some(payload) => {
                if !sink.present(&payload)? {
                    stop.store(true, Ordering::Relaxed);
                }
            }
            None => std::thread::sleep(Duration::from_millis(10)),
        }
    }

    producer.join().map_err(|_| anyhow::anyhow!("producer thread panicked"))?;
    Ok(())
}
