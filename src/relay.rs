//! Relay service transport.
//!
//! Thin glue over HTTP: PUT one JSON frame object per capture on the push
//! path, or hold a streaming GET open and feed the response bytes into a
//! `StreamDecoder` as they arrive on the pull path. No retry logic lives
//! here; callers log a failed push and move on.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use url::Url;

use crate::stream::StreamDecoder;

const STREAM_CHUNK_BYTES: usize = 8192;

/// Wire encoding of one frame: base64 image plus the capture timestamp
/// split into signed 64-bit seconds and microseconds.
pub fn encode_frame_object(payload: &[u8], sec: i64, usec: i64) -> String {
    serde_json::json!({
        "image": BASE64.encode(payload),
        "sec": sec,
        "usec": usec,
    })
    .to_string()
}

/// Client for one relay document endpoint.
pub struct RelayClient {
    agent: ureq::Agent,
    push_url: Url,
    stream_url: Url,
}

impl RelayClient {
    /// Build a client for `<base_url>/<app>/pic/1`, authenticated with
    /// `username`/`password` embedded in the URL the way the relay expects.
    pub fn new(base_url: &str, app: &str, username: &str, password: &str) -> Result<Self> {
        let push_url = build_url(base_url, app, username, password, false)?;
        let stream_url = build_url(base_url, app, username, password, true)?;
        Ok(Self {
            agent: ureq::Agent::new(),
            push_url,
            stream_url,
        })
    }

    /// Send one frame. The caller decides what to do about failure; this
    /// does not retry.
    pub fn push_frame(&self, payload: &[u8], sec: i64, usec: i64) -> Result<()> {
        let body = encode_frame_object(payload, sec, usec);
        self.agent
            .request_url("PUT", &self.push_url)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .context("push frame to relay")?;
        Ok(())
    }

    /// Hold the streaming GET open and feed response bytes to `decoder`
    /// until the stream ends or `stop` is observed between chunks. Syntax
    /// errors from the decoder are logged verbatim and the stream
    /// continues; they are never fatal.
    pub fn stream_into(&self, decoder: &mut StreamDecoder, stop: &AtomicBool) -> Result<()> {
        let response = self
            .agent
            .request_url("GET", &self.stream_url)
            .call()
            .context("open relay stream")?;
        let mut reader = response.into_reader();
        let mut chunk = [0u8; STREAM_CHUNK_BYTES];
        while !stop.load(Ordering::Relaxed) {
            let read = reader.read(&mut chunk).context("read relay stream")?;
            if read == 0 {
                log::info!("relay closed the stream");
                break;
            }
            if let Err(err) = decoder.push(&chunk[..read]) {
                log::warn!("relay stream: {err}");
            }
        }
        Ok(())
    }
}

fn build_url(
    base_url: &str,
    app: &str,
    username: &str,
    password: &str,
    streaming: bool,
) -> Result<Url> {
    let mut url = Url::parse(base_url).with_context(|| format!("parse relay url {base_url}"))?;
    url.set_username(username)
        .map_err(|_| anyhow!("relay url {base_url} cannot carry credentials"))?;
    url.set_password(Some(password))
        .map_err(|_| anyhow!("relay url {base_url} cannot carry credentials"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("relay url {base_url} cannot be a base"))?
        .pop_if_empty()
        .push(app)
        .push("pic")
        .push("1");
    if streaming {
        url.set_query(Some("stream=true"));
    }
    Ok(url)
}
