//! Daemon and viewer configuration.
//!
//! Settings come from an optional JSON config file named by
//! `CAMRELAY_CONFIG`, with environment-variable overrides on top and a
//! final validation pass. Relay credentials can also arrive as CLI
//! positionals; the binaries merge those after `load()`.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_WAIT_SECS: u64 = 5;
const DEFAULT_RING_CAPACITY: usize = 5;
const DEFAULT_RELAY_BASE_URL: &str = "https://scalr.api.appbase.io";

#[derive(Debug, Deserialize, Default)]
struct CamRelayConfigFile {
    device: Option<String>,
    capture: Option<CaptureConfigFile>,
    relay: Option<RelayConfigFile>,
    wait_secs: Option<u64>,
    ring_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    base_url: Option<String>,
    app: Option<String>,
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub base_url: String,
    pub app: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RelaySettings {
    /// Credentials are complete once app name, username and password are
    /// all present (from file, env or CLI).
    pub fn credentials(&self) -> Result<(&str, &str, &str)> {
        match (&self.app, &self.username, &self.password) {
            (Some(app), Some(user), Some(pass)) => Ok((app, user, pass)),
            _ => Err(anyhow!(
                "relay app name, username and password are required (pass them as arguments or set CAMRELAY_APP/CAMRELAY_USERNAME/CAMRELAY_PASSWORD)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CamRelayConfig {
    pub device: String,
    pub capture: CaptureSettings,
    pub relay: RelaySettings,
    /// Pause between shots on the push path.
    pub wait: Duration,
    /// Slots in the viewer's handoff ring.
    pub ring_capacity: usize,
}

impl CamRelayConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMRELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => CamRelayConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamRelayConfigFile) -> Self {
        let capture = CaptureSettings {
            width: file
                .capture
                .as_ref()
                .and_then(|c| c.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .capture
                .as_ref()
                .and_then(|c| c.height)
                .unwrap_or(DEFAULT_HEIGHT),
        };
        let relay = RelaySettings {
            base_url: file
                .relay
                .as_ref()
                .and_then(|r| r.base_url.clone())
                .unwrap_or_else(|| DEFAULT_RELAY_BASE_URL.to_string()),
            app: file.relay.as_ref().and_then(|r| r.app.clone()),
            username: file.relay.as_ref().and_then(|r| r.username.clone()),
            password: file.relay.and_then(|r| r.password),
        };
        Self {
            device: file.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            capture,
            relay,
            wait: Duration::from_secs(file.wait_secs.unwrap_or(DEFAULT_WAIT_SECS)),
            ring_capacity: file.ring_capacity.unwrap_or(DEFAULT_RING_CAPACITY),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("CAMRELAY_DEVICE") {
            if !device.trim().is_empty() {
                self.device = device;
            }
        }
        if let Ok(width) = std::env::var("CAMRELAY_WIDTH") {
            self.capture.width = width
                .parse()
                .map_err(|_| anyhow!("CAMRELAY_WIDTH must be an integer"))?;
        }
        if let Ok(height) = std::env::var("CAMRELAY_HEIGHT") {
            self.capture.height = height
                .parse()
                .map_err(|_| anyhow!("CAMRELAY_HEIGHT must be an integer"))?;
        }
        if let Ok(wait) = std::env::var("CAMRELAY_WAIT_SECS") {
            let secs: u64 = wait
                .parse()
                .map_err(|_| anyhow!("CAMRELAY_WAIT_SECS must be an integer number of seconds"))?;
            self.wait = Duration::from_secs(secs);
        }
        if let Ok(capacity) = std::env::var("CAMRELAY_RING_CAPACITY") {
            self.ring_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("CAMRELAY_RING_CAPACITY must be an integer"))?;
        }
        if let Ok(base_url) = std::env::var("CAMRELAY_RELAY_URL") {
            if !base_url.trim().is_empty() {
                self.relay.base_url = base_url;
            }
        }
        for (var, slot) in [
            ("CAMRELAY_APP", &mut self.relay.app),
            ("CAMRELAY_USERNAME", &mut self.relay.username),
            ("CAMRELAY_PASSWORD", &mut self.relay.password),
        ] {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    *slot = Some(value);
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture dimensions must be non-zero"));
        }
        if self.ring_capacity == 0 {
            return Err(anyhow!("ring capacity must be at least 1"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CamRelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
