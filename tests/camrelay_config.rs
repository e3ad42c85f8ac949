use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use camrelay::CamRelayConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMRELAY_CONFIG",
        "CAMRELAY_DEVICE",
        "CAMRELAY_WIDTH",
        "CAMRELAY_HEIGHT",
        "CAMRELAY_WAIT_SECS",
        "CAMRELAY_RING_CAPACITY",
        "CAMRELAY_RELAY_URL",
        "CAMRELAY_APP",
        "CAMRELAY_USERNAME",
        "CAMRELAY_PASSWORD",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "device": "/dev/video2",
        "capture": {
            "width": 640,
            "height": 480
        },
        "relay": {
            "base_url": "https://relay.example.com",
            "app": "demo",
            "username": "user"
        },
        "wait_secs": 10,
        "ring_capacity": 8
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("CAMRELAY_CONFIG", file.path());
    std::env::set_var("CAMRELAY_HEIGHT", "600");
    std::env::set_var("CAMRELAY_PASSWORD", "hunter2");

    let cfg = CamRelayConfig::load().expect("load config");

    assert_eq!(cfg.device, "/dev/video2");
    assert_eq!(cfg.capture.width, 640);
    assert_eq!(cfg.capture.height, 600);
    assert_eq!(cfg.relay.base_url, "https://relay.example.com");
    assert_eq!(cfg.wait, Duration::from_secs(10));
    assert_eq!(cfg.ring_capacity, 8);
    let (app, user, pass) = cfg.relay.credentials().expect("credentials complete");
    assert_eq!((app, user, pass), ("demo", "user", "hunter2"));

    clear_env();
}

#[test]
fn defaults_apply_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CamRelayConfig::load().expect("load defaults");

    assert_eq!(cfg.device, "/dev/video0");
    assert_eq!((cfg.capture.width, cfg.capture.height), (320, 240));
    assert_eq!(cfg.wait, Duration::from_secs(5));
    assert_eq!(cfg.ring_capacity, 5);
    assert!(cfg.relay.credentials().is_err());

    clear_env();
}

#[test]
fn zero_dimensions_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMRELAY_WIDTH", "0");
    let err = CamRelayConfig::load().expect_err("zero width");
    assert!(err.to_string().contains("non-zero"));

    clear_env();
}

#[test]
fn malformed_numeric_env_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMRELAY_WAIT_SECS", "soon");
    assert!(CamRelayConfig::load().is_err());

    clear_env();
}
