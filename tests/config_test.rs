//! Loading layered configuration from disk.
//!
//! Run with: cargo test --test config_test

use marlin::config::MarlinConfig;
use marlin::error::MarlinError;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("marlin.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_file_overrides_merge_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[connection]
port = "/dev/ttyACM3"
line_pacing = "100ms"
handshake_attempts = 4

[recipe]
include_wash_cycle = true
probe_hold = "20m"
channels = ["BF", "Cy5"]
output_dir = "/data/marlin"

[logging]
level = "debug"
"#,
    );

    let config = MarlinConfig::load_from(&path).unwrap();

    assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyACM3"));
    assert_eq!(config.connection.line_pacing, Duration::from_millis(100));
    assert_eq!(config.connection.handshake_attempts, 4);
    assert!(config.recipe.include_wash_cycle);
    assert_eq!(config.recipe.probe_hold, Duration::from_secs(20 * 60));
    assert_eq!(config.recipe.channels, vec!["BF", "Cy5"]);
    assert_eq!(config.logging.level, "debug");

    // untouched keys keep their defaults
    assert_eq!(config.connection.connect_code, "MARLIN");
    assert_eq!(config.connection.baud_rate, 9600);
    assert_eq!(config.connection.steady_read_timeout, Duration::from_secs(10));
    assert_eq!(config.recipe.fast_speed, 2000);
    assert_eq!(config.recipe.fixation_hold, Duration::from_secs(45 * 60));
    assert!(!config.logging.json);
}

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().unwrap();
    let config = MarlinConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, MarlinConfig::default());
}

#[test]
fn test_out_of_range_speed_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[recipe]\nslow_speed = 9000\n");

    let err = MarlinConfig::load_from(&path).unwrap_err();

    assert!(matches!(err, MarlinError::Configuration(ref msg) if msg.contains("slow_speed")));
}

#[test]
fn test_malformed_duration_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[recipe]\nprobe_hold = \"half an hour\"\n");

    let err = MarlinConfig::load_from(&path).unwrap_err();

    assert!(matches!(err, MarlinError::Config(_)));
}

#[test]
fn test_zero_handshake_attempts_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[connection]\nhandshake_attempts = 0\n");

    assert!(matches!(
        MarlinConfig::load_from(&path),
        Err(MarlinError::Configuration(_))
    ));
}

#[test]
fn test_zero_read_timeout_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[connection]\nsteady_read_timeout = \"0s\"\n");

    let err = MarlinConfig::load_from(&path).unwrap_err();

    assert!(
        matches!(err, MarlinError::Configuration(ref msg) if msg.contains("steady_read_timeout"))
    );
}
