use std::time::Duration;

use companion_bridge::config::PORT_ENV_VAR;
use companion_bridge::{AppError, BridgeConfig};

fn sample_toml() -> &'static str {
    r#"
port = 4096
host = "localhost"
process_pattern = "companion serve"
launch_command = "companion serve --port 0"
request_timeout_ms = 250
heartbeat_timeout_seconds = 40
reconnect_delay_ms = 2000
poll_interval_ms = 100
poll_attempts = 3
ancestry_max_depth = 4
"#
}

fn config_error(raw: &str) -> String {
    match BridgeConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn parses_valid_config() {
    let config = BridgeConfig::from_toml_str(sample_toml()).expect("config parses");

    assert_eq!(config.port, Some(4096));
    assert_eq!(config.host, "localhost");
    assert_eq!(config.process_pattern, "companion serve");
    assert_eq!(config.launch_command, "companion serve --port 0");
    assert_eq!(config.request_timeout(), Duration::from_millis(250));
    assert_eq!(config.heartbeat_timeout(), Duration::from_secs(40));
    assert_eq!(config.ancestry_max_depth, 4);
}

#[test]
fn empty_file_uses_defaults() {
    let config = BridgeConfig::from_toml_str("").expect("empty config parses");

    assert_eq!(config, BridgeConfig::default());
    assert_eq!(config.port, None);
    assert_eq!(config.host, "127.0.0.1");
    assert_eq!(config.heartbeat_timeout(), Duration::from_secs(35));
    assert_eq!(config.request_timeout(), Duration::from_secs(1));
}

#[test]
fn reconnect_policy_is_single_delayed_attempt() {
    let config = BridgeConfig::from_toml_str(sample_toml()).expect("config parses");
    let policy = config.reconnect_policy();

    assert_eq!(policy.interval, Duration::from_secs(2));
    assert_eq!(policy.max_attempts, 1);
}

#[test]
fn launch_poll_policy_follows_poll_settings() {
    let config = BridgeConfig::from_toml_str(sample_toml()).expect("config parses");
    let policy = config.launch_poll_policy();

    assert_eq!(policy.interval, Duration::from_millis(100));
    assert_eq!(policy.max_attempts, 3);
}

#[test]
fn loads_from_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("bridge.toml");
    std::fs::write(&path, sample_toml()).expect("write config");

    let config = BridgeConfig::load_from_path(&path).expect("config loads");
    assert_eq!(config.port, Some(4096));
}

#[test]
fn missing_file_is_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let result = BridgeConfig::load_from_path(temp.path().join("absent.toml"));

    assert!(matches!(result, Err(AppError::Config(_))));
}

#[test]
fn rejects_invalid_field_type() {
    let msg = config_error("port = \"not-a-number\"");
    assert!(msg.starts_with("invalid config"), "got: {msg}");
}

#[test]
fn rejects_zero_port() {
    assert!(config_error("port = 0").contains("port"));
}

#[test]
fn rejects_zero_request_timeout() {
    assert!(config_error("request_timeout_ms = 0").contains("request_timeout_ms"));
}

#[test]
fn rejects_zero_heartbeat_timeout() {
    assert!(config_error("heartbeat_timeout_seconds = 0").contains("heartbeat_timeout_seconds"));
}

#[test]
fn rejects_zero_poll_attempts() {
    assert!(config_error("poll_attempts = 0").contains("poll_attempts"));
}

#[test]
fn rejects_blank_launch_command() {
    assert!(config_error("launch_command = \"   \"").contains("launch_command"));
}

#[test]
fn rejects_invalid_process_pattern() {
    assert!(config_error("process_pattern = \"(unclosed\"").contains("process_pattern"));
}

// ── Environment override ─────────────────────────────────────────────────────

#[test]
#[serial_test::serial]
fn env_port_overrides_config() {
    std::env::set_var(PORT_ENV_VAR, "5123");
    let mut config = BridgeConfig::default();
    config.apply_env_overrides();
    std::env::remove_var(PORT_ENV_VAR);

    assert_eq!(config.port, Some(5123));
}

#[test]
#[serial_test::serial]
fn invalid_env_port_is_ignored() {
    std::env::set_var(PORT_ENV_VAR, "not-a-port");
    let mut config = BridgeConfig::from_toml_str("port = 4096").expect("config parses");
    config.apply_env_overrides();
    std::env::remove_var(PORT_ENV_VAR);

    assert_eq!(config.port, Some(4096));
}

#[test]
#[serial_test::serial]
fn zero_env_port_is_ignored() {
    std::env::set_var(PORT_ENV_VAR, "0");
    let mut config = BridgeConfig::default();
    config.apply_env_overrides();
    std::env::remove_var(PORT_ENV_VAR);

    assert_eq!(config.port, None);
}

#[test]
#[serial_test::serial]
fn absent_env_port_leaves_config_untouched() {
    std::env::remove_var(PORT_ENV_VAR);
    let mut config = BridgeConfig::default();
    config.apply_env_overrides();

    assert_eq!(config, BridgeConfig::default());
}
