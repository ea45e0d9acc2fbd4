//! Bridge configuration parsing, validation, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::retry::RetryPolicy;
use crate::{AppError, Result};

/// Environment variable that pins the companion port, bypassing discovery.
pub const PORT_ENV_VAR: &str = "COMPANION_BRIDGE_PORT";

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_process_pattern() -> String {
    "opencode.*--port".into()
}

fn default_launch_command() -> String {
    "opencode --port".into()
}

fn default_request_timeout_ms() -> u64 {
    1000
}

fn default_heartbeat_timeout_seconds() -> u64 {
    35
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_poll_attempts() -> u32 {
    6
}

fn default_ancestry_max_depth() -> u32 {
    10
}

/// Bridge configuration parsed from `bridge.toml`.
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Fixed companion port. When set, discovery is skipped and only this
    /// port is validated.
    #[serde(default)]
    pub port: Option<u16>,
    /// Host the companion listens on.
    #[serde(default = "default_host")]
    pub host: String,
    /// Regex matched against process command lines to find candidates.
    #[serde(default = "default_process_pattern")]
    pub process_pattern: String,
    /// Shell command used to start the companion when none is running.
    #[serde(default = "default_launch_command")]
    pub launch_command: String,
    /// Connect/request timeout for identity probes and publish calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Seconds without any event before the stream is considered dead.
    #[serde(default = "default_heartbeat_timeout_seconds")]
    pub heartbeat_timeout_seconds: u64,
    /// Delay between a lost connection and the resubscribe attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Interval between discovery attempts after a launch.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Discovery attempts after a launch before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// Maximum parent-process hops when checking ancestry.
    #[serde(default = "default_ancestry_max_depth")]
    pub ancestry_max_depth: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: None,
            host: default_host(),
            process_pattern: default_process_pattern(),
            launch_command: default_launch_command(),
            request_timeout_ms: default_request_timeout_ms(),
            heartbeat_timeout_seconds: default_heartbeat_timeout_seconds(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            ancestry_max_depth: default_ancestry_max_depth(),
        }
    }
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the [`PORT_ENV_VAR`] override, if present.
    ///
    /// An unparsable value is ignored with a warning so a stray variable
    /// never blocks discovery.
    pub fn apply_env_overrides(&mut self) {
        let Ok(raw) = env::var(PORT_ENV_VAR) else {
            return;
        };
        match raw.trim().parse::<u16>() {
            Ok(port) if port != 0 => self.port = Some(port),
            _ => warn!(value = %raw, "ignoring invalid {PORT_ENV_VAR}"),
        }
    }

    /// Timeout applied to identity probes and publish requests.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Window after which a silent event stream is declared dead.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Single delayed attempt used after a heartbeat timeout.
    #[must_use]
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.reconnect_delay_ms), 1)
    }

    /// Poll schedule used after launching the companion.
    #[must_use]
    pub fn launch_poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.poll_interval_ms),
            self.poll_attempts,
        )
    }

    fn validate(&self) -> Result<()> {
        if self.port == Some(0) {
            return Err(AppError::Config("port must be greater than zero".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.heartbeat_timeout_seconds == 0 {
            return Err(AppError::Config(
                "heartbeat_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.poll_attempts == 0 {
            return Err(AppError::Config(
                "poll_attempts must be greater than zero".into(),
            ));
        }
        if self.launch_command.trim().is_empty() {
            return Err(AppError::Config("launch_command must not be empty".into()));
        }
        Regex::new(&self.process_pattern)
            .map_err(|err| AppError::Config(format!("process_pattern invalid: {err}")))?;
        Ok(())
    }
}
