//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every discovery, transport, and config failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Connection or timeout failure while talking to a port.
    Unreachable(String),
    /// Port answered, but the body was malformed or unexpected.
    InvalidResponse(String),
    /// Discovery succeeded but no server is in scope for the caller's directory.
    NoneInScope(String),
    /// Resolution exhausted every attempt, including launch and poll.
    NotFound(String),
    /// The external launch collaborator could not start the companion.
    LaunchFailed(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// An event frame could not be decoded into an event record.
    Decode(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error came from the discovery pipeline rather than a
    /// transport or configuration problem.
    #[must_use]
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            Self::NoneInScope(_) | Self::NotFound(_) | Self::LaunchFailed(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable(msg) => write!(f, "unreachable: {msg}"),
            Self::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
            Self::NoneInScope(msg) => write!(f, "none in scope: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::LaunchFailed(msg) => write!(f, "launch failed: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
