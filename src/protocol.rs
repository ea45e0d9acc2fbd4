//! Wire types for the companion server's HTTP surface.
//!
//! | Endpoint            | Method | Shape                                        |
//! |---------------------|--------|----------------------------------------------|
//! | [`IDENTITY_PATH`]   | `GET`  | `{ "directory" \| "worktree": string }`      |
//! | [`EVENT_PATH`]      | `GET`  | SSE frames carrying [`ServerEvent`] payloads |
//! | [`PUBLISH_PATH`]    | `POST` | [`PublishAction`]                            |

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Identity endpoint used to validate a candidate port.
pub const IDENTITY_PATH: &str = "/path";

/// Long-lived server-sent event stream.
pub const EVENT_PATH: &str = "/event";

/// Endpoint accepting editor actions.
pub const PUBLISH_PATH: &str = "/tui/publish";

/// Event type of the server's periodic keep-alive.
pub const HEARTBEAT_EVENT: &str = "server.heartbeat";

/// Build the URL for `path` on a companion listening at `host:port`.
#[must_use]
pub fn endpoint(host: &str, port: u16, path: &str) -> String {
    format!("http://{host}:{port}{path}")
}

/// Body returned by [`IDENTITY_PATH`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct IdentityResponse {
    /// Directory the server was started in.
    #[serde(default)]
    pub directory: Option<String>,
    /// Worktree root, reported by some server versions instead of `directory`.
    #[serde(default)]
    pub worktree: Option<String>,
}

impl IdentityResponse {
    /// Working directory reported by the server.
    ///
    /// The first field present wins, `directory` before `worktree`. A
    /// present but empty value is not a directory, so it yields `None`
    /// rather than falling through to `worktree`.
    #[must_use]
    pub fn working_directory(&self) -> Option<&str> {
        self.directory
            .as_deref()
            .or(self.worktree.as_deref())
            .filter(|dir| !dir.is_empty())
    }
}

/// One event record carried by a stream frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    /// Event type, e.g. `file.edited` or [`HEARTBEAT_EVENT`].
    #[serde(rename = "type")]
    pub event_type: String,
    /// Type-specific payload; opaque to the bridge.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl ServerEvent {
    /// Decode a frame payload into an event record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Decode` if the payload is not JSON or lacks `type`.
    pub fn parse(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|err| AppError::Decode(format!("bad event: {err}")))
    }

    /// Whether this is the server's keep-alive event.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.event_type == HEARTBEAT_EVENT
    }
}

/// Action posted to [`PUBLISH_PATH`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "properties")]
pub enum PublishAction {
    /// Append text to the companion's prompt input.
    #[serde(rename = "text.append")]
    AppendText {
        /// Text to append.
        text: String,
    },
    /// Run a named companion command.
    #[serde(rename = "command.execute")]
    ExecuteCommand {
        /// Command name.
        command: String,
    },
    /// Ask the companion to exit cleanly.
    #[serde(rename = "app.exit")]
    Exit {},
}
