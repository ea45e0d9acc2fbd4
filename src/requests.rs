//! Request client: one-shot editor actions posted to the companion.
//!
//! Independent of the event subscription; every call targets an explicit
//! port and shares the validator's short timeout so a dead port fails fast.

use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::{self, PublishAction};
use crate::{AppError, Result};

/// HTTP client for [`protocol::PUBLISH_PATH`].
#[derive(Debug, Clone)]
pub struct RequestClient {
    client: reqwest::Client,
    host: String,
}

impl RequestClient {
    /// Build a client for servers on `host`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    /// Append `text` to the companion's prompt.
    ///
    /// # Errors
    ///
    /// - `AppError::Unreachable` if the request cannot be completed.
    /// - `AppError::InvalidResponse` on a non-success status.
    pub async fn append_text(&self, port: u16, text: &str) -> Result<()> {
        self.publish(
            port,
            &PublishAction::AppendText {
                text: text.to_owned(),
            },
        )
        .await
    }

    /// Run the companion command `command`.
    ///
    /// # Errors
    ///
    /// - `AppError::Unreachable` if the request cannot be completed.
    /// - `AppError::InvalidResponse` on a non-success status.
    pub async fn execute_command(&self, port: u16, command: &str) -> Result<()> {
        self.publish(
            port,
            &PublishAction::ExecuteCommand {
                command: command.to_owned(),
            },
        )
        .await
    }

    /// Ask the companion to exit; `true` if it acknowledged with a success
    /// status.
    pub async fn request_shutdown(&self, port: u16) -> bool {
        match self.publish(port, &PublishAction::Exit {}).await {
            Ok(()) => true,
            Err(err) => {
                warn!(port, %err, "shutdown request failed");
                false
            }
        }
    }

    async fn publish(&self, port: u16, action: &PublishAction) -> Result<()> {
        let url = protocol::endpoint(&self.host, port, protocol::PUBLISH_PATH);
        let response = self
            .client
            .post(&url)
            .json(action)
            .send()
            .await
            .map_err(|err| AppError::Unreachable(format!("{url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::InvalidResponse(format!("{url} returned {status}")));
        }

        debug!(port, ?action, "published action");
        Ok(())
    }
}
