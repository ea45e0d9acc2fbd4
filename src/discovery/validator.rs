//! Server validator: identity probe against a candidate port.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Duration;

use tracing::debug;

use crate::discovery::{CandidateProcess, ValidatedServer};
use crate::protocol::{self, IdentityResponse};
use crate::{AppError, Result};

/// Identity probe against a single port.
///
/// Returns the working directory the server on `port` reports.
pub trait ServerProbe: Send + Sync {
    /// Probe `port`.
    ///
    /// # Errors
    ///
    /// - `AppError::Unreachable` on connection failure or timeout.
    /// - `AppError::InvalidResponse` on a non-success status, a non-JSON
    ///   body, or a body without `directory`/`worktree`.
    fn probe(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + '_>>;
}

/// [`ServerProbe`] over HTTP with a short request timeout.
pub struct HttpProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpProbe {
    /// Build a probe for servers on `host`.
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

    async fn fetch_identity(&self, port: u16) -> Result<PathBuf> {
        let url = protocol::endpoint(&self.host, port, protocol::IDENTITY_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| AppError::Unreachable(format!("{url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::InvalidResponse(format!("{url} returned {status}")));
        }

        let identity: IdentityResponse = response
            .json()
            .await
            .map_err(|err| AppError::InvalidResponse(format!("{url}: {err}")))?;

        identity
            .working_directory()
            .map(PathBuf::from)
            .ok_or_else(|| {
                AppError::InvalidResponse(format!("{url}: missing directory and worktree"))
            })
    }
}

impl ServerProbe for HttpProbe {
    fn probe(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<PathBuf>> + Send + '_>> {
        Box::pin(self.fetch_identity(port))
    }
}

/// Promote a candidate to a [`ValidatedServer`].
///
/// # Errors
///
/// Propagates the probe's `Unreachable` or `InvalidResponse` error.
pub async fn validate(
    probe: &dyn ServerProbe,
    candidate: CandidateProcess,
) -> Result<ValidatedServer> {
    let working_directory = probe.probe(candidate.port).await?;
    Ok(ValidatedServer {
        pid: candidate.pid,
        port: candidate.port,
        working_directory,
    })
}

/// Validate every candidate in order, discarding the ones that fail.
pub async fn validate_all(
    probe: &dyn ServerProbe,
    candidates: &[CandidateProcess],
) -> Vec<ValidatedServer> {
    let mut servers = Vec::with_capacity(candidates.len());
    for &candidate in candidates {
        match validate(probe, candidate).await {
            Ok(server) => servers.push(server),
            Err(err) => {
                debug!(pid = candidate.pid, port = candidate.port, %err, "candidate discarded");
            }
        }
    }
    servers
}
