//! Byte-stream sources for the event subscription.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use tracing::debug;

use crate::protocol;
use crate::{AppError, Result};

/// Raw body of an event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Opens the event stream of the companion on a port.
pub trait EventSource: Send + Sync {
    /// Open the stream.
    ///
    /// # Errors
    ///
    /// - `AppError::Unreachable` if the request cannot be sent.
    /// - `AppError::InvalidResponse` on a non-success status.
    fn open(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>>;
}

/// [`EventSource`] issuing `GET /event` over HTTP.
///
/// Only the connect phase is time-limited; the body is unbounded and
/// liveness is left to the client's heartbeat timer.
pub struct HttpEventSource {
    client: reqwest::Client,
    host: String,
}

impl HttpEventSource {
    /// Build a source for servers on `host`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the HTTP client cannot be built.
    pub fn new(host: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .no_proxy()
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    async fn open_stream(&self, port: u16) -> Result<ByteStream> {
        let url = protocol::endpoint(&self.host, port, protocol::EVENT_PATH);
        debug!(%url, "opening event stream");

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|err| AppError::Unreachable(format!("{url}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::InvalidResponse(format!("{url} returned {status}")));
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(io::Error::other))))
    }
}

impl EventSource for HttpEventSource {
    fn open(&self, port: u16) -> Pin<Box<dyn Future<Output = Result<ByteStream>> + Send + '_>> {
        Box::pin(self.open_stream(port))
    }
}
