//! Control surface handed to editor glue.
//!
//! [`Bridge`] wires the resolver, event client, request client, and event
//! bus together and exposes the operations collaborators call.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::BridgeConfig;
use crate::discovery::resolver::{PortResolver, ResolvePort};
use crate::events::bus::{EventBus, Notification};
use crate::events::client::{ClientTimings, ConnectionStatus, EventClient};
use crate::events::source::{EventSource, HttpEventSource};
use crate::requests::RequestClient;
use crate::Result;

/// Discovery, subscription, and actions against one companion at a time.
pub struct Bridge {
    resolver: Arc<dyn ResolvePort>,
    events: EventClient,
    requests: RequestClient,
    cancel: CancellationToken,
}

impl Bridge {
    /// Assemble a bridge from explicit collaborators.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn ResolvePort>,
        source: Arc<dyn EventSource>,
        requests: RequestClient,
        timings: ClientTimings,
        cancel: CancellationToken,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let events = EventClient::new(source, Arc::clone(&resolver), bus, timings);
        Self {
            resolver,
            events,
            requests,
            cancel,
        }
    }

    /// Build a bridge wired to the live system for a caller in `caller_cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if any HTTP client or the process pattern
    /// cannot be built.
    pub fn from_config(config: &BridgeConfig, caller_cwd: PathBuf) -> Result<Self> {
        let cancel = CancellationToken::new();
        let resolver =
            PortResolver::from_config(config, caller_cwd)?.with_cancellation(cancel.clone());
        let source = HttpEventSource::new(config.host.clone(), config.request_timeout())?;
        let requests = RequestClient::new(config.host.clone(), config.request_timeout())?;
        let timings = ClientTimings {
            heartbeat_timeout: config.heartbeat_timeout(),
            reconnect: config.reconnect_policy(),
        };
        Ok(Self::new(
            Arc::new(resolver),
            Arc::new(source),
            requests,
            timings,
            cancel,
        ))
    }

    /// Resolve the companion port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or `AppError::LaunchFailed`.
    pub async fn resolve_port(&self, allow_launch: bool) -> Result<u16> {
        self.resolver.resolve_port(allow_launch).await
    }

    /// Resolve the companion and subscribe to its events.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` or `AppError::LaunchFailed`.
    pub async fn connect(&self, allow_launch: bool) -> Result<u16> {
        let port = self.resolve_port(allow_launch).await?;
        self.events.subscribe(port);
        Ok(port)
    }

    /// Subscribe to events on `port`; a no-op if already subscribed there.
    pub fn subscribe(&self, port: u16) -> bool {
        self.events.subscribe(port)
    }

    /// Close the event subscription without reconnecting.
    pub fn unsubscribe(&self) {
        self.events.unsubscribe();
    }

    /// Whether the event stream is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.events.is_connected()
    }

    /// Connected flag and port.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.events.status()
    }

    /// Receive notifications for `topic` (an event type or a lifecycle topic).
    pub fn on(&self, topic: impl Into<String>) -> mpsc::UnboundedReceiver<Notification> {
        self.events.bus().subscribe(topic)
    }

    /// Receive every notification.
    pub fn on_all(&self) -> mpsc::UnboundedReceiver<Notification> {
        self.events.bus().subscribe_all()
    }

    /// Append `text` to the companion's prompt on `port`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unreachable` or `AppError::InvalidResponse`.
    pub async fn append_text(&self, port: u16, text: &str) -> Result<()> {
        self.requests.append_text(port, text).await
    }

    /// Run `command` on the companion on `port`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unreachable` or `AppError::InvalidResponse`.
    pub async fn execute_command(&self, port: u16, command: &str) -> Result<()> {
        self.requests.execute_command(port, command).await
    }

    /// Ask the companion on `port` to exit.
    pub async fn request_shutdown(&self, port: u16) -> bool {
        self.requests.request_shutdown(port).await
    }

    /// Stop any launch polling and close the subscription.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.events.unsubscribe();
        info!("bridge shut down");
    }
}
