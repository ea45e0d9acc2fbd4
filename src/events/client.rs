//! Streaming event client.
//!
//! Owns the single event-stream connection and its heartbeat timer.
//!
//! ```text
//!                subscribe(port)              first frame
//! Disconnected ─────────────────▶ Connecting ─────────────▶ Connected ◀─┐
//!      ▲                              │                         │  frame │
//!      │ unsubscribe()                │ open/stream failure     ├────────┘
//!      ├──────────────────────────────┤                         │
//!      │                              ▼                         │ heartbeat timeout,
//!      │                         Disconnected                   │ stream error or EOF
//!      │ resolve fails                                          ▼
//!      └───────────────────────────────────────────────── Reconnecting
//!                                   resolve ok → subscribe(port) → Connecting
//! ```
//!
//! Every transition happens under one lock and bumps or checks a generation
//! counter. The connection task and the reconnect task each carry the
//! generation they were spawned for and drop out silently once it is stale,
//! so a torn-down connection can never publish or resurrect `Connected`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::discovery::resolver::ResolvePort;
use crate::events::bus::{EventBus, Notification};
use crate::events::codec::SseCodec;
use crate::events::source::EventSource;
use crate::protocol::ServerEvent;
use crate::retry::{retry_until, RetryPolicy};
use crate::Result;

/// Connection state machine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No connection and no pending reconnect.
    Disconnected,
    /// Stream requested; no frame received yet.
    Connecting,
    /// At least one frame received; heartbeat armed.
    Connected,
    /// Connection lost; a resolve-and-resubscribe attempt is scheduled.
    Reconnecting,
}

/// Snapshot returned by [`EventClient::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    /// Whether the stream is in the `Connected` phase.
    pub connected: bool,
    /// Port of the current or pending connection.
    pub port: Option<u16>,
}

/// Timing knobs for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimings {
    /// Silence window after which the stream is declared dead. Should exceed
    /// the server's heartbeat interval.
    pub heartbeat_timeout: Duration,
    /// Schedule for the resolve-and-resubscribe after a lost connection.
    pub reconnect: RetryPolicy,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(35),
            reconnect: RetryPolicy::new(Duration::from_secs(1), 1),
        }
    }
}

/// A spawned task plus the token that stops it.
struct TaskHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TaskHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

struct State {
    phase: ConnectionPhase,
    port: Option<u16>,
    generation: u64,
    connection: Option<TaskHandle>,
    reconnect: Option<TaskHandle>,
}

impl State {
    /// Stop every task and return to `Disconnected`, invalidating the
    /// current generation.
    fn teardown(&mut self) {
        self.generation += 1;
        if let Some(connection) = self.connection.take() {
            connection.stop();
        }
        if let Some(reconnect) = self.reconnect.take() {
            reconnect.stop();
        }
        self.phase = ConnectionPhase::Disconnected;
        self.port = None;
    }
}

struct Shared {
    state: Mutex<State>,
    bus: Arc<EventBus>,
    source: Arc<dyn EventSource>,
    resolver: Arc<dyn ResolvePort>,
    timings: ClientTimings,
}

/// Handle to the process-wide event subscription. Clones share state.
#[derive(Clone)]
pub struct EventClient {
    shared: Arc<Shared>,
}

impl EventClient {
    /// Create a disconnected client.
    ///
    /// `resolver` is consulted only by the automatic reconnect; it is always
    /// called without permission to launch.
    #[must_use]
    pub fn new(
        source: Arc<dyn EventSource>,
        resolver: Arc<dyn ResolvePort>,
        bus: Arc<EventBus>,
        timings: ClientTimings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    phase: ConnectionPhase::Disconnected,
                    port: None,
                    generation: 0,
                    connection: None,
                    reconnect: None,
                }),
                bus,
                source,
                resolver,
                timings,
            }),
        }
    }

    /// Subscribe to the event stream on `port`.
    ///
    /// A no-op when already connected (or connecting) to `port`. Otherwise
    /// any existing connection and any pending reconnect are torn down
    /// synchronously before the new connection task is spawned.
    ///
    /// # Transitions
    ///
    /// `Disconnected | Reconnecting | Connected(other) | Connecting(other)`
    /// → `Connecting(port)`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime (spawns the connection task).
    ///
    /// Returns `true` when a new connection was started.
    pub fn subscribe(&self, port: u16) -> bool {
        let mut state = self.state();
        self.subscribe_locked(&mut state, port)
    }

    /// Close the subscription. Never schedules a reconnect.
    ///
    /// Cancels the connection task and any pending reconnect, and bumps the
    /// generation so neither can publish afterwards.
    ///
    /// # Transitions
    ///
    /// Any phase → `Disconnected`. Publishes [`Notification::Disconnected`]
    /// only when leaving `Connected`.
    pub fn unsubscribe(&self) {
        let mut state = self.state();
        let was_connected = state.phase == ConnectionPhase::Connected;
        let port = state.port;
        state.teardown();
        info!(generation = state.generation, "event stream unsubscribed");

        if let (true, Some(port)) = (was_connected, port) {
            self.shared.bus.publish(&Notification::Disconnected { port });
        }
    }

    /// Whether the stream is in the `Connected` phase.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().phase == ConnectionPhase::Connected
    }

    /// Current phase of the state machine.
    #[must_use]
    pub fn phase(&self) -> ConnectionPhase {
        self.state().phase
    }

    /// Connected flag and port.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let state = self.state();
        ConnectionStatus {
            connected: state.phase == ConnectionPhase::Connected,
            port: state.port,
        }
    }

    /// Bus this client publishes to.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// [`Self::subscribe`] with the state lock already held, so the
    /// reconnect task can resubscribe atomically with its generation check.
    fn subscribe_locked(&self, state: &mut State, port: u16) -> bool {
        let live = matches!(
            state.phase,
            ConnectionPhase::Connected | ConnectionPhase::Connecting
        );
        if live && state.port == Some(port) {
            debug!(port, "already subscribed, ignoring");
            return false;
        }

        state.teardown();
        state.phase = ConnectionPhase::Connecting;
        state.port = Some(port);

        let generation = state.generation;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            self.clone()
                .run_connection(generation, port, cancel.clone())
                .instrument(info_span!("event_stream", port, generation)),
        );
        state.connection = Some(TaskHandle { cancel, task });

        info!(port, generation, "event stream connecting");
        true
    }

    /// Connection task for one generation.
    ///
    /// Opens the stream, then pumps [`SseCodec`] frames until one of:
    ///
    /// - `cancel` fires: exits without publishing anything.
    /// - the heartbeat window elapses without a frame: [`Self::on_failure`]
    ///   with `"heartbeat timeout"`.
    /// - the transport fails ([`AppError::Io`](crate::AppError::Io)) or the
    ///   server closes the stream: [`Self::on_failure`].
    ///
    /// Every frame, including one the codec dropped as oversized, rearms the
    /// heartbeat for a full window and goes to [`Self::on_frame`]; decode
    /// problems never end the connection.
    async fn run_connection(self, generation: u64, port: u16, cancel: CancellationToken) {
        let opened = tokio::select! {
            () = cancel.cancelled() => return,
            opened = self.shared.source.open(port) => opened,
        };

        let stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                self.on_failure(generation, port, &err.to_string());
                return;
            }
        };

        let mut frames = FramedRead::new(StreamReader::new(stream), SseCodec::new());
        let timeout = self.shared.timings.heartbeat_timeout;
        let heartbeat = tokio::time::sleep(timeout);
        tokio::pin!(heartbeat);

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("event stream cancelled");
                    return;
                }

                () = &mut heartbeat => {
                    warn!(?timeout, "no event within heartbeat window");
                    self.on_failure(generation, port, "heartbeat timeout");
                    return;
                }

                frame = frames.next() => match frame {
                    Some(Ok(decoded)) => {
                        heartbeat.as_mut().reset(Instant::now() + timeout);
                        if !self.on_frame(generation, port, decoded) {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, "event stream failed");
                        self.on_failure(generation, port, &err.to_string());
                        return;
                    }
                    None => {
                        info!("event stream closed by server");
                        self.on_failure(generation, port, "stream closed");
                        return;
                    }
                },
            }
        }
    }

    /// Publish one frame.
    ///
    /// The first frame of a connection moves `Connecting` → `Connected` and
    /// publishes [`Notification::Connected`]. A payload that decodes into a
    /// [`ServerEvent`] is published on its event-type topic; anything else
    /// (bad JSON, missing `type`, an oversized frame) is published as
    /// [`Notification::DecodeFailed`] and the connection stays up.
    ///
    /// Returns `false` if this connection's generation is stale.
    fn on_frame(&self, generation: u64, port: u16, decoded: Result<String>) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            return false;
        }

        let bus = &self.shared.bus;
        if state.phase == ConnectionPhase::Connecting {
            state.phase = ConnectionPhase::Connected;
            info!(port, "event stream connected");
            bus.publish(&Notification::Connected { port });
        }

        match decoded.and_then(|payload| ServerEvent::parse(&payload)) {
            Ok(event) => {
                debug!(event_type = %event.event_type, "event received");
                bus.publish(&Notification::Event { port, event });
            }
            Err(err) => {
                warn!(%err, "undecodable event frame");
                bus.publish(&Notification::DecodeFailed {
                    port,
                    message: err.to_string(),
                });
            }
        }
        true
    }

    /// Handle the end of a connection that was not requested by the caller.
    ///
    /// # Transitions
    ///
    /// - `Connected` → `Reconnecting`: publishes
    ///   [`Notification::ConnectionLost`] and spawns [`Self::run_reconnect`]
    ///   under the new generation.
    /// - `Connecting` → `Disconnected`: publishes
    ///   [`Notification::SubscribeFailed`]; nothing is retried.
    ///
    /// A stale generation is ignored.
    fn on_failure(&self, generation: u64, port: u16, reason: &str) {
        let mut state = self.state();
        if state.generation != generation {
            return;
        }

        let was_connected = state.phase == ConnectionPhase::Connected;
        // This runs on the connection task itself, so release the handle
        // instead of aborting it.
        state.connection = None;
        state.teardown();

        if !was_connected {
            warn!(port, reason, "event stream could not be established");
            self.shared.bus.publish(&Notification::SubscribeFailed {
                port,
                reason: reason.to_owned(),
            });
            return;
        }

        state.phase = ConnectionPhase::Reconnecting;
        let retry_generation = state.generation;
        warn!(port, reason, "event stream lost, scheduling reconnect");
        self.shared.bus.publish(&Notification::ConnectionLost {
            port,
            reason: reason.to_owned(),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            self.clone()
                .run_reconnect(retry_generation, cancel.clone())
                .instrument(info_span!("event_reconnect", generation = retry_generation)),
        );
        state.reconnect = Some(TaskHandle { cancel, task });
    }

    /// Reconnect task: one delayed resolve (never launching), then
    /// `Reconnecting` → `Connecting` on success or `Reconnecting` →
    /// `Disconnected` on failure. Drops out silently if the generation moved
    /// on while it was waiting.
    async fn run_reconnect(self, generation: u64, cancel: CancellationToken) {
        let resolver = Arc::clone(&self.shared.resolver);
        let resolved = retry_until(self.shared.timings.reconnect, &cancel, |attempt| {
            debug!(attempt, "resolving companion for reconnect");
            resolver.resolve_port(false)
        })
        .await;

        let mut state = self.state();
        if state.generation != generation || state.phase != ConnectionPhase::Reconnecting {
            return;
        }
        state.reconnect = None;

        match resolved {
            Ok(port) => {
                info!(port, "reconnecting event stream");
                self.subscribe_locked(&mut state, port);
            }
            Err(err) => {
                info!(%err, "reconnect found no companion, staying disconnected");
                state.teardown();
            }
        }
    }
}
