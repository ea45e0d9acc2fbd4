//! Topic-keyed fan-out of stream events and connection lifecycle changes.
//!
//! Collaborators subscribe by topic: an event type string such as
//! `file.edited`, one of the lifecycle topics below, or [`TOPIC_ALL`].
//! Delivery uses unbounded channels so publishing never blocks the stream
//! task and per-subscriber order matches publish order.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::protocol::ServerEvent;

/// Topic receiving every notification.
pub const TOPIC_ALL: &str = "*";
/// First frame arrived on a new subscription.
pub const TOPIC_CONNECTED: &str = "bridge.connected";
/// A live subscription failed (heartbeat timeout or transport error).
pub const TOPIC_CONNECTION_LOST: &str = "bridge.connection_lost";
/// A live subscription was closed by `unsubscribe`.
pub const TOPIC_DISCONNECTED: &str = "bridge.disconnected";
/// A subscription could not be established.
pub const TOPIC_SUBSCRIBE_FAILED: &str = "bridge.subscribe_failed";
/// A frame arrived that is not a valid event record.
pub const TOPIC_DECODE_FAILED: &str = "bridge.decode_failed";

/// Everything the bus can deliver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// Subscription on `port` is live.
    Connected {
        /// Companion port.
        port: u16,
    },
    /// Subscription on `port` died; a reconnect has been scheduled.
    ConnectionLost {
        /// Companion port.
        port: u16,
        /// Why the connection was declared dead.
        reason: String,
    },
    /// Subscription on `port` was closed on request.
    Disconnected {
        /// Companion port.
        port: u16,
    },
    /// Opening a subscription on `port` failed before any frame arrived.
    SubscribeFailed {
        /// Companion port.
        port: u16,
        /// One-line advisory.
        reason: String,
    },
    /// A decoded event record.
    Event {
        /// Companion port the event arrived on.
        port: u16,
        /// The record itself.
        event: ServerEvent,
    },
    /// A frame that could not be decoded.
    DecodeFailed {
        /// Companion port the frame arrived on.
        port: u16,
        /// Decoder error message.
        message: String,
    },
}

impl Notification {
    /// Topic this notification is published under.
    #[must_use]
    pub fn topic(&self) -> &str {
        match self {
            Self::Connected { .. } => TOPIC_CONNECTED,
            Self::ConnectionLost { .. } => TOPIC_CONNECTION_LOST,
            Self::Disconnected { .. } => TOPIC_DISCONNECTED,
            Self::SubscribeFailed { .. } => TOPIC_SUBSCRIBE_FAILED,
            Self::Event { event, .. } => &event.event_type,
            Self::DecodeFailed { .. } => TOPIC_DECODE_FAILED,
        }
    }
}

/// Subscriber registry.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>>,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every notification published under `topic`.
    pub fn subscribe(&self, topic: impl Into<String>) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers()
            .entry(topic.into())
            .or_default()
            .push(tx);
        rx
    }

    /// Receive every notification regardless of topic.
    pub fn subscribe_all(&self) -> mpsc::UnboundedReceiver<Notification> {
        self.subscribe(TOPIC_ALL)
    }

    /// Deliver `notification` to its topic's subscribers and to
    /// [`TOPIC_ALL`] subscribers. Dropped receivers are pruned.
    ///
    /// Returns the number of receivers reached.
    pub fn publish(&self, notification: &Notification) -> usize {
        let mut subscribers = self.subscribers();
        let mut delivered = 0;

        let topic = notification.topic();
        let wildcard = (topic != TOPIC_ALL).then_some(TOPIC_ALL);
        for topic in std::iter::once(topic).chain(wildcard) {
            if let Some(senders) = subscribers.get_mut(topic) {
                senders.retain(|tx| tx.send(notification.clone()).is_ok());
                delivered += senders.len();
            }
        }
        subscribers.retain(|_, senders| !senders.is_empty());
        delivered
    }

    /// Live receivers registered for `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers().get(topic).map_or(0, Vec::len)
    }

    fn subscribers(
        &self,
    ) -> MutexGuard<'_, HashMap<String, Vec<mpsc::UnboundedSender<Notification>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
