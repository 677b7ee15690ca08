//! Listener callback interface (broker → client)
//!
//! The transport wraps each remote subscriber in a [`PropertyEventListener`]
//! and hands it to the broker as a [`ListenerHandle`]. The broker calls
//! `on_property_event` from a per-listener delivery task, never from the
//! thread that performed the triggering set.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::error::DeliveryError;
use crate::types::{ListenerId, PropertyValue};

/// Callback invoked once per delivered notification.
#[async_trait]
pub trait PropertyEventListener: Send + Sync {
    /// Deliver one value change.
    ///
    /// Returning an error (or exceeding the broker's delivery timeout) counts
    /// toward the listener's disconnect threshold.
    async fn on_property_event(&self, value: PropertyValue) -> Result<(), DeliveryError>;
}

/// A listener identity paired with its callback.
///
/// Equality and hashing use the id only.
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    callback: Arc<dyn PropertyEventListener>,
}

impl ListenerHandle {
    pub fn new(id: ListenerId, callback: Arc<dyn PropertyEventListener>) -> Self {
        Self { id, callback }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn callback(&self) -> &Arc<dyn PropertyEventListener> {
        &self.callback
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ListenerHandle").field(&self.id).finish()
    }
}

/// In-process listener that forwards events into a channel.
///
/// Dropping the paired [`EventReceiver`] makes every further delivery fail
/// with `DeliveryError::Unreachable`, which is how a vanished client looks
/// to the broker.
pub struct ChannelListener {
    sender: mpsc::UnboundedSender<PropertyValue>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), EventReceiver { receiver })
    }
}

#[async_trait]
impl PropertyEventListener for ChannelListener {
    async fn on_property_event(&self, value: PropertyValue) -> Result<(), DeliveryError> {
        self.sender
            .send(value)
            .map_err(|_| DeliveryError::Unreachable("event receiver dropped".to_string()))
    }
}

/// Receiving side of a [`ChannelListener`]
pub struct EventReceiver {
    receiver: mpsc::UnboundedReceiver<PropertyValue>,
}

impl EventReceiver {
    /// Wait for the next event; `None` once the listener is gone
    pub async fn recv(&mut self) -> Option<PropertyValue> {
        self.receiver.recv().await
    }

    /// Wait for the next event for at most `duration`
    pub async fn recv_timeout(&mut self, duration: Duration) -> Option<PropertyValue> {
        timeout(duration, self.receiver.recv()).await.ok().flatten()
    }

    /// Take an event if one is already queued
    pub fn try_recv(&mut self) -> Option<PropertyValue> {
        self.receiver.try_recv().ok()
    }

    /// Take every event queued right now
    pub fn drain(&mut self) -> Vec<PropertyValue> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}
