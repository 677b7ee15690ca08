//! Notification fan-out from handlers to listeners
//!
//! Every listener gets its own bounded FIFO queue and a worker task on the
//! broker's runtime. `publish` only snapshots the subscribers and enqueues, so
//! a setter never waits for delivery. The worker applies the subscription's
//! sample-rate throttle, bounds each callback with the delivery timeout and
//! disconnects the listener after too many consecutive failures.
//!
//! A worker only lives while its listener holds subscriptions. Once the last
//! one goes away the queue is released and the worker drains and exits; the
//! next subscribe starts a fresh one.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{timeout, Instant};

use crate::config::BrokerConfig;
use crate::error::DeliveryError;
use crate::handler::ChangeSink;
use crate::listener::ListenerHandle;
use crate::registry::HandlerRegistry;
use crate::subscription::{ListenerRemoval, SubscriptionTable};
use crate::types::{AreaId, ListenerId, PropertyId, PropertyValue};

/// Item in a listener's delivery queue
#[derive(Debug)]
enum Envelope {
    Event {
        value: PropertyValue,
        sample_rate: f32,
        /// Current value sent on subscribe; skipped if a live change for the
        /// same area already went through the queue
        initial: bool,
    },
    /// The listener unsubscribed from a property; forget its throttle state
    Reset(PropertyId),
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    throttled: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    disconnected: AtomicU64,
}

/// Snapshot of the dispatcher's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Values handed to `publish`
    pub published: u64,
    /// Successful `on_property_event` calls
    pub delivered: u64,
    /// Events suppressed by sample-rate throttling
    pub throttled: u64,
    /// Events lost to full queues or exited workers
    pub dropped: u64,
    /// Failed or timed-out deliveries
    pub failed: u64,
    /// Listeners removed, explicitly or after repeated failures
    pub disconnected: u64,
    /// Listeners with a running delivery worker
    pub active_listeners: usize,
}

impl fmt::Display for DispatcherStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dispatcher Stats:")?;
        writeln!(f, "  Active listeners: {}", self.active_listeners)?;
        writeln!(f, "  Published: {}", self.published)?;
        writeln!(f, "  Delivered: {}", self.delivered)?;
        writeln!(f, "  Throttled: {}", self.throttled)?;
        writeln!(f, "  Dropped: {}", self.dropped)?;
        writeln!(f, "  Failed: {}", self.failed)?;
        writeln!(f, "  Disconnected: {}", self.disconnected)?;
        Ok(())
    }
}

struct Shared {
    table: Arc<SubscriptionTable>,
    registry: Arc<HandlerRegistry>,
    config: BrokerConfig,
    queues: DashMap<ListenerId, mpsc::Sender<Envelope>>,
    connected: DashSet<ListenerId>,
}

impl Shared {
    fn disconnect(&self, listener_id: ListenerId, counters: &Counters) -> ListenerRemoval {
        if self.connected.remove(&listener_id).is_none() {
            return ListenerRemoval::default();
        }

        self.queues.remove(&listener_id);
        let removal = self.table.remove_listener(listener_id);

        for property_id in &removal.emptied {
            match self.registry.resolve(*property_id) {
                Ok(handler) => handler.on_property_unsubscribe(*property_id),
                Err(e) => tracing::warn!("No handler to unsubscribe {}: {}", property_id, e),
            }
        }

        counters.disconnected.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "{} disconnected, dropped {} subscriptions",
            listener_id,
            removal.properties.len()
        );
        removal
    }
}

/// Fans published values out to per-listener delivery workers
pub struct NotificationDispatcher {
    shared: Arc<Shared>,
    counters: Arc<Counters>,
    runtime: Handle,
}

impl NotificationDispatcher {
    pub fn new(
        table: Arc<SubscriptionTable>,
        registry: Arc<HandlerRegistry>,
        config: BrokerConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                table,
                registry,
                config,
                queues: DashMap::new(),
                connected: DashSet::new(),
            }),
            counters: Arc::new(Counters::default()),
            runtime,
        }
    }

    /// Start tracking a listener issued by the broker
    pub fn connect(&self, listener_id: ListenerId) {
        self.shared.connected.insert(listener_id);
    }

    /// Queue the current value of a property for a freshly subscribed listener
    pub fn deliver_initial(&self, listener: &ListenerHandle, value: PropertyValue, sample_rate: f32) {
        self.enqueue(
            listener,
            Envelope::Event {
                value,
                sample_rate,
                initial: true,
            },
        );
    }

    /// Tell the listener's worker that `property_id` was unsubscribed
    pub fn reset(&self, listener_id: ListenerId, property_id: PropertyId) {
        let Some(sender) = self.shared.queues.get(&listener_id).map(|s| s.value().clone()) else {
            return;
        };
        if sender.try_send(Envelope::Reset(property_id)).is_err() {
            tracing::debug!("Could not reset {} state for {}", listener_id, property_id);
        }
    }

    /// Remove a listener and all of its subscriptions.
    ///
    /// Handlers whose last subscriber went away get `on_property_unsubscribe`.
    /// Calling this twice is a no-op.
    pub fn disconnect(&self, listener_id: ListenerId) -> ListenerRemoval {
        self.shared.disconnect(listener_id, &self.counters)
    }

    /// True for listeners that were disconnected or never connected
    pub fn is_disconnected(&self, listener_id: ListenerId) -> bool {
        !self.shared.connected.contains(&listener_id)
    }

    pub fn connected_count(&self) -> usize {
        self.shared.connected.len()
    }

    /// Stop the listener's worker if it no longer holds any subscription.
    ///
    /// Returns whether the queue was released. Events already queued are
    /// still delivered before the worker exits.
    pub fn release_if_idle(&self, listener_id: ListenerId) -> bool {
        let table = &self.shared.table;
        let released = self
            .shared
            .queues
            .remove_if(&listener_id, |_, _| table.properties_of(listener_id).is_empty())
            .is_some();

        if released {
            tracing::debug!("Released delivery worker for idle {}", listener_id);
        }
        released
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            disconnected: self.counters.disconnected.load(Ordering::Relaxed),
            active_listeners: self.shared.queues.len(),
        }
    }

    fn enqueue(&self, listener: &ListenerHandle, envelope: Envelope) {
        let listener_id = listener.id();
        if self.is_disconnected(listener_id) {
            return;
        }

        let sender = match self.shared.queues.entry(listener_id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                // Stale snapshot of a listener that has unsubscribed everything
                if self.shared.table.properties_of(listener_id).is_empty() {
                    return;
                }
                entry.insert(self.spawn_worker(listener)).value().clone()
            }
        };

        // Lost a race with disconnect; don't leave a queue behind
        if self.is_disconnected(listener_id) {
            self.shared.queues.remove(&listener_id);
            return;
        }

        match sender.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Queue for {} is full ({} events), dropping notification",
                    listener_id,
                    self.shared.config.listener_queue_capacity
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Worker for {} has exited, dropping notification", listener_id);
            }
        }
    }

    fn spawn_worker(&self, listener: &ListenerHandle) -> mpsc::Sender<Envelope> {
        let (sender, receiver) = mpsc::channel(self.shared.config.listener_queue_capacity);

        let worker = ListenerWorker {
            listener: listener.clone(),
            shared: Arc::downgrade(&self.shared),
            counters: Arc::clone(&self.counters),
            delivery_timeout: self.shared.config.delivery_timeout,
            max_consecutive_failures: self.shared.config.max_consecutive_failures,
        };
        self.runtime.spawn(worker.run(receiver));

        tracing::debug!("Started delivery worker for {}", listener.id());
        sender
    }
}

impl ChangeSink for NotificationDispatcher {
    fn publish(&self, value: PropertyValue) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let snapshot = self.shared.table.listeners_for(value.property_id);
        tracing::trace!(
            "Publishing {} to {} listeners",
            value.property_id,
            snapshot.len()
        );

        for subscriber in &snapshot {
            self.enqueue(
                &subscriber.listener,
                Envelope::Event {
                    value: value.clone(),
                    sample_rate: subscriber.sample_rate,
                    initial: false,
                },
            );
        }
    }
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("listeners", &self.shared.queues.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

struct ListenerWorker {
    listener: ListenerHandle,
    shared: Weak<Shared>,
    counters: Arc<Counters>,
    delivery_timeout: Duration,
    max_consecutive_failures: u32,
}

impl ListenerWorker {
    async fn run(self, mut queue: mpsc::Receiver<Envelope>) {
        let listener_id = self.listener.id();
        let mut last_delivery: HashMap<PropertyId, Instant> = HashMap::new();
        let mut seen: HashSet<(PropertyId, AreaId)> = HashSet::new();
        let mut consecutive_failures = 0u32;

        while let Some(envelope) = queue.recv().await {
            let (value, sample_rate, initial) = match envelope {
                Envelope::Reset(property_id) => {
                    last_delivery.remove(&property_id);
                    seen.retain(|(seen_property, _)| *seen_property != property_id);
                    continue;
                }
                Envelope::Event {
                    value,
                    sample_rate,
                    initial,
                } => (value, sample_rate, initial),
            };

            if !self.is_active() {
                break;
            }

            let key = (value.property_id, value.area_id);
            if initial {
                if seen.contains(&key) {
                    continue;
                }
            } else {
                seen.insert(key);
            }

            let now = Instant::now();
            if let Some(last) = last_delivery.get(&value.property_id) {
                if is_throttled(sample_rate, now.duration_since(*last)) {
                    self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }
            last_delivery.insert(value.property_id, now);

            let property_id = value.property_id;
            match self.deliver(value).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    consecutive_failures += 1;
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "Delivery of {} to {} failed ({}/{}): {}",
                        property_id,
                        listener_id,
                        consecutive_failures,
                        self.max_consecutive_failures,
                        e
                    );

                    if consecutive_failures >= self.max_consecutive_failures {
                        if let Some(shared) = self.shared.upgrade() {
                            shared.disconnect(listener_id, &self.counters);
                        }
                        break;
                    }
                }
            }
        }

        tracing::debug!("Delivery worker for {} stopped", listener_id);
    }

    async fn deliver(&self, value: PropertyValue) -> Result<(), DeliveryError> {
        match timeout(
            self.delivery_timeout,
            self.listener.callback().on_property_event(value),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(self.delivery_timeout)),
        }
    }

    fn is_active(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| shared.connected.contains(&self.listener.id()))
            .unwrap_or(false)
    }
}

/// A rate of zero disables throttling.
///
/// Compares in f64 so that tiny rates, whose interval would not fit in a
/// `Duration`, simply stay throttled.
fn is_throttled(sample_rate: f32, since_last: Duration) -> bool {
    if sample_rate <= 0.0 {
        return false;
    }
    since_last.as_secs_f64() * f64::from(sample_rate) < 1.0
}
