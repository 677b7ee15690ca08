//! Client-facing broker service
//!
//! `PropertyBroker` is what the transport calls on behalf of remote clients.
//! It validates arguments, resolves the handler for the addressed property,
//! enforces access modes and writes subscriptions through to the table once
//! the handler accepted the rate. Errors come back as `BrokerError`, which the
//! transport turns into a [`FaultCode`](crate::FaultCode).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::config::BrokerConfig;
use crate::dispatcher::{DispatcherStats, NotificationDispatcher};
use crate::error::{BrokerError, BrokerResult, PropertyError};
use crate::listener::{ListenerHandle, PropertyEventListener};
use crate::registry::{HandlerBinding, HandlerRegistry, RegistryStats};
use crate::subscription::{ListenerRemoval, Removal, SubscriptionTable};
use crate::types::{AreaId, ListenerId, PropertyConfig, PropertyId, PropertyRequest, PropertyValue};

/// Connection state of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Connected, no subscriptions
    Connected,
    /// Subscribed to this many properties
    Subscribed(usize),
    /// Removed, either explicitly or after repeated delivery failures, or
    /// never issued by this broker
    Disconnected,
}

/// The property broker service
pub struct PropertyBroker {
    registry: Arc<HandlerRegistry>,
    table: Arc<SubscriptionTable>,
    dispatcher: NotificationDispatcher,
    config: BrokerConfig,
    next_listener_id: AtomicU64,
}

impl PropertyBroker {
    /// Create a broker with the default configuration.
    ///
    /// Must be called from within a tokio runtime; delivery workers run on it.
    pub fn new(registry: HandlerRegistry) -> BrokerResult<Self> {
        Self::with_config(registry, BrokerConfig::default())
    }

    /// Create a broker with a custom configuration on the current runtime
    pub fn with_config(registry: HandlerRegistry, config: BrokerConfig) -> BrokerResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| BrokerError::Runtime(format!("no tokio runtime available: {}", e)))?;
        Self::from_parts(Arc::new(registry), config, runtime)
    }

    pub(crate) fn from_parts(
        registry: Arc<HandlerRegistry>,
        config: BrokerConfig,
        runtime: Handle,
    ) -> BrokerResult<Self> {
        config.validate()?;

        let table = Arc::new(SubscriptionTable::new());
        let dispatcher = NotificationDispatcher::new(
            Arc::clone(&table),
            Arc::clone(&registry),
            config.clone(),
            runtime,
        );

        tracing::info!("Property broker started with {} properties", registry.len());

        Ok(Self {
            registry,
            table,
            dispatcher,
            config,
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Register a client callback and get the handle used to subscribe it
    pub fn connect(&self, callback: Arc<dyn PropertyEventListener>) -> ListenerHandle {
        let id = ListenerId::new(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.dispatcher.connect(id);
        tracing::debug!("{} connected", id);
        ListenerHandle::new(id, callback)
    }

    /// Configs matching `filter`, or all of them for [`PropertyId::WILDCARD`]
    pub fn list_properties(&self, filter: PropertyId) -> Vec<PropertyConfig> {
        self.registry.list_properties(filter)
    }

    /// Current value of a property in one area
    pub fn get_property(&self, property_id: PropertyId, area_id: AreaId) -> BrokerResult<PropertyValue> {
        let binding = self.target(property_id)?;
        if !binding.config.access.is_readable() {
            return Err(PropertyError::AccessDenied {
                property_id,
                operation: "read",
            }
            .into());
        }

        Ok(binding
            .handler
            .on_property_get(PropertyRequest::new(property_id, area_id))?)
    }

    /// Write a value.
    ///
    /// Returns once the handler accepted the value; listeners are notified in
    /// the background.
    pub fn set_property(&self, value: PropertyValue) -> BrokerResult<()> {
        let property_id = value.property_id;
        let binding = self.target(property_id)?;
        if !binding.config.access.is_writable() {
            return Err(PropertyError::AccessDenied {
                property_id,
                operation: "write",
            }
            .into());
        }

        binding.handler.on_property_set(value, &self.dispatcher)?;
        tracing::trace!("Set {}", binding.config.label());
        Ok(())
    }

    /// Subscribe `listener` to `property_id` at `sample_rate` Hz.
    ///
    /// A repeated subscribe replaces the rate. A rate of zero asks for every
    /// change, which only on-change properties accept.
    pub fn subscribe(
        &self,
        listener: &ListenerHandle,
        property_id: PropertyId,
        sample_rate: f32,
    ) -> BrokerResult<()> {
        let listener_id = listener.id();
        if self.dispatcher.is_disconnected(listener_id) {
            return Err(BrokerError::ListenerDisconnected(listener_id));
        }

        let binding = self.target(property_id)?;
        let config = &binding.config;

        if !sample_rate.is_finite() || sample_rate < 0.0 {
            return Err(PropertyError::InvalidRate {
                property_id,
                rate: sample_rate,
                min: config.min_sample_rate,
                max: config.max_sample_rate,
            }
            .into());
        }

        if !config.access.is_readable() {
            return Err(PropertyError::AccessDenied {
                property_id,
                operation: "subscribe",
            }
            .into());
        }

        binding.handler.on_property_subscribe(property_id, sample_rate)?;
        self.table.subscribe(listener.clone(), property_id, sample_rate);

        // A failure-driven disconnect may have raced with this subscribe
        if self.dispatcher.is_disconnected(listener_id) {
            self.table.remove_listener(listener_id);
            return Err(BrokerError::ListenerDisconnected(listener_id));
        }

        if self.config.deliver_initial_value {
            for area_id in &config.area_ids {
                match binding
                    .handler
                    .on_property_get(PropertyRequest::new(property_id, *area_id))
                {
                    Ok(value) => self.dispatcher.deliver_initial(listener, value, sample_rate),
                    Err(e) => tracing::trace!("No initial value for {}: {}", config.label(), e),
                }
            }
        }

        Ok(())
    }

    /// Drop the subscription of `listener_id` to `property_id`.
    ///
    /// Unsubscribing something that is not subscribed, or a property that does
    /// not exist, is a no-op. The handler hears about it only when the last
    /// subscriber of the property leaves.
    pub fn unsubscribe(&self, listener_id: ListenerId, property_id: PropertyId) -> BrokerResult<()> {
        let binding = match self.target(property_id) {
            Ok(binding) => binding,
            Err(e) => {
                tracing::trace!("Ignoring unsubscribe of {} from {}: {}", listener_id, property_id, e);
                return Ok(());
            }
        };

        match self.table.unsubscribe(listener_id, property_id) {
            Removal::NotSubscribed => {}
            Removal::Removed { last } => {
                if !self.dispatcher.release_if_idle(listener_id) {
                    self.dispatcher.reset(listener_id, property_id);
                }
                if last {
                    binding.handler.on_property_unsubscribe(property_id);
                }
            }
        }
        Ok(())
    }

    /// Remove a listener and every subscription it holds
    pub fn disconnect(&self, listener_id: ListenerId) -> ListenerRemoval {
        self.dispatcher.disconnect(listener_id)
    }

    pub fn listener_state(&self, listener_id: ListenerId) -> ListenerState {
        if self.dispatcher.is_disconnected(listener_id) {
            return ListenerState::Disconnected;
        }

        match self.table.properties_of(listener_id).len() {
            0 => ListenerState::Connected,
            n => ListenerState::Subscribed(n),
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn subscriptions(&self) -> &SubscriptionTable {
        &self.table
    }

    /// Dump of the broker's registry, subscriptions and delivery counters
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            registry_stats: self.registry.stats(),
            subscription_count: self.table.len(),
            listeners_connected: self.dispatcher.connected_count(),
            listeners_issued: self.next_listener_id.load(Ordering::Relaxed) - 1,
            dispatcher_stats: self.dispatcher.stats(),
        }
    }

    fn target(&self, property_id: PropertyId) -> BrokerResult<&HandlerBinding> {
        if property_id.is_wildcard() {
            return Err(PropertyError::UnknownProperty(property_id).into());
        }
        Ok(self.registry.binding(property_id)?)
    }
}

impl fmt::Debug for PropertyBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyBroker")
            .field("properties", &self.registry.len())
            .field("subscriptions", &self.table.len())
            .field("config", &self.config)
            .finish()
    }
}

/// Statistics about the broker
#[derive(Debug, Clone)]
pub struct BrokerStats {
    pub registry_stats: RegistryStats,
    pub subscription_count: usize,
    /// Listeners connected and not yet disconnected
    pub listeners_connected: usize,
    /// Listener handles issued by `connect` over the broker's lifetime
    pub listeners_issued: u64,
    pub dispatcher_stats: DispatcherStats,
}

impl fmt::Display for BrokerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PropertyBroker Stats ===")?;
        writeln!(
            f,
            "Listeners connected: {} (issued {})",
            self.listeners_connected, self.listeners_issued
        )?;
        writeln!(f, "Subscriptions: {}", self.subscription_count)?;
        writeln!(f)?;
        write!(f, "{}", self.registry_stats)?;
        writeln!(f)?;
        write!(f, "{}", self.dispatcher_stats)?;
        Ok(())
    }
}
