//! # Vehicle Property Broker
//!
//! Exposes a fixed set of typed vehicle properties (speed, door state, HVAC
//! settings) to many clients. Clients list, read and write properties and
//! subscribe to value changes at a bounded sample rate.
//!
//! ## Overview
//!
//! - **Per-property handlers**: every property is served by a
//!   [`PropertyHandler`] strategy object bound in an immutable
//!   [`HandlerRegistry`]
//! - **Rate-limited subscriptions**: a listener receives at most `rate`
//!   notifications per second for each property it subscribed to
//! - **Isolated delivery**: each listener has its own queue and worker; a slow
//!   or dead listener never delays a setter or another listener
//! - **Disconnect detection**: repeated delivery failures drop the listener
//!   and all of its subscriptions
//!
//! ## Usage
//!
//! ```rust
//! use property_broker::prelude::*;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), BrokerError> {
//! let registry = HandlerRegistry::builder()
//!     .register_in_memory(PropertyConfig::continuous(0x0207, ValueType::Float, 1.0, 10.0))
//!     .build()?;
//! let broker = PropertyBroker::new(registry)?;
//!
//! let (listener, mut events) = ChannelListener::new();
//! let handle = broker.connect(listener);
//! broker.subscribe(&handle, PropertyId::new(0x0207), 5.0)?;
//!
//! broker.set_property(PropertyValue::new(PropertyId::new(0x0207), RawValue::Float(42.0)))?;
//!
//! let event = events.recv_timeout(Duration::from_secs(1)).await;
//! assert_eq!(event.map(|e| e.value), Some(RawValue::Float(42.0)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! 1. `PropertyBroker` validates the request and resolves the handler
//! 2. The handler accepts or rejects the operation and publishes accepted
//!    values to the [`NotificationDispatcher`] through [`ChangeSink`]
//! 3. The dispatcher snapshots the [`SubscriptionTable`] and enqueues the
//!    value for every subscriber
//! 4. Each listener's worker throttles, delivers with a timeout and counts
//!    failures

pub mod broker;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod registry;
pub mod subscription;
pub mod types;

pub use broker::{BrokerStats, ListenerState, PropertyBroker};
pub use builder::BrokerBuilder;
pub use catalog::{CatalogEntry, DefaultValue, PropertyCatalog};
pub use config::BrokerConfig;
pub use dispatcher::{DispatcherStats, NotificationDispatcher};
pub use error::{BrokerError, BrokerResult, DeliveryError, FaultCode, PropertyError, PropertyResult};
pub use handler::{ChangeSink, InMemoryHandler, NullSink, PropertyHandler};
pub use listener::{ChannelListener, EventReceiver, ListenerHandle, PropertyEventListener};
pub use registry::{HandlerBinding, HandlerRegistry, HandlerRegistryBuilder, RegistryStats};
pub use subscription::{ListenerRemoval, ListenerSnapshot, Removal, Subscriber, SubscriptionTable};
pub use types::{
    AccessMode, AreaId, ChangeMode, ListenerId, PropertyConfig, PropertyId, PropertyRequest,
    PropertyValue, RawValue, ValueType,
};

#[cfg(any(test, feature = "test-support"))]
pub use handler::FailingHandler;

/// Prelude module for convenient imports
///
/// ```rust
/// use property_broker::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        AreaId, BrokerBuilder, BrokerConfig, BrokerError, BrokerResult, ChannelListener,
        HandlerRegistry, ListenerHandle, PropertyBroker, PropertyConfig, PropertyError,
        PropertyEventListener, PropertyHandler, PropertyId, PropertyValue, RawValue, ValueType,
    };
}
