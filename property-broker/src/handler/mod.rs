//! Per-property handler contract.
//!
//! A `PropertyHandler` implements get/set/subscribe/unsubscribe for one
//! property or one group of properties. The broker resolves the handler for
//! every incoming operation through the [`HandlerRegistry`](crate::HandlerRegistry)
//! and never holds a lock while calling into it, so a slow or failing handler
//! only affects its own properties.
//!
//! # Thread Safety
//!
//! Handlers are shared between all client threads and must be `Send + Sync`.
//! Each implementation is responsible for its own internal locking; the broker
//! may call any method concurrently for the same property.
//!
//! # Example
//!
//! ```rust
//! use property_broker::{
//!     ChangeSink, PropertyError, PropertyHandler, PropertyId, PropertyRequest, PropertyResult,
//!     PropertyValue,
//! };
//!
//! struct ReadOnlyConstant(PropertyValue);
//!
//! impl PropertyHandler for ReadOnlyConstant {
//!     fn on_property_set(&self, value: PropertyValue, _sink: &dyn ChangeSink) -> PropertyResult<()> {
//!         Err(PropertyError::invalid_value(value.property_id, "constant"))
//!     }
//!
//!     fn on_property_get(&self, _hint: PropertyRequest) -> PropertyResult<PropertyValue> {
//!         Ok(self.0.clone())
//!     }
//!
//!     fn on_property_subscribe(&self, _property_id: PropertyId, _sample_rate: f32) -> PropertyResult<()> {
//!         Ok(())
//!     }
//!
//!     fn on_property_unsubscribe(&self, _property_id: PropertyId) {}
//! }
//! ```

mod in_memory;

#[cfg(any(test, feature = "test-support"))]
mod failing;

pub use in_memory::InMemoryHandler;

#[cfg(any(test, feature = "test-support"))]
pub use failing::FailingHandler;

use crate::error::PropertyResult;
use crate::types::{PropertyId, PropertyRequest, PropertyValue};

/// Receives values accepted by a handler and feeds the notification pipeline.
pub trait ChangeSink: Send + Sync {
    /// Publish a new value. Must not block on listener delivery.
    fn publish(&self, value: PropertyValue);
}

/// Strategy object implementing the operations of one property.
pub trait PropertyHandler: Send + Sync {
    /// Accept a new value.
    ///
    /// Implementations validate the payload, update their state and then call
    /// `sink.publish` with the accepted value. A rejected value must leave the
    /// property unchanged and return `PropertyError::InvalidValue`.
    fn on_property_set(&self, value: PropertyValue, sink: &dyn ChangeSink) -> PropertyResult<()>;

    /// Current value for the property and area named by `hint`.
    ///
    /// Returns `PropertyError::NotAvailable` if nothing was ever set and there
    /// is no default.
    fn on_property_get(&self, hint: PropertyRequest) -> PropertyResult<PropertyValue>;

    /// Accept or reject a subscription rate.
    ///
    /// The handler does not store who subscribed; the broker records the
    /// subscription only after this returns `Ok`.
    fn on_property_subscribe(&self, property_id: PropertyId, sample_rate: f32) -> PropertyResult<()>;

    /// The last subscriber of `property_id` went away. Must be idempotent.
    fn on_property_unsubscribe(&self, property_id: PropertyId);
}

/// A sink that drops every value, for handlers driven outside a broker.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChangeSink for NullSink {
    fn publish(&self, _value: PropertyValue) {}
}
