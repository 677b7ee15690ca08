//! Error types for the property broker.

use std::time::Duration;

use crate::types::{AreaId, ListenerId, PropertyId, ValueType};

/// Errors raised by property handlers and surfaced to the calling client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    /// The id is not part of the registry
    #[error("Unknown property: {0}")]
    UnknownProperty(PropertyId),

    /// The handler rejected a written value; the property is unchanged
    #[error("Invalid value for property {property_id}: {reason}")]
    InvalidValue {
        property_id: PropertyId,
        reason: String,
    },

    /// The requested sample rate is outside the configured bounds
    #[error("Invalid sample rate {rate} Hz for property {property_id} (allowed {min}..={max})")]
    InvalidRate {
        property_id: PropertyId,
        rate: f32,
        min: f32,
        max: f32,
    },

    /// No value has been produced yet and there is no default
    #[error("Property {property_id} area {area_id} has no value available")]
    NotAvailable {
        property_id: PropertyId,
        area_id: AreaId,
    },

    /// The property's access mode does not allow the operation
    #[error("Property {property_id} does not allow {operation}")]
    AccessDenied {
        property_id: PropertyId,
        operation: &'static str,
    },
}

impl PropertyError {
    pub fn invalid_value(property_id: PropertyId, reason: impl Into<String>) -> Self {
        PropertyError::InvalidValue {
            property_id,
            reason: reason.into(),
        }
    }

    pub fn type_mismatch(property_id: PropertyId, expected: ValueType, actual: ValueType) -> Self {
        Self::invalid_value(
            property_id,
            format!("expected {} payload, got {}", expected, actual),
        )
    }
}

/// Errors from delivering a notification to a listener.
///
/// These never reach the thread that performed the triggering set; they only
/// count toward the listener's disconnect threshold.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    /// The listener's endpoint is gone
    #[error("Listener unreachable: {0}")]
    Unreachable(String),

    /// The delivery attempt did not finish in time
    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),

    /// The listener refused the event
    #[error("Listener rejected event: {0}")]
    Rejected(String),
}

/// Errors returned by the broker facade.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A handler-level error for the addressed property
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// The listener was disconnected and cannot subscribe again
    #[error("Listener {0} is disconnected")]
    ListenerDisconnected(ListenerId),

    /// Invalid configuration provided
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// No async runtime is available to run delivery workers
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// The property catalog could not be read or parsed
    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl BrokerError {
    /// The handler error behind this broker error, if any
    pub fn property_error(&self) -> Option<&PropertyError> {
        match self {
            BrokerError::Property(e) => Some(e),
            _ => None,
        }
    }
}

/// Fault codes reported to remote clients by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum FaultCode {
    UnknownProperty = 1,
    InvalidValue = 2,
    InvalidRate = 3,
    NotAvailable = 4,
    AccessDenied = 5,
    ListenerDisconnected = 6,
    Internal = 100,
}

impl FaultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

impl From<&PropertyError> for FaultCode {
    fn from(error: &PropertyError) -> Self {
        match error {
            PropertyError::UnknownProperty(_) => FaultCode::UnknownProperty,
            PropertyError::InvalidValue { .. } => FaultCode::InvalidValue,
            PropertyError::InvalidRate { .. } => FaultCode::InvalidRate,
            PropertyError::NotAvailable { .. } => FaultCode::NotAvailable,
            PropertyError::AccessDenied { .. } => FaultCode::AccessDenied,
        }
    }
}

impl From<&BrokerError> for FaultCode {
    fn from(error: &BrokerError) -> Self {
        match error {
            BrokerError::Property(e) => FaultCode::from(e),
            BrokerError::ListenerDisconnected(_) => FaultCode::ListenerDisconnected,
            BrokerError::Configuration(_) | BrokerError::Runtime(_) | BrokerError::Catalog(_) => {
                FaultCode::Internal
            }
        }
    }
}

/// Result type for handler operations
pub type PropertyResult<T> = std::result::Result<T, PropertyError>;

/// Result type for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
