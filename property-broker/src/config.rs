//! Configuration types for the property broker
//!
//! `BrokerConfig` controls notification delivery: how long a single delivery
//! attempt may take, how many consecutive failures mark a listener as gone,
//! and how many undelivered events a listener may have queued.

use std::time::Duration;

use crate::error::{BrokerError, BrokerResult};

/// Configuration for the PropertyBroker
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Upper bound on a single `on_property_event` call
    /// Default: 500 milliseconds
    pub delivery_timeout: Duration,

    /// Consecutive failed or timed-out deliveries before a listener is
    /// treated as disconnected
    /// Default: 3
    pub max_consecutive_failures: u32,

    /// Events queued per listener before new events are dropped
    /// Default: 1000
    pub listener_queue_capacity: usize,

    /// Deliver the current value of every area to a new subscriber
    /// Default: true
    pub deliver_initial_value: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(500),
            max_consecutive_failures: 3,
            listener_queue_capacity: 1000,
            deliver_initial_value: true,
        }
    }
}

impl BrokerConfig {
    /// Create a new BrokerConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timeouts and quick disconnect detection for latency-sensitive clients
    pub fn low_latency() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(100),
            max_consecutive_failures: 2,
            ..Default::default()
        }
    }

    /// Small queues for constrained targets
    pub fn resource_efficient() -> Self {
        Self {
            listener_queue_capacity: 64,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> BrokerResult<()> {
        if self.delivery_timeout.is_zero() {
            return Err(BrokerError::Configuration(
                "delivery_timeout must be greater than zero".to_string(),
            ));
        }

        if self.max_consecutive_failures == 0 {
            return Err(BrokerError::Configuration(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        if self.listener_queue_capacity == 0 {
            return Err(BrokerError::Configuration(
                "listener_queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
