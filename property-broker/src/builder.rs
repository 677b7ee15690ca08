//! Builder for creating and configuring the PropertyBroker.
//!
//! # Example
//!
//! ```rust
//! use property_broker::{BrokerBuilder, HandlerRegistry, PropertyConfig, ValueType};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HandlerRegistry::builder()
//!     .register_in_memory(PropertyConfig::new(0x0200, ValueType::Bool))
//!     .build()?;
//!
//! let _broker = BrokerBuilder::new()
//!     .with_registry(registry)
//!     .with_delivery_timeout(Duration::from_millis(250))
//!     .with_max_consecutive_failures(5)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::broker::PropertyBroker;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::registry::HandlerRegistry;

/// Fluent construction of a [`PropertyBroker`].
///
/// `build()` fails when no registry was given, when the configuration does
/// not validate, or when there is neither an explicit runtime handle nor a
/// current tokio runtime.
#[derive(Default)]
pub struct BrokerBuilder {
    registry: Option<Arc<HandlerRegistry>>,
    config: BrokerConfig,
    runtime: Option<Handle>,
}

impl BrokerBuilder {
    /// Create a new builder with the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    /// Use a registry that is already shared
    pub fn with_shared_registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the whole configuration
    pub fn with_config(mut self, config: BrokerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, failures: u32) -> Self {
        self.config.max_consecutive_failures = failures;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.listener_queue_capacity = capacity;
        self
    }

    pub fn with_initial_values(mut self, enabled: bool) -> Self {
        self.config.deliver_initial_value = enabled;
        self
    }

    /// Run delivery workers on this runtime instead of the current one.
    ///
    /// Lets a broker be built from a thread that is not inside a runtime.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the settings and create the broker
    pub fn build(self) -> BrokerResult<PropertyBroker> {
        let registry = self.registry.ok_or_else(|| {
            BrokerError::Configuration("a handler registry is required".to_string())
        })?;

        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                BrokerError::Runtime(format!("no tokio runtime available: {}", e))
            })?,
        };

        PropertyBroker::from_parts(registry, self.config, runtime)
    }
}
