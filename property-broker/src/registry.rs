//! Property → handler bindings
//!
//! The registry is built once at startup and never mutated on the client
//! path, so lookups are plain reads of an immutable map without any locking.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{BrokerError, BrokerResult, PropertyError, PropertyResult};
use crate::handler::{InMemoryHandler, PropertyHandler};
use crate::types::{ChangeMode, PropertyConfig, PropertyId};

/// A property's static config together with the handler serving it
#[derive(Clone)]
pub struct HandlerBinding {
    pub config: PropertyConfig,
    pub handler: Arc<dyn PropertyHandler>,
}

impl fmt::Debug for HandlerBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Immutable map from property id to handler binding.
///
/// Listing order is ascending property id, so repeated calls on the same
/// registry return the same sequence.
#[derive(Debug)]
pub struct HandlerRegistry {
    bindings: BTreeMap<PropertyId, HandlerBinding>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Configs whose id matches `filter`, or every config for the wildcard
    pub fn list_properties(&self, filter: PropertyId) -> Vec<PropertyConfig> {
        if filter.is_wildcard() {
            return self.bindings.values().map(|b| b.config.clone()).collect();
        }

        self.bindings
            .get(&filter)
            .map(|b| vec![b.config.clone()])
            .unwrap_or_default()
    }

    /// The handler bound to `property_id`
    pub fn resolve(&self, property_id: PropertyId) -> PropertyResult<&Arc<dyn PropertyHandler>> {
        self.binding(property_id).map(|b| &b.handler)
    }

    /// The full binding for `property_id`
    pub fn binding(&self, property_id: PropertyId) -> PropertyResult<&HandlerBinding> {
        self.bindings
            .get(&property_id)
            .ok_or(PropertyError::UnknownProperty(property_id))
    }

    pub fn config(&self, property_id: PropertyId) -> PropertyResult<&PropertyConfig> {
        self.binding(property_id).map(|b| &b.config)
    }

    pub fn contains(&self, property_id: PropertyId) -> bool {
        self.bindings.contains_key(&property_id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Replace the handler of an existing binding.
    ///
    /// Administrative operation: it needs exclusive access, so it can only run
    /// before the registry is shared with a broker.
    pub fn swap_handler(
        &mut self,
        property_id: PropertyId,
        handler: Arc<dyn PropertyHandler>,
    ) -> PropertyResult<Arc<dyn PropertyHandler>> {
        let binding = self
            .bindings
            .get_mut(&property_id)
            .ok_or(PropertyError::UnknownProperty(property_id))?;

        tracing::info!("Swapping handler for {}", binding.config.label());
        Ok(std::mem::replace(&mut binding.handler, handler))
    }

    /// Get statistics about the registry
    pub fn stats(&self) -> RegistryStats {
        let mut change_modes = HashMap::new();
        for binding in self.bindings.values() {
            *change_modes.entry(binding.config.change_mode).or_insert(0) += 1;
        }

        RegistryStats {
            total_properties: self.bindings.len(),
            change_mode_breakdown: change_modes,
        }
    }
}

/// Collects bindings and validates them into a [`HandlerRegistry`]
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    bindings: Vec<HandlerBinding>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to the property described by `config`.
    ///
    /// A handler serving a property group is registered once per member id
    /// with the same `Arc`.
    pub fn register(mut self, config: PropertyConfig, handler: Arc<dyn PropertyHandler>) -> Self {
        self.bindings.push(HandlerBinding { config, handler });
        self
    }

    /// Bind a fresh [`InMemoryHandler`] for `config`
    pub fn register_in_memory(self, config: PropertyConfig) -> Self {
        let handler = Arc::new(InMemoryHandler::new(config.clone()));
        self.register(config, handler)
    }

    /// Validate and freeze the bindings.
    ///
    /// Rejects the wildcard id, duplicate ids and inverted sample-rate or
    /// value bounds.
    pub fn build(self) -> BrokerResult<HandlerRegistry> {
        let mut bindings = BTreeMap::new();

        for binding in self.bindings {
            let config = &binding.config;

            if config.id.is_wildcard() {
                return Err(BrokerError::Configuration(
                    "property id 0 is reserved for the wildcard filter".to_string(),
                ));
            }

            if !(config.min_sample_rate >= 0.0 && config.min_sample_rate <= config.max_sample_rate) {
                return Err(BrokerError::Configuration(format!(
                    "invalid sample rate bounds {}..={} for {}",
                    config.min_sample_rate,
                    config.max_sample_rate,
                    config.label()
                )));
            }

            if let Some((min, max)) = config.value_range {
                if min > max {
                    return Err(BrokerError::Configuration(format!(
                        "invalid value range {}..={} for {}",
                        min,
                        max,
                        config.label()
                    )));
                }
            }

            if config.area_ids.is_empty() {
                return Err(BrokerError::Configuration(format!(
                    "{} declares no areas",
                    config.label()
                )));
            }

            let id = config.id;
            if bindings.insert(id, binding).is_some() {
                return Err(BrokerError::Configuration(format!(
                    "property {} registered twice",
                    id
                )));
            }
        }

        tracing::debug!("Built handler registry with {} properties", bindings.len());
        Ok(HandlerRegistry { bindings })
    }
}

/// Statistics about the registry state
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_properties: usize,
    pub change_mode_breakdown: HashMap<ChangeMode, usize>,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registry Stats:")?;
        writeln!(f, "  Properties: {}", self.total_properties)?;
        writeln!(f, "  Change mode breakdown:")?;
        for (mode, count) in &self.change_mode_breakdown {
            writeln!(f, "    {:?}: {}", mode, count)?;
        }
        Ok(())
    }
}
