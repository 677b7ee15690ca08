//! JSON property catalogs
//!
//! A catalog lists property configs and optional per-area defaults. Loading
//! one yields a registry where every property is served by an
//! [`InMemoryHandler`].
//!
//! ```json
//! {
//!   "properties": [
//!     {
//!       "id": 582,
//!       "name": "PERF_VEHICLE_SPEED",
//!       "value_type": "FLOAT",
//!       "change_mode": "CONTINUOUS",
//!       "access": "READ_WRITE",
//!       "min_sample_rate": 1.0,
//!       "max_sample_rate": 10.0,
//!       "value_range": [0.0, 300.0],
//!       "defaults": [{ "value": { "type": "FLOAT", "value": 0.0 } }]
//!     }
//!   ]
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};
use crate::handler::InMemoryHandler;
use crate::registry::{HandlerRegistry, HandlerRegistryBuilder};
use crate::types::{AreaId, PropertyConfig, RawValue};

/// Seed value for one area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultValue {
    #[serde(default)]
    pub area_id: AreaId,
    pub value: RawValue,
}

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub config: PropertyConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub defaults: Vec<DefaultValue>,
}

/// A parsed property catalog
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyCatalog {
    pub properties: Vec<CatalogEntry>,
}

impl PropertyCatalog {
    pub fn from_json(json: &str) -> BrokerResult<Self> {
        serde_json::from_str(json).map_err(|e| BrokerError::Catalog(format!("invalid catalog: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> BrokerResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::Catalog(format!("cannot read {}: {}", path.display(), e)))?;

        let catalog = Self::from_json(&json)?;
        tracing::debug!(
            "Loaded {} properties from {}",
            catalog.properties.len(),
            path.display()
        );
        Ok(catalog)
    }

    pub fn to_json(&self) -> BrokerResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BrokerError::Catalog(e.to_string()))
    }

    /// Registry builder with one in-memory handler per entry.
    ///
    /// Callers can register extra handlers before building.
    pub fn into_registry_builder(self) -> HandlerRegistryBuilder {
        self.properties
            .into_iter()
            .fold(HandlerRegistry::builder(), |builder, entry| {
                let handler = entry
                    .defaults
                    .into_iter()
                    .fold(InMemoryHandler::new(entry.config.clone()), |handler, default| {
                        handler.with_default(default.area_id, default.value)
                    });
                builder.register(entry.config, Arc::new(handler))
            })
    }

    pub fn into_registry(self) -> BrokerResult<HandlerRegistry> {
        self.into_registry_builder().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessMode, ChangeMode, PropertyId, PropertyRequest, ValueType};

    const CATALOG: &str = r#"{
        "properties": [
            {
                "id": 582,
                "name": "PERF_VEHICLE_SPEED",
                "value_type": "FLOAT",
                "change_mode": "CONTINUOUS",
                "access": "READ",
                "min_sample_rate": 1.0,
                "max_sample_rate": 10.0,
                "value_range": [0.0, 300.0],
                "defaults": [{ "value": { "type": "FLOAT", "value": 0.0 } }]
            },
            {
                "id": 371,
                "name": "DOOR_LOCK",
                "value_type": "BOOL",
                "change_mode": "ON_CHANGE",
                "access": "READ_WRITE",
                "area_ids": [1, 4]
            }
        ]
    }"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = PropertyCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.properties.len(), 2);

        let speed = &catalog.properties[0];
        assert_eq!(speed.config.id, PropertyId::new(582));
        assert_eq!(speed.config.change_mode, ChangeMode::Continuous);
        assert_eq!(speed.config.access, AccessMode::Read);
        assert_eq!(speed.config.value_range, Some((0.0, 300.0)));
        assert_eq!(speed.defaults[0].area_id, AreaId::GLOBAL);

        let door = &catalog.properties[1];
        assert_eq!(door.config.value_type, ValueType::Bool);
        assert_eq!(door.config.area_ids, vec![AreaId::new(1), AreaId::new(4)]);
        assert_eq!(door.config.max_sample_rate, 0.0);
    }

    #[test]
    fn test_registry_serves_defaults() {
        let registry = PropertyCatalog::from_json(CATALOG)
            .unwrap()
            .into_registry()
            .unwrap();
        assert_eq!(registry.len(), 2);

        let handler = registry.resolve(PropertyId::new(582)).unwrap();
        let value = handler
            .on_property_get(PropertyRequest::new(PropertyId::new(582), AreaId::GLOBAL))
            .unwrap();
        assert_eq!(value.value, RawValue::Float(0.0));
    }

    #[test]
    fn test_malformed_catalog() {
        let missing_type = r#"{ "properties": [ { "id": 1, "change_mode": "STATIC", "access": "READ" } ] }"#;
        assert!(matches!(
            PropertyCatalog::from_json(missing_type),
            Err(BrokerError::Catalog(_))
        ));

        assert!(PropertyCatalog::from_json("not json").is_err());
        assert!(matches!(
            PropertyCatalog::from_file("/nonexistent/catalog.json"),
            Err(BrokerError::Catalog(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_fail_at_build() {
        let json = r#"{ "properties": [
            { "id": 5, "value_type": "BOOL", "change_mode": "ON_CHANGE", "access": "READ" },
            { "id": 5, "value_type": "BOOL", "change_mode": "ON_CHANGE", "access": "READ" }
        ] }"#;
        let catalog = PropertyCatalog::from_json(json).unwrap();
        assert!(matches!(catalog.into_registry(), Err(BrokerError::Configuration(_))));
    }

    #[test]
    fn test_to_json_reparses() {
        let catalog = PropertyCatalog::from_json(CATALOG).unwrap();
        let json = catalog.to_json().unwrap();
        assert_eq!(PropertyCatalog::from_json(&json).unwrap(), catalog);
    }
}
