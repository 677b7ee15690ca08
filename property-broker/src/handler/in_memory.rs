//! Handler that keeps the latest value of each area in memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{PropertyError, PropertyResult};
use crate::handler::{ChangeSink, PropertyHandler};
use crate::types::{AreaId, ChangeMode, PropertyConfig, PropertyId, PropertyRequest, PropertyValue, RawValue};

/// Holds the last accepted value per area and accepts every valid write.
///
/// On-change properties only publish when the stored value actually changes;
/// continuous properties publish every accepted write. Publication happens
/// while the write lock is held, so listeners observe values in the order the
/// writes completed.
///
/// # Example
///
/// ```rust
/// use property_broker::{InMemoryHandler, NullSink, PropertyConfig, PropertyHandler, PropertyValue, RawValue, ValueType};
///
/// let config = PropertyConfig::new(0x1234, ValueType::Int32);
/// let handler = InMemoryHandler::new(config);
///
/// let value = PropertyValue::new(0x1234.into(), RawValue::Int32(5));
/// handler.on_property_set(value.clone(), &NullSink).unwrap();
/// assert_eq!(handler.on_property_get(value.request()).unwrap().value, RawValue::Int32(5));
/// ```
pub struct InMemoryHandler {
    config: PropertyConfig,
    values: RwLock<HashMap<AreaId, PropertyValue>>,
    subscribed: AtomicBool,
}

impl InMemoryHandler {
    pub fn new(config: PropertyConfig) -> Self {
        Self {
            config,
            values: RwLock::new(HashMap::new()),
            subscribed: AtomicBool::new(false),
        }
    }

    /// Seed an area with a default value returned before any write.
    ///
    /// Defaults that do not match the config are ignored with a warning.
    pub fn with_default(self, area_id: AreaId, value: RawValue) -> Self {
        let seeded = PropertyValue::for_area(self.config.id, area_id, value);
        match self.validate(&seeded) {
            Ok(()) => {
                self.values.write().insert(area_id, seeded);
            }
            Err(e) => {
                tracing::warn!("Ignoring default for {}: {}", self.config.label(), e);
            }
        }
        self
    }

    pub fn config(&self) -> &PropertyConfig {
        &self.config
    }

    /// Whether at least one subscriber is currently attached
    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::Acquire)
    }

    fn validate(&self, value: &PropertyValue) -> PropertyResult<()> {
        let id = self.config.id;

        if value.property_id != id {
            return Err(PropertyError::invalid_value(
                value.property_id,
                format!("handler serves {}", id),
            ));
        }

        let actual = value.value.value_type();
        if actual != self.config.value_type {
            return Err(PropertyError::type_mismatch(id, self.config.value_type, actual));
        }

        if !self.config.has_area(value.area_id) {
            return Err(PropertyError::invalid_value(
                id,
                format!("unsupported area {}", value.area_id),
            ));
        }

        if let Some((min, max)) = self.config.value_range {
            if let Some(out) = value
                .value
                .numeric_values()
                .into_iter()
                .find(|v| v.is_nan() || *v < min || *v > max)
            {
                return Err(PropertyError::invalid_value(
                    id,
                    format!("{} outside {}..={}", out, min, max),
                ));
            }
        }

        Ok(())
    }
}

impl PropertyHandler for InMemoryHandler {
    fn on_property_set(&self, value: PropertyValue, sink: &dyn ChangeSink) -> PropertyResult<()> {
        self.validate(&value)?;

        let mut values = self.values.write();
        let current = values.get(&value.area_id);

        if self.config.change_mode == ChangeMode::Static && current.is_some() {
            return Err(PropertyError::invalid_value(self.config.id, "static property already set"));
        }

        let changed = current.map_or(true, |c| c.value != value.value);
        if !changed && self.config.change_mode != ChangeMode::Continuous {
            tracing::trace!("{} unchanged, not publishing", self.config.label());
            return Ok(());
        }

        values.insert(value.area_id, value.clone());
        sink.publish(value);
        Ok(())
    }

    fn on_property_get(&self, hint: PropertyRequest) -> PropertyResult<PropertyValue> {
        if hint.property_id != self.config.id {
            return Err(PropertyError::UnknownProperty(hint.property_id));
        }

        self.values
            .read()
            .get(&hint.area_id)
            .cloned()
            .ok_or(PropertyError::NotAvailable {
                property_id: hint.property_id,
                area_id: hint.area_id,
            })
    }

    fn on_property_subscribe(&self, property_id: PropertyId, sample_rate: f32) -> PropertyResult<()> {
        if property_id != self.config.id {
            return Err(PropertyError::UnknownProperty(property_id));
        }

        if !self.config.accepts_rate(sample_rate) {
            return Err(PropertyError::InvalidRate {
                property_id,
                rate: sample_rate,
                min: self.config.min_sample_rate,
                max: self.config.max_sample_rate,
            });
        }

        self.subscribed.store(true, Ordering::Release);
        Ok(())
    }

    fn on_property_unsubscribe(&self, _property_id: PropertyId) {
        self.subscribed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessMode, ValueType};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<PropertyValue>>);

    impl ChangeSink for RecordingSink {
        fn publish(&self, value: PropertyValue) {
            self.0.lock().push(value);
        }
    }

    impl RecordingSink {
        fn values(&self) -> Vec<RawValue> {
            self.0.lock().iter().map(|v| v.value.clone()).collect()
        }
    }

    fn speed_handler() -> InMemoryHandler {
        InMemoryHandler::new(
            PropertyConfig::continuous(42, ValueType::Float, 1.0, 10.0)
                .with_range(0.0, 100.0)
                .with_access(AccessMode::ReadWrite),
        )
    }

    fn speed(value: f32) -> PropertyValue {
        PropertyValue::new(PropertyId::new(42), RawValue::Float(value))
    }

    #[test]
    fn test_get_before_set_is_not_available() {
        let handler = speed_handler();
        let result = handler.on_property_get(PropertyRequest::new(PropertyId::new(42), AreaId::GLOBAL));
        assert!(matches!(result, Err(PropertyError::NotAvailable { .. })));
    }

    #[test]
    fn test_set_then_get_and_publish() {
        let handler = speed_handler();
        let sink = RecordingSink::default();

        handler.on_property_set(speed(12.5), &sink).unwrap();

        let current = handler.on_property_get(speed(0.0).request()).unwrap();
        assert_eq!(current.value, RawValue::Float(12.5));
        assert_eq!(sink.values(), vec![RawValue::Float(12.5)]);
    }

    #[test]
    fn test_rejected_value_leaves_state_unchanged() {
        let handler = speed_handler();
        let sink = RecordingSink::default();
        handler.on_property_set(speed(10.0), &sink).unwrap();

        let out_of_range = handler.on_property_set(speed(250.0), &sink);
        assert!(matches!(out_of_range, Err(PropertyError::InvalidValue { .. })));

        let wrong_type = handler.on_property_set(
            PropertyValue::new(PropertyId::new(42), RawValue::Bool(true)),
            &sink,
        );
        assert!(matches!(wrong_type, Err(PropertyError::InvalidValue { .. })));

        let wrong_area = handler.on_property_set(
            PropertyValue::for_area(PropertyId::new(42), AreaId::new(4), RawValue::Float(1.0)),
            &sink,
        );
        assert!(wrong_area.is_err());

        assert_eq!(
            handler.on_property_get(speed(0.0).request()).unwrap().value,
            RawValue::Float(10.0)
        );
        assert_eq!(sink.values().len(), 1);
    }

    #[test]
    fn test_on_change_only_publishes_changes() {
        let handler = InMemoryHandler::new(PropertyConfig::new(7, ValueType::Bool));
        let sink = RecordingSink::default();
        let door = |open| PropertyValue::new(PropertyId::new(7), RawValue::Bool(open));

        handler.on_property_set(door(true), &sink).unwrap();
        handler.on_property_set(door(true), &sink).unwrap();
        handler.on_property_set(door(false), &sink).unwrap();

        assert_eq!(sink.values(), vec![RawValue::Bool(true), RawValue::Bool(false)]);
    }

    #[test]
    fn test_continuous_publishes_every_write() {
        let handler = speed_handler();
        let sink = RecordingSink::default();
        for _ in 0..3 {
            handler.on_property_set(speed(5.0), &sink).unwrap();
        }
        assert_eq!(sink.values().len(), 3);
    }

    #[test]
    fn test_static_property_rejects_second_write() {
        let config = PropertyConfig::new(9, ValueType::String).with_change_mode(ChangeMode::Static);
        let handler = InMemoryHandler::new(config)
            .with_default(AreaId::GLOBAL, RawValue::String("VIN123".into()));

        let result = handler.on_property_set(
            PropertyValue::new(PropertyId::new(9), RawValue::String("VIN999".into())),
            &NullSinkProbe,
        );
        assert!(result.is_err());
    }

    struct NullSinkProbe;

    impl ChangeSink for NullSinkProbe {
        fn publish(&self, _value: PropertyValue) {
            panic!("rejected writes must not publish");
        }
    }

    #[test]
    fn test_defaults_and_invalid_defaults() {
        let config = PropertyConfig::new(11, ValueType::Int32)
            .with_areas([AreaId::new(1), AreaId::new(2)])
            .with_range(16.0, 28.0);
        let handler = InMemoryHandler::new(config)
            .with_default(AreaId::new(1), RawValue::Int32(21))
            .with_default(AreaId::new(2), RawValue::Int32(99));

        let zone1 = handler.on_property_get(PropertyRequest::new(PropertyId::new(11), AreaId::new(1)));
        assert_eq!(zone1.unwrap().value, RawValue::Int32(21));

        let zone2 = handler.on_property_get(PropertyRequest::new(PropertyId::new(11), AreaId::new(2)));
        assert!(matches!(zone2, Err(PropertyError::NotAvailable { .. })));
    }

    #[test]
    fn test_subscribe_rate_bounds() {
        let handler = speed_handler();
        assert!(handler.on_property_subscribe(PropertyId::new(42), 5.0).is_ok());
        assert!(handler.is_subscribed());

        let too_fast = handler.on_property_subscribe(PropertyId::new(42), 50.0);
        assert!(matches!(too_fast, Err(PropertyError::InvalidRate { .. })));

        handler.on_property_unsubscribe(PropertyId::new(42));
        handler.on_property_unsubscribe(PropertyId::new(42));
        assert!(!handler.is_subscribed());
    }

    #[test]
    fn test_concurrent_writers() {
        let handler = Arc::new(speed_handler());
        let sink = Arc::new(RecordingSink::default());

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let handler = Arc::clone(&handler);
                let sink = Arc::clone(&sink);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        handler
                            .on_property_set(speed((i * 10 + j % 10) as f32), sink.as_ref())
                            .unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        // The stored value is always the last one published
        let published = sink.0.lock();
        assert_eq!(published.len(), 400);
        let stored = handler.on_property_get(speed(0.0).request()).unwrap();
        assert_eq!(stored.value, published.last().unwrap().value);
    }
}
