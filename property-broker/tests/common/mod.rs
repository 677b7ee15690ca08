//! Mock handler and listener implementations shared by the integration tests.
//!
//! Both mocks count their calls and can be switched into failure modes to
//! exercise the broker's error paths.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use property_broker::{
    ChangeSink, DeliveryError, HandlerRegistry, PropertyBroker, PropertyConfig, PropertyError,
    PropertyEventListener, PropertyHandler, PropertyId, PropertyRequest, PropertyResult,
    PropertyValue, ValueType,
};
use tokio::time::Instant;

pub const SPEED: PropertyId = PropertyId::new(0x0207);
pub const DOOR_LOCK: PropertyId = PropertyId::new(0x0371);
pub const MOCKED: PropertyId = PropertyId::new(0x0500);

/// Handler that forwards every accepted write and counts its calls.
#[derive(Clone, Default)]
pub struct MockHandler {
    last: Arc<Mutex<Option<PropertyValue>>>,
    should_reject_sets: Arc<AtomicBool>,
    set_count: Arc<AtomicU32>,
    subscribe_count: Arc<AtomicU32>,
    unsubscribe_count: Arc<AtomicU32>,
}

impl MockHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following set fail with `InvalidValue`.
    pub fn set_reject_sets(&self, reject: bool) {
        self.should_reject_sets.store(reject, Ordering::Relaxed);
    }

    pub fn set_count(&self) -> u32 {
        self.set_count.load(Ordering::Relaxed)
    }

    pub fn subscribe_count(&self) -> u32 {
        self.subscribe_count.load(Ordering::Relaxed)
    }

    pub fn unsubscribe_count(&self) -> u32 {
        self.unsubscribe_count.load(Ordering::Relaxed)
    }
}

impl PropertyHandler for MockHandler {
    fn on_property_set(&self, value: PropertyValue, sink: &dyn ChangeSink) -> PropertyResult<()> {
        self.set_count.fetch_add(1, Ordering::Relaxed);
        if self.should_reject_sets.load(Ordering::Relaxed) {
            return Err(PropertyError::invalid_value(value.property_id, "mock rejection"));
        }

        let mut last = self.last.lock();
        *last = Some(value.clone());
        sink.publish(value);
        Ok(())
    }

    fn on_property_get(&self, hint: PropertyRequest) -> PropertyResult<PropertyValue> {
        self.last.lock().clone().ok_or(PropertyError::NotAvailable {
            property_id: hint.property_id,
            area_id: hint.area_id,
        })
    }

    fn on_property_subscribe(&self, _property_id: PropertyId, _sample_rate: f32) -> PropertyResult<()> {
        self.subscribe_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_property_unsubscribe(&self, _property_id: PropertyId) {
        self.unsubscribe_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Listener that records deliveries with their arrival time.
#[derive(Clone, Default)]
pub struct MockListener {
    received: Arc<Mutex<Vec<(Instant, PropertyValue)>>>,
    should_fail: Arc<AtomicBool>,
    attempt_count: Arc<AtomicU32>,
}

impl MockListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following delivery fail as if the client had vanished.
    pub fn set_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count.load(Ordering::Relaxed)
    }

    pub fn values(&self) -> Vec<PropertyValue> {
        self.received.lock().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn arrival_times(&self, property_id: PropertyId) -> Vec<Instant> {
        self.received
            .lock()
            .iter()
            .filter(|(_, v)| v.property_id == property_id)
            .map(|(at, _)| *at)
            .collect()
    }

    /// Wait until at least `count` events arrived or `limit` elapsed.
    pub async fn wait_for(&self, count: usize, limit: Duration) -> usize {
        let deadline = Instant::now() + limit;
        loop {
            let received = self.received.lock().len();
            if received >= count || Instant::now() >= deadline {
                return received;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl PropertyEventListener for MockListener {
    async fn on_property_event(&self, value: PropertyValue) -> Result<(), DeliveryError> {
        self.attempt_count.fetch_add(1, Ordering::Relaxed);
        if self.should_fail.load(Ordering::Relaxed) {
            return Err(DeliveryError::Unreachable("mock client gone".to_string()));
        }
        self.received.lock().push((Instant::now(), value));
        Ok(())
    }
}

/// Registry with an in-memory speed and door lock plus a mocked property.
pub fn test_registry(mock: &MockHandler) -> HandlerRegistry {
    HandlerRegistry::builder()
        .register_in_memory(
            PropertyConfig::continuous(SPEED, ValueType::Float, 1.0, 20.0)
                .with_name("PERF_VEHICLE_SPEED")
                .with_range(0.0, 300.0),
        )
        .register_in_memory(PropertyConfig::new(DOOR_LOCK, ValueType::Bool).with_name("DOOR_LOCK"))
        .register(
            PropertyConfig::new(MOCKED, ValueType::Int32).with_sample_rates(0.0, 100.0),
            Arc::new(mock.clone()),
        )
        .build()
        .expect("test registry is valid")
}

pub fn test_broker(mock: &MockHandler) -> PropertyBroker {
    PropertyBroker::new(test_registry(mock)).expect("broker starts inside a runtime")
}
