//! Handler fixture that treats every call as a test failure.

use crate::error::PropertyResult;
use crate::handler::{ChangeSink, PropertyHandler};
use crate::types::{PropertyId, PropertyRequest, PropertyValue};

/// Fails the running test on any call.
///
/// Register it for properties that a test expects the broker never to touch.
/// Only available in test builds and with the `test-support` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingHandler;

impl PropertyHandler for FailingHandler {
    fn on_property_set(&self, _value: PropertyValue, _sink: &dyn ChangeSink) -> PropertyResult<()> {
        panic!("Unexpected on_property_set call");
    }

    fn on_property_get(&self, _hint: PropertyRequest) -> PropertyResult<PropertyValue> {
        panic!("Unexpected on_property_get call");
    }

    fn on_property_subscribe(&self, _property_id: PropertyId, _sample_rate: f32) -> PropertyResult<()> {
        panic!("Unexpected on_property_subscribe call");
    }

    fn on_property_unsubscribe(&self, _property_id: PropertyId) {
        panic!("Unexpected on_property_unsubscribe call");
    }
}
