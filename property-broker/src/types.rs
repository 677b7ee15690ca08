//! Core types shared by the broker, handlers and listeners.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Identifier of a vehicle property.
///
/// The set of ids is closed and fixed when the registry is built. Zero is
/// reserved as the wildcard filter for [`crate::PropertyBroker::list_properties`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(i32);

impl PropertyId {
    /// Matches every property when used as a listing filter.
    pub const WILDCARD: PropertyId = PropertyId(0);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }

    pub fn is_wildcard(&self) -> bool {
        *self == Self::WILDCARD
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl From<i32> for PropertyId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Zone selector for grouped properties (seat rows, doors, mirrors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AreaId(i32);

impl AreaId {
    /// The single area of a non-zoned property.
    pub const GLOBAL: AreaId = AreaId(0);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn as_i32(&self) -> i32 {
        self.0
    }
}

impl Default for AreaId {
    fn default() -> Self {
        Self::GLOBAL
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Identity of a remote subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Payload type a property carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Bool,
    Int32,
    Int64,
    Float,
    Int32Vec,
    FloatVec,
    String,
    Bytes,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::Int32 => "int32",
            ValueType::Int64 => "int64",
            ValueType::Float => "float",
            ValueType::Int32Vec => "int32[]",
            ValueType::FloatVec => "float[]",
            ValueType::String => "string",
            ValueType::Bytes => "bytes",
        };
        f.write_str(name)
    }
}

/// Typed property payload.
///
/// The broker never looks inside a payload beyond checking its type and,
/// for numeric configs, its range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RawValue {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Int32Vec(Vec<i32>),
    FloatVec(Vec<f32>),
    String(String),
    Bytes(Vec<u8>),
}

impl RawValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            RawValue::Bool(_) => ValueType::Bool,
            RawValue::Int32(_) => ValueType::Int32,
            RawValue::Int64(_) => ValueType::Int64,
            RawValue::Float(_) => ValueType::Float,
            RawValue::Int32Vec(_) => ValueType::Int32Vec,
            RawValue::FloatVec(_) => ValueType::FloatVec,
            RawValue::String(_) => ValueType::String,
            RawValue::Bytes(_) => ValueType::Bytes,
        }
    }

    /// Scalar numeric view used for range checks; vectors report every element.
    pub(crate) fn numeric_values(&self) -> Vec<f64> {
        match self {
            RawValue::Int32(v) => vec![f64::from(*v)],
            RawValue::Int64(v) => vec![*v as f64],
            RawValue::Float(v) => vec![f64::from(*v)],
            RawValue::Int32Vec(v) => v.iter().map(|x| f64::from(*x)).collect(),
            RawValue::FloatVec(v) => v.iter().map(|x| f64::from(*x)).collect(),
            RawValue::Bool(_) | RawValue::String(_) | RawValue::Bytes(_) => Vec::new(),
        }
    }
}

/// One immutable value of one property area
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyValue {
    pub property_id: PropertyId,
    pub area_id: AreaId,
    pub value: RawValue,
    pub timestamp: SystemTime,
}

impl PropertyValue {
    /// Create a value for the global area stamped with the current time
    pub fn new(property_id: PropertyId, value: RawValue) -> Self {
        Self::for_area(property_id, AreaId::GLOBAL, value)
    }

    /// Create a value for a specific area stamped with the current time
    pub fn for_area(property_id: PropertyId, area_id: AreaId, value: RawValue) -> Self {
        Self {
            property_id,
            area_id,
            value,
            timestamp: SystemTime::now(),
        }
    }

    pub fn request(&self) -> PropertyRequest {
        PropertyRequest::new(self.property_id, self.area_id)
    }
}

/// Lookup key passed to handlers on get
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyRequest {
    pub property_id: PropertyId,
    pub area_id: AreaId,
}

impl PropertyRequest {
    pub fn new(property_id: PropertyId, area_id: AreaId) -> Self {
        Self {
            property_id,
            area_id,
        }
    }
}

/// How a property produces new values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeMode {
    /// Never changes after startup
    Static,
    /// Produces a value only when it changes
    OnChange,
    /// Sampled at a rate chosen by subscribers
    Continuous,
}

/// Which client operations a property allows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
}

impl AccessMode {
    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::Read | AccessMode::ReadWrite)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }
}

fn default_areas() -> Vec<AreaId> {
    vec![AreaId::GLOBAL]
}

/// Static metadata of one property, fixed at registry build time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyConfig {
    pub id: PropertyId,
    #[serde(default)]
    pub name: String,
    pub value_type: ValueType,
    pub change_mode: ChangeMode,
    pub access: AccessMode,
    #[serde(default = "default_areas")]
    pub area_ids: Vec<AreaId>,
    /// Lowest accepted subscription rate in Hz
    #[serde(default)]
    pub min_sample_rate: f32,
    /// Highest accepted subscription rate in Hz
    #[serde(default)]
    pub max_sample_rate: f32,
    /// Inclusive numeric bounds for scalar and vector payloads
    #[serde(default)]
    pub value_range: Option<(f64, f64)>,
}

impl PropertyConfig {
    /// Config for an on-change, read-write property in the global area.
    ///
    /// On-change properties accept only a sample rate of zero until
    /// [`with_sample_rates`](Self::with_sample_rates) widens the bounds.
    pub fn new(id: impl Into<PropertyId>, value_type: ValueType) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            value_type,
            change_mode: ChangeMode::OnChange,
            access: AccessMode::ReadWrite,
            area_ids: default_areas(),
            min_sample_rate: 0.0,
            max_sample_rate: 0.0,
            value_range: None,
        }
    }

    /// Config for a continuous property sampled between `min_rate` and `max_rate` Hz
    pub fn continuous(
        id: impl Into<PropertyId>,
        value_type: ValueType,
        min_rate: f32,
        max_rate: f32,
    ) -> Self {
        Self {
            change_mode: ChangeMode::Continuous,
            min_sample_rate: min_rate,
            max_sample_rate: max_rate,
            ..Self::new(id, value_type)
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_access(mut self, access: AccessMode) -> Self {
        self.access = access;
        self
    }

    pub fn with_change_mode(mut self, change_mode: ChangeMode) -> Self {
        self.change_mode = change_mode;
        self
    }

    pub fn with_areas(mut self, areas: impl IntoIterator<Item = AreaId>) -> Self {
        self.area_ids = areas.into_iter().collect();
        self
    }

    pub fn with_sample_rates(mut self, min_rate: f32, max_rate: f32) -> Self {
        self.min_sample_rate = min_rate;
        self.max_sample_rate = max_rate;
        self
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.value_range = Some((min, max));
        self
    }

    pub fn has_area(&self, area_id: AreaId) -> bool {
        self.area_ids.contains(&area_id)
    }

    /// Whether `rate` lies inside the configured sample-rate bounds
    pub fn accepts_rate(&self, rate: f32) -> bool {
        rate.is_finite() && rate >= self.min_sample_rate && rate <= self.max_sample_rate
    }

    /// Display label used in logs
    pub fn label(&self) -> String {
        if self.name.is_empty() {
            self.id.to_string()
        } else {
            format!("{} ({})", self.name, self.id)
        }
    }
}
