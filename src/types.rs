use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Error;

/// A sensor reading, or an explicit marker that the server gave none.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reading {
    Available(f64),
    #[default]
    Unavailable,
}

impl Reading {
    /// Scale a raw tenths-of-unit value (`235` -> `23.5`).
    pub fn from_tenths(raw: &Value) -> Self {
        match unwrap_value(raw).and_then(Value::as_f64) {
            Some(v) => Reading::Available(v / 10.0),
            None => Reading::Unavailable,
        }
    }

    pub fn from_plain(raw: &Value) -> Self {
        match unwrap_value(raw).and_then(Value::as_f64) {
            Some(v) => Reading::Available(v),
            None => Reading::Unavailable,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Reading::Available(v) => Some(*v),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Available(_))
    }
}

/// Readings come either bare or wrapped as `{"value": n, ...}`.
fn unwrap_value(raw: &Value) -> Option<&Value> {
    match raw {
        Value::Object(map) => map.get("value"),
        Value::Null => None,
        other => Some(other),
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Available(v) => write!(f, "{v:.1}"),
            Reading::Unavailable => write!(f, "N/A"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// BLISS1: mode is a string under `settings.mode`.
    Legacy,
    /// BLISS2: numeric mode code, settings under `primary`.
    Current,
}

impl DeviceFamily {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "BLISS1" => Some(DeviceFamily::Legacy),
            "BLISS2" => Some(DeviceFamily::Current),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            DeviceFamily::Legacy => "BLISS1",
            DeviceFamily::Current => "BLISS2",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Off,
    Auto,
    Manual,
    Frost,
    Eco,
    /// Reported by the device but not recognised.
    Unknown,
}

impl Mode {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Mode::Off => "OFF",
            Mode::Auto => "AUTO",
            Mode::Manual => "MANUAL",
            Mode::Frost => "FROST",
            Mode::Eco => "ECO",
            Mode::Unknown => "UNKNOWN",
        }
    }

    /// BLISS2 `measures.mode` code.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 | 2 => Mode::Off,
            1 => Mode::Auto,
            3 => Mode::Manual,
            _ => Mode::Unknown,
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Mode::Off),
            "AUTO" => Ok(Mode::Auto),
            "MANUAL" => Ok(Mode::Manual),
            "FROST" => Ok(Mode::Frost),
            "ECO" => Ok(Mode::Eco),
            _ => Err(Error::UnsupportedMode(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

/// A JSON document kept as the exact string the server sent.
///
/// Only decoded on demand; re-sent byte-for-byte unless a mutation targets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawJson(String);

impl RawJson {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Take a field from a device entry. Strings are kept verbatim, a missing
    /// field becomes `default`, anything else is serialized compactly.
    pub(crate) fn from_field(field: Option<&Value>, default: &str) -> Self {
        match field {
            Some(Value::String(s)) => Self(s.clone()),
            None | Some(Value::Null) => Self(default.to_string()),
            Some(other) => Self(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode, treating malformed text as `{}`.
    pub fn parse_lenient(&self) -> Value {
        serde_json::from_str(&self.0).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Like `parse_lenient` but guarantees an object.
    pub fn parse_object(&self) -> Map<String, Value> {
        match self.parse_lenient() {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

impl fmt::Display for RawJson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ownership fields echoed unchanged on every mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SetterMetadata {
    pub role: Value,
    pub house_handle: Value,
    pub gateway_handle: Value,
    pub is_deleted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub handle: Value,
    pub serial_number: Option<String>,
    pub name: String,
    pub family: DeviceFamily,
    pub channel: Value,
    pub setter: SetterMetadata,

    pub temperature: Reading,
    pub humidity: Reading,
    pub battery_level: Reading,
    pub wifi_level: Reading,
    pub status: Option<String>,

    pub mode: Mode,
    /// Mode string as stored in settings, before derivation.
    pub mode_setting: Option<String>,
    pub set_point: Reading,
    pub manual_set_point: Reading,

    pub settings: RawJson,
    pub measures: RawJson,
    pub schedules: RawJson,

    /// Client id of the session that produced this record.
    pub(crate) binding: Option<Uuid>,
}

impl Device {
    pub fn model(&self) -> &'static str {
        self.family.tag()
    }

    /// Serial number, or the name when the server sent none.
    pub fn key(&self) -> &str {
        self.serial_number.as_deref().unwrap_or(&self.name)
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Target temperature as a climate UI would show it.
    pub fn target_temperature(&self) -> Option<f64> {
        if self.mode == Mode::Off {
            return None;
        }
        match self.manual_set_point.value() {
            Some(v) if v > 0.0 => Some(v),
            _ => self.set_point.value(),
        }
    }
}
