//! Normalizes raw `serverPayload` device entries into [`Device`] records.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::*;

const DEFAULT_NAME: &str = "Unknown";

/// Parse a `serverPayload`, given either as a JSON string or inline.
///
/// Entries with an unknown `tag` are skipped. A payload that cannot be
/// decoded yields an empty list.
pub fn parse_payload(payload: &Value) -> Vec<Device> {
    let decoded;
    let root = match payload {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(v) => {
                decoded = v;
                &decoded
            }
            Err(e) => {
                warn!(error = %e, "serverPayload is not valid JSON");
                return Vec::new();
            }
        },
        other => other,
    };

    let Some(entries) = root.get("devices").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries.iter().filter_map(parse_device).collect()
}

/// Parse one entry; `None` when its tag is not a known device family.
pub fn parse_device(entry: &Value) -> Option<Device> {
    let tag = entry.get("tag").and_then(|v| v.as_str()).unwrap_or("");
    let Some(family) = DeviceFamily::from_tag(tag) else {
        debug!(tag, "skipping unknown device tag");
        return None;
    };

    let settings = RawJson::from_field(entry.get("settings"), "{}");
    let measures = RawJson::from_field(entry.get("measures"), "{}");
    let schedules = RawJson::from_field(entry.get("schedules"), "[]");

    let settings_obj = settings.parse_object();
    let measures_obj = measures.parse_object();
    let field = |map: &Map<String, Value>, key: &str| map.get(key).cloned().unwrap_or(Value::Null);

    let (mode, mode_setting, manual_set_point) = match family {
        DeviceFamily::Current => {
            let (mode_setting, manual_set_point) = primary_settings(&settings_obj);
            (current_mode(&measures_obj), mode_setting, manual_set_point)
        }
        DeviceFamily::Legacy => (
            legacy_mode(&settings_obj),
            settings_obj.get("mode").and_then(|v| v.as_str()).map(str::to_string),
            Reading::from_tenths(
                settings_obj
                    .get("manualSchedule")
                    .and_then(|s| s.get("setPoint"))
                    .unwrap_or(&Value::Null),
            ),
        ),
    };

    Some(Device {
        handle: entry.get("handle").cloned().unwrap_or(Value::Null),
        serial_number: entry
            .get("serialNumber")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        name: entry
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_NAME)
            .to_string(),
        family,
        channel: entry.get("channel").cloned().unwrap_or(Value::Null),
        setter: SetterMetadata {
            role: entry.get("role").cloned().unwrap_or(Value::Null),
            house_handle: entry.get("houseHandle").cloned().unwrap_or(Value::Null),
            gateway_handle: entry.get("gatewayHandle").cloned().unwrap_or(Value::Null),
            is_deleted: entry.get("isDeleted").and_then(|v| v.as_bool()).unwrap_or(false),
        },
        temperature: Reading::from_tenths(&field(&measures_obj, "temperature")),
        humidity: Reading::from_plain(&field(&measures_obj, "humidity")),
        battery_level: Reading::from_plain(&field(&measures_obj, "batteryLevel")),
        wifi_level: Reading::from_plain(&field(&measures_obj, "wifiLevel")),
        status: measures_obj
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        mode,
        mode_setting,
        set_point: Reading::from_tenths(&field(&measures_obj, "setPoint")),
        manual_set_point,
        settings,
        measures,
        schedules,
        binding: None,
    })
}

/// BLISS2 `primary.mode` string and manual setpoint.
pub(crate) fn primary_settings(settings: &Map<String, Value>) -> (Option<String>, Reading) {
    let primary = settings.get("primary").unwrap_or(&Value::Null);
    (
        primary.get("mode").and_then(|v| v.as_str()).map(str::to_string),
        Reading::from_tenths(primary.get("manualSetPoint").unwrap_or(&Value::Null)),
    )
}

fn current_mode(measures: &Map<String, Value>) -> Mode {
    match measures.get("mode") {
        None | Some(Value::Null) => Mode::Off,
        Some(code) => mode_code(code).map(Mode::from_code).unwrap_or(Mode::Unknown),
    }
}

/// Integer code, also accepting integral floats like `1.0`.
fn mode_code(code: &Value) -> Option<i64> {
    code.as_i64().or_else(|| {
        code.as_f64()
            .filter(|f| f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn legacy_mode(settings: &Map<String, Value>) -> Mode {
    let is_on = settings
        .get("manualSchedule")
        .and_then(|s| s.get("isOn"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let mode = settings
        .get("mode")
        .and_then(|v| v.as_str())
        .unwrap_or("OFF")
        .to_ascii_uppercase();

    match (mode.as_str(), is_on) {
        ("AUTO", _) => Mode::Auto,
        ("OFF", true) => Mode::Manual,
        ("OFF", false) => Mode::Off,
        _ => Mode::Unknown,
    }
}
