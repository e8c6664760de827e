//! Mode and setpoint mutations.
//!
//! A mutation edits only the device's `settings` document and re-sends the
//! whole device object; `measures` and `schedules` travel back unchanged.

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::parser::primary_settings;
use crate::sync::{FrameTransport, SyncEngine, WriteReceipt};
use crate::types::*;
use crate::{Error, Result};

/// Manual setpoint used when the device reports none.
const FALLBACK_SET_POINT: f64 = 18.0;

/// Presence of this key overrides `primary.mode` on the device.
const MANUAL_TIMER: &str = "manualTimer";

/// A device ready to be sent in an active sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub settings: RawJson,
    pub device: Value,
}

fn to_tenths(value: f64) -> i64 {
    (value * 10.0).round() as i64
}

fn manual_set_point(value: f64) -> Value {
    json!({ "unit": "C", "value": to_tenths(value), "preset": 0 })
}

fn ensure_mutable(device: &Device) -> Result<()> {
    match device.family {
        DeviceFamily::Current => Ok(()),
        DeviceFamily::Legacy => Err(Error::UnsupportedDeviceFamily(device.family.to_string())),
    }
}

/// The `primary` object, created (or replaced if not an object) on demand.
fn primary_mut(settings: &mut Map<String, Value>) -> &mut Map<String, Value> {
    let slot = settings
        .entry("primary")
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!("primary was just made an object"),
    }
}

pub fn build_mode_change(device: &Device, mode: Mode) -> Result<Mutation> {
    ensure_mutable(device)?;
    let mut settings = device.settings.parse_object();

    match mode {
        Mode::Auto | Mode::Off | Mode::Frost | Mode::Eco => {
            settings.insert(
                "primary".to_string(),
                json!({ "mode": mode.as_wire_str(), "manualSetPoint": null }),
            );
        }
        Mode::Manual => {
            let fallback = device.set_point.value().unwrap_or(FALLBACK_SET_POINT);
            let primary = primary_mut(&mut settings);
            if primary.get("manualSetPoint").is_none_or(Value::is_null) {
                primary.insert("manualSetPoint".to_string(), manual_set_point(fallback));
            }
            primary.insert("mode".to_string(), json!(Mode::Manual.as_wire_str()));
        }
        Mode::Unknown => return Err(Error::UnsupportedMode(mode.to_string())),
    }

    settings.remove(MANUAL_TIMER);
    Ok(finish(device, settings))
}

pub fn build_setpoint_change(device: &Device, value: f64) -> Result<Mutation> {
    ensure_mutable(device)?;
    if !value.is_finite() {
        return Err(Error::InvalidSetPoint(value));
    }
    let mut settings = device.settings.parse_object();

    let primary = primary_mut(&mut settings);
    primary.insert("mode".to_string(), json!(Mode::Manual.as_wire_str()));
    primary.insert("manualSetPoint".to_string(), manual_set_point(value));

    settings.remove(MANUAL_TIMER);
    Ok(finish(device, settings))
}

fn finish(device: &Device, settings: Map<String, Value>) -> Mutation {
    let settings = RawJson::new(Value::Object(settings).to_string());
    Mutation {
        device: wire_device(device, &settings),
        settings,
    }
}

/// Full device object as the server expects it inside `clientPayload`.
pub fn wire_device(device: &Device, settings: &RawJson) -> Value {
    json!({
        "handle": device.handle,
        "serialNumber": device.serial_number,
        "name": device.name,
        "settings": settings.as_str(),
        "measures": device.measures.as_str(),
        "schedules": device.schedules.as_str(),
        "houseHandle": device.setter.house_handle,
        "tag": device.family.tag(),
        "channel": device.channel,
        "status": "PENDING",
        "syncVersion": 0,
        "isDeleted": device.setter.is_deleted,
        "role": device.setter.role,
        "gatewayHandle": device.setter.gateway_handle,
    })
}

fn ensure_bound(engine: &SyncEngine, device: &Device) -> Result<()> {
    if device.binding == Some(engine.client_id()) {
        Ok(())
    } else {
        Err(Error::NotBound(device.key().to_string()))
    }
}

/// Switch `device` to `mode` and update its cached fields on success.
pub async fn set_mode<T>(
    engine: &mut SyncEngine,
    link: &mut T,
    device: &mut Device,
    mode: Mode,
) -> Result<WriteReceipt>
where
    T: FrameTransport + ?Sized,
{
    ensure_bound(engine, device)?;
    let mutation = build_mode_change(device, mode)?;
    debug!(device = device.key(), %mode, "setting mode");

    let receipt = engine.write_device(link, &mutation.device).await?;
    apply_settings(device, mutation.settings);
    device.mode = mode;
    Ok(receipt)
}

/// Force manual mode at `value` degrees and update cached fields on success.
pub async fn set_setpoint<T>(
    engine: &mut SyncEngine,
    link: &mut T,
    device: &mut Device,
    value: f64,
) -> Result<WriteReceipt>
where
    T: FrameTransport + ?Sized,
{
    ensure_bound(engine, device)?;
    let mutation = build_setpoint_change(device, value)?;
    debug!(device = device.key(), value, "setting setpoint");

    let receipt = engine.write_device(link, &mutation.device).await?;
    apply_settings(device, mutation.settings);
    device.mode = Mode::Manual;
    device.set_point = Reading::Available(value);
    Ok(receipt)
}

/// Store written settings and re-derive the fields read from them.
fn apply_settings(device: &mut Device, settings: RawJson) {
    let (mode_setting, manual_set_point) = primary_settings(&settings.parse_object());
    device.mode_setting = mode_setting;
    device.manual_set_point = manual_set_point;
    device.settings = settings;
}
