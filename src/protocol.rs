use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::config::ClientIdentity;

pub const OAUTH_CLIENT_ID: &str = "com.findernet.Bliss2";
pub const OAUTH_SCOPE: &str = "openid offline_access profile email";
pub const OAUTH_GRANT_TYPE: &str = "password";

pub const TARGET_INIT: &str = "InitRequest";
pub const TARGET_SYNC: &str = "SyncRequest";
pub const TARGET_SYNC_RESPONSE: &str = "SyncResponse";

/// SignalR invocation message type.
const INVOCATION: u8 = 1;

pub const OPERATION_KEY_ALL: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Passive read of the full device list.
    Sync,
    /// Write carrying a mutated device.
    Active,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Sync => "SYNC",
            SyncStatus::Active => "ACTIVE",
        }
    }
}

/// ISO-8601 UTC with microseconds, e.g. `2024-05-01T10:00:00.123456Z`.
pub fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

pub fn handshake_message() -> Value {
    json!({ "protocol": "json", "version": 1 })
}

pub fn init_message(client_id: Uuid, identity: &ClientIdentity) -> Value {
    json!({
        "type": INVOCATION,
        "target": TARGET_INIT,
        "arguments": [{
            "clientId": client_id.to_string(),
            "stamp": stamp(Utc::now()),
            "clientPlatform": identity.platform,
            "clientModel": identity.model,
            "clientBuild": identity.build,
        }]
    })
}

pub fn passive_sync_message(client_id: Uuid) -> Value {
    json!({
        "type": INVOCATION,
        "target": TARGET_SYNC,
        "arguments": [{
            "clientId": client_id.to_string(),
            "clientOperationId": Uuid::nil().to_string(),
            "clientSyncVersion": 0,
            "serverSyncVersion": 0,
            "stamp": stamp(Utc::now()),
            "status": SyncStatus::Sync.as_str(),
            "clientPayload": null,
            "serverPayload": null,
            "clientOperationKey": OPERATION_KEY_ALL,
            "userId": Uuid::nil().to_string(),
        }]
    })
}

/// `client_payload` is the already-serialized `{"devices":[...]}` string.
pub fn active_sync_message(
    client_id: Uuid,
    operation_id: Uuid,
    operation_key: &str,
    client_sync_version: u64,
    client_payload: &str,
) -> Value {
    json!({
        "type": INVOCATION,
        "target": TARGET_SYNC,
        "arguments": [{
            "clientId": client_id.to_string(),
            "clientOperationId": operation_id.to_string(),
            "clientOperationKey": operation_key,
            "clientSyncVersion": client_sync_version,
            "serverSyncVersion": 0,
            "clientPayload": client_payload,
            "serverPayload": null,
            "stamp": stamp(Utc::now()),
            "status": SyncStatus::Active.as_str(),
        }]
    })
}

/// Wrap one device object into the string carried by `clientPayload`.
pub fn client_payload(device: &Value) -> serde_json::Result<String> {
    serde_json::to_string(&json!({ "devices": [device] }))
}

/// The empty object the server sends once the handshake is accepted.
pub fn is_ack(frame: &Value) -> bool {
    frame.as_object().is_some_and(|m| m.is_empty())
}

/// Sync arguments carried by a frame targeting either sync channel name.
pub fn sync_arguments(frame: &Value) -> &[Value] {
    match frame.get("target").and_then(|v| v.as_str()) {
        Some(TARGET_SYNC | TARGET_SYNC_RESPONSE) => frame
            .get("arguments")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stamp_has_microseconds_and_z() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(stamp(at), "2024-05-01T10:00:00.123456Z");
    }

    #[test]
    fn init_message_structure() {
        let id = Uuid::new_v4();
        let msg = init_message(id, &ClientIdentity::default());
        assert_eq!(msg["type"], 1);
        assert_eq!(msg["target"], "InitRequest");
        let arg = &msg["arguments"][0];
        assert_eq!(arg["clientId"], id.to_string());
        assert_eq!(arg["clientPlatform"], "Android/7.1.1");
        assert_eq!(arg["clientBuild"], "166");
        assert!(arg["stamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn passive_sync_structure() {
        let msg = passive_sync_message(Uuid::new_v4());
        let arg = &msg["arguments"][0];
        assert_eq!(msg["target"], "SyncRequest");
        assert_eq!(arg["status"], "SYNC");
        assert_eq!(arg["clientSyncVersion"], 0);
        assert_eq!(arg["serverSyncVersion"], 0);
        assert!(arg["clientPayload"].is_null());
        assert!(arg["serverPayload"].is_null());
        assert_eq!(arg["clientOperationKey"], "ALL");
    }

    #[test]
    fn active_sync_structure() {
        let op = Uuid::new_v4();
        let msg = active_sync_message(Uuid::new_v4(), op, "ALL", 42, "{\"devices\":[]}");
        let arg = &msg["arguments"][0];
        assert_eq!(arg["status"], "ACTIVE");
        assert_eq!(arg["clientSyncVersion"], 42);
        assert_eq!(arg["clientOperationId"], op.to_string());
        assert_eq!(arg["clientPayload"], "{\"devices\":[]}");
    }

    #[test]
    fn client_payload_is_nested_string() {
        let payload = client_payload(&json!({"handle": 1, "settings": "{\"a\":1}"})).unwrap();
        assert_eq!(payload, r#"{"devices":[{"handle":1,"settings":"{\"a\":1}"}]}"#);
    }

    #[test]
    fn ack_is_empty_object_only() {
        assert!(is_ack(&json!({})));
        assert!(!is_ack(&json!({"type": 6})));
        assert!(!is_ack(&json!([])));
    }

    #[test]
    fn sync_arguments_filters_targets() {
        let frame = json!({"type": 1, "target": "SyncResponse", "arguments": [{"serverSyncVersion": 3}]});
        assert_eq!(sync_arguments(&frame).len(), 1);
        let other = json!({"type": 1, "target": "Notify", "arguments": [{}]});
        assert!(sync_arguments(&other).is_empty());
        assert!(sync_arguments(&json!({"type": 6})).is_empty());
    }
}
