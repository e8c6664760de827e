use std::fs::{File, OpenOptions};
use std::io::Write;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every server payload written in full.
    Full,
    /// First payload in full, then only changed paths.
    Diffed,
}

pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_payload: Option<Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_payload: None,
        })
    }

    pub fn log_send(&mut self, frame: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "send",
            "frame": frame,
        });
        self.write_line(&entry);
    }

    /// Record a received `serverPayload` along with its sync version.
    pub fn log_sync(&mut self, version: u64, payload: &Value) {
        let payload = match payload {
            Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| payload.clone()),
            other => other.clone(),
        };

        let entry = match (self.mode, self.previous_payload.as_ref()) {
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, &payload, "", &mut changes);
                let change_entries: Vec<Value> = changes
                    .iter()
                    .map(|(path, old, new)| json!({ "path": path, "old": old, "new": new }))
                    .collect();
                json!({
                    "ts": Utc::now().to_rfc3339(),
                    "dir": "sync",
                    "version": version,
                    "changes": change_entries,
                })
            }
            (MessageLogMode::Diffed, None) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "sync",
                "version": version,
                "full": true,
                "payload": payload,
            }),
            (MessageLogMode::Full, _) => json!({
                "ts": Utc::now().to_rfc3339(),
                "dir": "sync",
                "version": version,
                "payload": payload,
            }),
        };
        self.write_line(&entry);
        self.previous_payload = Some(payload);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &str) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_send_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_send(&json!({"target": "SyncRequest"}));

        let lines = read_lines(path);
        assert_eq!(lines[0]["dir"], "send");
        assert_eq!(lines[0]["frame"]["target"], "SyncRequest");
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn string_payload_is_decoded_before_logging() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Full, path).unwrap();
        logger.log_sync(4, &Value::String("{\"devices\":[]}".into()));

        let lines = read_lines(path);
        assert_eq!(lines[0]["version"], 4);
        assert!(lines[0]["payload"]["devices"].is_array());
    }

    #[test]
    fn diffed_mode_logs_full_first_then_changes() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_str().unwrap();
        let mut logger = MessageLogger::new(MessageLogMode::Diffed, path).unwrap();

        logger.log_sync(1, &json!({"devices": {"S1": {"name": "Living"}}}));
        logger.log_sync(2, &json!({"devices": {"S1": {"name": "Kitchen"}}}));
        logger.log_sync(3, &json!({"devices": {"S1": {"name": "Kitchen"}}}));

        let lines = read_lines(path);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["full"], true);
        let changes = lines[1]["changes"].as_array().unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0]["path"], "devices.S1.name");
        assert_eq!(changes[0]["new"], "Kitchen");
        assert_eq!(lines[2]["changes"].as_array().unwrap().len(), 0);
    }
}
