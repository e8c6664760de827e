//! Record-separator framing for the sync socket.
//!
//! Every JSON object on the wire is terminated by `\x1e`. A single WebSocket
//! text message may carry several frames, or none (keep-alive padding).

use serde::Serialize;
use serde_json::Value;
use tracing::{trace, warn};

use crate::Result;

pub const RECORD_SEPARATOR: char = '\x1e';

/// Serialize `message` and append the terminator.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> Result<String> {
    let mut text = serde_json::to_string(message)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Split a text message into parsed frames, in order.
///
/// Blank segments are skipped. A segment that is not valid JSON is logged
/// and dropped; the remaining frames are still returned.
pub fn decode(raw: &str) -> Vec<Value> {
    raw.split(RECORD_SEPARATOR)
        .filter(|segment| !segment.trim().is_empty())
        .filter_map(|segment| {
            trace!(frame = segment, "server frame");
            match serde_json::from_str(segment) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(error = %e, frame = segment, "dropping unparseable frame");
                    None
                }
            }
        })
        .collect()
}
