//! Message Decoder
//!
//! Turns a raw broker message into the event shape the realtime clients
//! consume. This path has no error case: invalid UTF-8 is replaced, and
//! payloads that are not JSON ride along as their raw text.

use serde::Serialize;
use serde_json::Value;

/// A decoded inbound broker message.
///
/// Immutable once created; the fan-out broadcasts it verbatim and nothing
/// retains it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageEvent {
    /// Topic the message arrived on
    pub topic: String,
    /// Parsed JSON value, or the raw text when the payload is not JSON
    pub payload: Value,
    /// Decoded payload text, verbatim
    pub raw: String,
    /// Decode time, epoch milliseconds
    pub ts: u64,
}

impl MessageEvent {
    /// Decode a raw broker message. Never fails.
    pub fn decode(topic: &str, raw_bytes: &[u8]) -> Self {
        let raw = String::from_utf8_lossy(raw_bytes).into_owned();
        let payload = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => value,
            Err(_) => Value::String(raw.clone()),
        };

        Self {
            topic: topic.to_string(),
            payload,
            raw,
            ts: epoch_millis(),
        }
    }
}

/// Current time as epoch milliseconds
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
