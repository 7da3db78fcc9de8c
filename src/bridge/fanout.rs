//! Event Fan-out
//!
//! Delivers every decoded broker event to every currently connected
//! realtime client, with no per-client filtering and no replay. Built on a
//! broadcast channel: client tasks subscribe at accept time, so an event
//! published before a client connected is structurally unseeable by it, and
//! a lagging client drops frames without slowing anyone else.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use super::{CommandResult, MessageEvent};

/// One frame on the realtime client channel: a named event plus payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ClientFrame {
    /// Per-client greeting, sent once on connect
    pub fn connected() -> Self {
        Self {
            event: "connected".to_string(),
            data: json!({"ok": true}),
        }
    }

    /// Broadcast telemetry frame
    pub fn mqtt_message(event: &MessageEvent) -> Self {
        Self {
            event: "mqtt_message".to_string(),
            data: serde_json::to_value(event).unwrap_or(Value::Null),
        }
    }

    /// Publish outcome, delivered to the requesting client only
    pub fn command_result(result: &CommandResult) -> Self {
        Self {
            event: "command_result".to_string(),
            data: json!({"cmd": result.cmd, "ok": result.ok}),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventFanout {
    tx: broadcast::Sender<ClientFrame>,
}

impl EventFanout {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Register a client; it will receive every frame broadcast from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ClientFrame> {
        self.tx.subscribe()
    }

    /// Send-and-forget delivery to all connected clients
    pub fn broadcast(&self, event: &MessageEvent) {
        let receivers = self.tx.send(ClientFrame::mqtt_message(event)).unwrap_or(0);
        debug!(
            "Broadcast mqtt_message from {} to {} client(s)",
            event.topic, receivers
        );
    }
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new(256)
    }
}
