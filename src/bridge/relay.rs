//! Command Relay
//!
//! Accepts a `send_command` payload from a realtime client, extracts the
//! command text, publishes it on the fixed command topic, and reports the
//! outcome to that client only. A payload with no usable command text is
//! silently ignored: no publish, no result, no error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::broker::PublisherConnection;

/// Publish seam so the relay can be exercised without a live broker
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Returns whether the send was accepted by the underlying connection
    async fn publish(&self, topic: &str, payload: &str) -> bool;
}

#[async_trait]
impl CommandPublisher for PublisherConnection {
    async fn publish(&self, topic: &str, payload: &str) -> bool {
        PublisherConnection::publish(self, topic, payload).await
    }
}

/// Outcome of one relayed command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Original command text
    pub cmd: String,
    /// Whether the publish was accepted
    pub ok: bool,
}

pub struct CommandRelay {
    publisher: Arc<dyn CommandPublisher>,
    command_topic: String,
}

impl CommandRelay {
    pub fn new(publisher: Arc<dyn CommandPublisher>, command_topic: String) -> Self {
        Self {
            publisher,
            command_topic,
        }
    }

    /// Relay one client command. `None` means the payload carried no
    /// command text and nothing was done.
    pub async fn handle(&self, data: &Value) -> Option<CommandResult> {
        let cmd = extract_command(data)?;

        let ok = self.publisher.publish(&self.command_topic, cmd).await;
        Some(CommandResult {
            cmd: cmd.to_string(),
            ok,
        })
    }
}

/// Pull the command text out of a `send_command` payload: either a
/// structured object carrying a `cmd` field, or a bare string.
fn extract_command(data: &Value) -> Option<&str> {
    let cmd = match data {
        Value::Object(map) => map.get("cmd").and_then(Value::as_str),
        Value::String(s) => Some(s.as_str()),
        _ => None,
    };
    match cmd {
        Some(c) if !c.is_empty() => Some(c),
        _ => {
            debug!("send_command payload without command text, ignoring");
            None
        }
    }
}
