//! Broker connections
//!
//! One logical MQTT connection per role: the subscriber owns the infinite
//! reconnect-and-receive loop, the publisher owns a single best-effort
//! connection fed by a command channel. Each role exclusively owns its
//! `ConnectionState`; everything else only reads it through a handle.

mod publisher;
mod state;
mod subscriber;
mod subscriptions;

pub use publisher::PublisherConnection;
pub use state::{ConnectionHandle, ConnectionState};
pub use subscriber::{MessageHandler, SubscriberConnection};
pub use subscriptions::SubscriptionManager;

use std::fmt;

/// Errors that tear down a broker connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Connect attempt or handshake did not complete in time
    Timeout,
    /// TCP-level failure or peer close
    ConnectionLost(String),
    /// Broker refused the connection (CONNACK return code)
    Rejected(String),
    /// Broker sent something we could not parse; treated like a network error
    Protocol(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "connect timed out"),
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::Rejected(msg) => write!(f, "connection rejected: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Role-qualified client identifier, unique per process start so broker-side
/// session state from a previous run never collides with a reconnect.
pub fn client_id(prefix: &str, role: &str) -> String {
    let epoch_secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}-{}-{}", prefix, role, epoch_secs)
}
