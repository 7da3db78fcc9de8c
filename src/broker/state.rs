//! Per-role connection state

use std::sync::Arc;

use parking_lot::RwLock;

/// Lifecycle state of one broker connection role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connect attempt in flight
    Connecting,
    /// Handshake completed, link live
    Connected,
    /// Last attempt failed; folded back to Connecting after the backoff
    Failed,
}

/// Shared view of a role's connection state.
///
/// The owning connection holds the same handle and is the only writer;
/// every other component clones it for lock-free-enough reads.
#[derive(Debug, Clone, Default)]
pub struct ConnectionHandle {
    state: Arc<RwLock<ConnectionState>>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state (non-blocking read)
    pub fn get(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Reduced health view
    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }

    /// Owner-side transition
    pub(crate) fn set(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}
