//! Realtime client-facing servers
//!
//! The WebSocket server carries the bidirectional event channel to browser
//! clients; the HTTP server exposes the health query. Both are thin: the
//! bridge semantics live in `bridge`.

mod http;
mod ws;

pub use http::HealthServer;
pub use ws::RealtimeServer;
