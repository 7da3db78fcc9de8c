//! mqbridge - MQTT to WebSocket bridge for realtime dashboards
//!
//! Relays messages from broker topics to every connected realtime client
//! and relays client commands back to the broker on a command topic, with
//! automatic subscriber reconnection and a JSON health endpoint.

pub mod bridge;
pub mod broker;
pub mod codec;
pub mod config;
pub mod protocol;
pub mod server;

pub use bridge::{
    ClientFrame, CommandRelay, CommandResult, EventFanout, HealthSnapshot, MessageEvent,
    Supervisor,
};
pub use broker::{ConnectionHandle, ConnectionState, PublisherConnection, SubscriberConnection};
pub use config::Config;
pub use protocol::QoS;
pub use server::{HealthServer, RealtimeServer};
