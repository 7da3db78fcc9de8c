//! Bridge Supervisor
//!
//! Process-wide orchestrator. Startup order matters and mirrors the
//! original bridge: the publisher connects first (best effort), then the
//! subscriber's reconnect loop goes onto its own task, and only then do the
//! realtime servers start accepting clients.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::broker::{
    ConnectionHandle, MessageHandler, PublisherConnection, SubscriberConnection,
    SubscriptionManager,
};
use crate::config::Config;

use super::{CommandRelay, EventFanout, MessageEvent, MessageJournal};

/// Aggregate health view, reduced to one boolean per role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub mqtt_connected: bool,
    pub pub_connected: bool,
}

/// Telemetry pipeline behind the subscriber's receive loop:
/// decode, journal, fan out. Nothing in here can fail the loop.
struct TelemetryPipeline {
    journal: MessageJournal,
    fanout: EventFanout,
}

#[async_trait]
impl MessageHandler for TelemetryPipeline {
    async fn on_message(&self, topic: &str, payload: Bytes) {
        let event = MessageEvent::decode(topic, &payload);
        info!(
            "msg arrived: topic={} payload_preview={:.400}",
            topic, event.raw
        );
        self.journal.record(topic, &event.raw).await;
        self.fanout.broadcast(&event);
    }
}

pub struct Supervisor {
    fanout: EventFanout,
    relay: Arc<CommandRelay>,
    subscriber_state: ConnectionHandle,
    publisher_state: ConnectionHandle,
}

impl Supervisor {
    /// Start both broker roles and return the running bridge. The servers
    /// are started by the caller from the handles this exposes, after this
    /// returns, preserving the startup order.
    pub async fn start(config: &Config) -> Self {
        // Publisher first, best effort: a failure here is logged and the
        // role stays down until process restart.
        let mut publisher = PublisherConnection::new(config.broker.clone());
        let publisher_state = publisher.state_handle();
        if let Err(e) = publisher.connect().await {
            warn!("Publisher connect failed: {}", e);
        }
        let publisher = Arc::new(publisher);

        let relay = Arc::new(CommandRelay::new(
            publisher,
            config.topics.command_topic.clone(),
        ));

        let fanout = EventFanout::default();
        let pipeline = Arc::new(TelemetryPipeline {
            journal: MessageJournal::new(config.journal.path.clone()),
            fanout: fanout.clone(),
        });

        let subscriber = SubscriberConnection::new(
            config.broker.clone(),
            SubscriptionManager::from_config(&config.topics),
            pipeline,
        );
        let subscriber_state = subscriber.state_handle();
        tokio::spawn(subscriber.run());

        Self {
            fanout,
            relay,
            subscriber_state,
            publisher_state,
        }
    }

    /// Non-blocking, read-only health query
    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            mqtt_connected: self.subscriber_state.is_connected(),
            pub_connected: self.publisher_state.is_connected(),
        }
    }

    pub fn fanout(&self) -> EventFanout {
        self.fanout.clone()
    }

    pub fn relay(&self) -> Arc<CommandRelay> {
        self.relay.clone()
    }

    /// Handles the health endpoint reads from
    pub fn state_handles(&self) -> (ConnectionHandle, ConnectionHandle) {
        (
            self.subscriber_state.clone(),
            self.publisher_state.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::ConnectionState;

    #[test]
    fn health_reflects_each_role_independently() {
        let subscriber_state = ConnectionHandle::new();
        let publisher_state = ConnectionHandle::new();

        let supervisor = Supervisor {
            fanout: EventFanout::default(),
            relay: Arc::new(CommandRelay::new(
                Arc::new(NeverPublisher),
                "cmd".to_string(),
            )),
            subscriber_state: subscriber_state.clone(),
            publisher_state: publisher_state.clone(),
        };

        assert_eq!(
            supervisor.health(),
            HealthSnapshot {
                mqtt_connected: false,
                pub_connected: false
            }
        );

        subscriber_state.set(ConnectionState::Connected);
        assert_eq!(
            supervisor.health(),
            HealthSnapshot {
                mqtt_connected: true,
                pub_connected: false
            }
        );

        publisher_state.set(ConnectionState::Connected);
        subscriber_state.set(ConnectionState::Disconnected);
        assert_eq!(
            supervisor.health(),
            HealthSnapshot {
                mqtt_connected: false,
                pub_connected: true
            }
        );
    }

    struct NeverPublisher;

    #[async_trait]
    impl crate::bridge::CommandPublisher for NeverPublisher {
        async fn publish(&self, _topic: &str, _payload: &str) -> bool {
            false
        }
    }
}
