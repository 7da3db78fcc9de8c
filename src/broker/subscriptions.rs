//! Subscription Manager
//!
//! Holds the fixed, ordered set of topics the subscriber role cares about
//! and re-applies it over every fresh connection. Applying twice sends the
//! same SUBSCRIBE again; brokers treat a repeated subscribe as a no-op, so
//! the operation is idempotent.

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::info;

use crate::codec::Encoder;
use crate::config::TopicsConfig;
use crate::protocol::{Packet, Subscribe, Subscription};

use super::ConnectionError;

pub struct SubscriptionManager {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionManager {
    pub fn from_config(topics: &TopicsConfig) -> Self {
        let subscriptions = topics
            .subscriptions
            .iter()
            .map(|s| Subscription {
                filter: s.topic.clone(),
                qos: s.qos_level(),
            })
            .collect();
        Self { subscriptions }
    }

    /// Topic filters in declared order
    pub fn filters(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.iter().map(|s| s.filter.as_str())
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Subscribe to every declared topic over a live connection
    pub async fn apply<W>(&self, writer: &mut W) -> Result<(), ConnectionError>
    where
        W: AsyncWrite + Unpin,
    {
        let subscribe = Packet::Subscribe(Subscribe {
            packet_id: 1,
            subscriptions: self.subscriptions.clone(),
        });

        let mut buf = BytesMut::new();
        Encoder::new()
            .encode(&subscribe, &mut buf)
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        writer
            .write_all(&buf)
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;

        for sub in &self.subscriptions {
            info!("Subscribed -> {}", sub.filter);
        }
        Ok(())
    }
}
