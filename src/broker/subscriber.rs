//! Subscriber role connection
//!
//! Owns the telemetry direction of the bridge: connect to the broker,
//! re-apply the fixed subscriptions, then hand every inbound PUBLISH to the
//! message handler. Any failure, from a refused TCP connect to a malformed
//! packet mid-session, tears the connection down and the loop retries after
//! a fixed backoff. There is no retry bound and no fatal error.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{Decoder, Encoder};
use crate::config::BrokerConfig;
use crate::protocol::{Connect, ConnectReturnCode, Packet};

use super::{client_id, ConnectionError, ConnectionHandle, ConnectionState, SubscriptionManager};

/// Seam between the receive loop and the rest of the bridge.
///
/// The transport invokes this for every inbound PUBLISH; implementations
/// must not fail (decode anomalies degrade internally, per the pipeline's
/// contract).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, topic: &str, payload: Bytes);
}

pub struct SubscriberConnection {
    config: BrokerConfig,
    subscriptions: SubscriptionManager,
    handler: Arc<dyn MessageHandler>,
    state: ConnectionHandle,
    client_id: String,
}

impl SubscriberConnection {
    pub fn new(
        config: BrokerConfig,
        subscriptions: SubscriptionManager,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        let client_id = client_id(&config.client_id_prefix, "subscriber");
        Self {
            config,
            subscriptions,
            handler,
            state: ConnectionHandle::new(),
            client_id,
        }
    }

    /// Read-only view of this role's connection state
    pub fn state_handle(&self) -> ConnectionHandle {
        self.state.clone()
    }

    /// Drive the full reconnect lifecycle. Never returns; the supervisor
    /// runs it on its own task and process shutdown terminates it.
    pub async fn run(self) {
        let backoff = self.config.reconnect_backoff;

        loop {
            self.state.set(ConnectionState::Connecting);
            info!("Connecting to broker {} ...", self.config.address());

            let err = self.connect_and_receive().await;
            warn!("Broker connection lost: {}", err);
            // A session that died after the handshake goes back to
            // Disconnected; a failed attempt parks in Failed until the
            // backoff folds it into the next Connecting.
            if self.state.get() == ConnectionState::Connected {
                self.state.set(ConnectionState::Disconnected);
            } else {
                self.state.set(ConnectionState::Failed);
            }

            debug!("Reconnecting in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    /// Connect, subscribe, and pump messages until the session dies.
    /// Returns the error that ended it; there is no clean-exit path.
    async fn connect_and_receive(&self) -> ConnectionError {
        match self.session().await {
            Err(e) => e,
            // The receive loop only exits by error
            Ok(()) => ConnectionError::ConnectionLost("receive loop ended".to_string()),
        }
    }

    async fn session(&self) -> Result<(), ConnectionError> {
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.address()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)?
        .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;

        let (mut read_half, mut write_half) = stream.into_split();

        let encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        // CONNECT / CONNACK handshake
        encoder
            .encode(
                &Packet::Connect(Connect {
                    client_id: self.client_id.clone(),
                    clean_session: true,
                    keep_alive: self.config.keepalive,
                }),
                &mut buf,
            )
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        write_half
            .write_all(&buf)
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;

        let mut read_buf = BytesMut::with_capacity(4096);
        let connack = timeout(self.config.connect_timeout, async {
            loop {
                if let Some((packet, consumed)) = decoder
                    .decode(&read_buf)
                    .map_err(|e| ConnectionError::Protocol(e.to_string()))?
                {
                    let _ = read_buf.split_to(consumed);
                    return Ok(packet);
                }
                let n = read_half
                    .read_buf(&mut read_buf)
                    .await
                    .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;
                if n == 0 {
                    return Err(ConnectionError::ConnectionLost(
                        "closed during handshake".to_string(),
                    ));
                }
            }
        })
        .await
        .map_err(|_| ConnectionError::Timeout)??;

        let rc = match connack {
            Packet::ConnAck(ack) => ack.return_code,
            other => {
                return Err(ConnectionError::Protocol(format!(
                    "expected CONNACK, got packet type {}",
                    other.packet_type()
                )))
            }
        };
        if rc != ConnectReturnCode::Accepted {
            return Err(ConnectionError::Rejected(format!("{:?}", rc)));
        }

        self.state.set(ConnectionState::Connected);
        info!(
            "Connected to broker {} (rc={})",
            self.config.address(),
            rc as u8
        );

        self.subscriptions.apply(&mut write_half).await?;

        // Receive loop
        let keepalive = std::time::Duration::from_secs(self.config.keepalive.max(1) as u64);
        let mut keepalive_timer = tokio::time::interval(keepalive);
        keepalive_timer.reset();

        loop {
            // Drain every complete packet before reading again
            while let Some((packet, consumed)) = decoder
                .decode(&read_buf)
                .map_err(|e| ConnectionError::Protocol(e.to_string()))?
            {
                let _ = read_buf.split_to(consumed);
                match packet {
                    Packet::Publish(publish) => {
                        self.handler
                            .on_message(&publish.topic, publish.payload)
                            .await;
                    }
                    Packet::PingResp => {
                        debug!("PINGRESP received");
                    }
                    Packet::SubAck(ack) => {
                        debug!("SUBACK received ({} topics)", ack.return_codes.len());
                    }
                    Packet::Disconnect => {
                        return Err(ConnectionError::ConnectionLost(
                            "broker sent DISCONNECT".to_string(),
                        ));
                    }
                    other => {
                        debug!("Ignoring packet type {}", other.packet_type());
                    }
                }
            }

            tokio::select! {
                result = read_half.read_buf(&mut read_buf) => {
                    let n = result.map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;
                    if n == 0 {
                        return Err(ConnectionError::ConnectionLost("connection closed".to_string()));
                    }
                }
                _ = keepalive_timer.tick() => {
                    buf.clear();
                    encoder
                        .encode(&Packet::PingReq, &mut buf)
                        .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
                    write_half
                        .write_all(&buf)
                        .await
                        .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;
                }
            }
        }
    }
}
