//! Publisher role connection
//!
//! One connect attempt at startup; on success a background task owns the
//! socket and drains a command channel. There is deliberately no reconnect
//! here: the original bridge never re-established a lost publisher link,
//! and the asymmetry is preserved (see DESIGN.md). `publish` never raises;
//! every failure surfaces as `false`.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::codec::{Decoder, Encoder};
use crate::config::BrokerConfig;
use crate::protocol::{Connect, ConnectReturnCode, Packet, Publish};

use super::{client_id, ConnectionError, ConnectionHandle, ConnectionState};

/// Work item for the connection task
struct PublishRequest {
    topic: String,
    payload: Bytes,
    /// Whether the send was accepted by the connection (not delivery)
    done: oneshot::Sender<bool>,
}

pub struct PublisherConnection {
    config: BrokerConfig,
    state: ConnectionHandle,
    request_tx: Option<mpsc::Sender<PublishRequest>>,
}

impl PublisherConnection {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            state: ConnectionHandle::new(),
            request_tx: None,
        }
    }

    /// Read-only view of this role's connection state
    pub fn state_handle(&self) -> ConnectionHandle {
        self.state.clone()
    }

    /// Single connect attempt. On success the send/receive task is running
    /// and `publish` becomes usable; on failure the role stays Disconnected
    /// until process restart.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.state.set(ConnectionState::Connecting);

        let stream = match self.handshake().await {
            Ok(stream) => stream,
            Err(e) => {
                self.state.set(ConnectionState::Failed);
                return Err(e);
            }
        };

        self.state.set(ConnectionState::Connected);
        info!("Publisher connected to broker {}", self.config.address());

        let (tx, rx) = mpsc::channel(64);
        self.request_tx = Some(tx);

        let state = self.state.clone();
        let keepalive = self.config.keepalive;
        tokio::spawn(async move {
            if let Err(e) = Self::send_loop(stream, rx, keepalive).await {
                warn!("Publisher connection lost: {}", e);
            }
            state.set(ConnectionState::Disconnected);
        });

        Ok(())
    }

    /// Send one message on `topic`. Returns whether the connection accepted
    /// the send; bounded by the configured send timeout, never blocks
    /// indefinitely, never raises.
    pub async fn publish(&self, topic: &str, payload: &str) -> bool {
        let Some(tx) = &self.request_tx else {
            debug!("Publish dropped, publisher never connected");
            return false;
        };
        if !self.state.is_connected() {
            debug!("Publish dropped, publisher not connected");
            return false;
        }

        let (done_tx, done_rx) = oneshot::channel();
        let request = PublishRequest {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload.as_bytes()),
            done: done_tx,
        };

        let sent = timeout(self.config.send_timeout, tx.send(request)).await;
        match sent {
            Ok(Ok(())) => {}
            _ => {
                warn!("Publish to {} failed: connection task unavailable", topic);
                return false;
            }
        }

        match timeout(self.config.send_timeout, done_rx).await {
            Ok(Ok(ok)) => {
                info!("publish to {}: ok={}", topic, ok);
                ok
            }
            _ => {
                warn!("Publish to {} failed: no result from connection task", topic);
                false
            }
        }
    }

    async fn handshake(&self) -> Result<TcpStream, ConnectionError> {
        let mut stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.address()),
        )
        .await
        .map_err(|_| ConnectionError::Timeout)?
        .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;

        let encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();

        encoder
            .encode(
                &Packet::Connect(Connect {
                    client_id: client_id(&self.config.client_id_prefix, "publisher"),
                    clean_session: true,
                    keep_alive: self.config.keepalive,
                }),
                &mut buf,
            )
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        stream
            .write_all(&buf)
            .await
            .map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;

        let mut read_buf = BytesMut::with_capacity(1024);
        let packet = timeout(self.config.connect_timeout, async {
            loop {
                if let Some((packet, consumed)) = decoder
                    .decode(&read_buf)
                    .map_err(|e| ConnectionError::Protocol(e.to_string()))?
                {
                    let _ = read_buf.split_to(consumed);
                    return Ok(packet);
                }
                let n = stream
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

        match packet {
            Packet::ConnAck(ack) if ack.return_code == ConnectReturnCode::Accepted => Ok(stream),
            Packet::ConnAck(ack) => {
                Err(ConnectionError::Rejected(format!("{:?}", ack.return_code)))
            }
            other => Err(ConnectionError::Protocol(format!(
                "expected CONNACK, got packet type {}",
                other.packet_type()
            ))),
        }
    }

    /// Background send/receive loop owning the socket
    async fn send_loop(
        stream: TcpStream,
        mut rx: mpsc::Receiver<PublishRequest>,
        keepalive: u16,
    ) -> Result<(), ConnectionError> {
        let (mut read_half, mut write_half) = stream.into_split();
        let encoder = Encoder::new();
        let mut decoder = Decoder::new();
        let mut buf = BytesMut::new();
        let mut read_buf = BytesMut::with_capacity(1024);

        let keepalive = std::time::Duration::from_secs(keepalive.max(1) as u64);
        let mut keepalive_timer = tokio::time::interval(keepalive);
        keepalive_timer.reset();

        loop {
            tokio::select! {
                request = rx.recv() => {
                    let Some(request) = request else {
                        // All handles dropped; process is shutting down
                        return Ok(());
                    };

                    buf.clear();
                    let encoded = encoder.encode(
                        &Packet::Publish(Publish {
                            topic: request.topic,
                            payload: request.payload,
                            retain: false,
                        }),
                        &mut buf,
                    );

                    let ok = match encoded {
                        Ok(()) => write_half.write_all(&buf).await.is_ok(),
                        Err(_) => false,
                    };
                    let _ = request.done.send(ok);
                    if !ok {
                        return Err(ConnectionError::ConnectionLost("write failed".to_string()));
                    }
                }
                result = read_half.read_buf(&mut read_buf) => {
                    let n = result.map_err(|e| ConnectionError::ConnectionLost(e.to_string()))?;
                    if n == 0 {
                        return Err(ConnectionError::ConnectionLost("connection closed".to_string()));
                    }
                    while let Some((packet, consumed)) = decoder
                        .decode(&read_buf)
                        .map_err(|e| ConnectionError::Protocol(e.to_string()))?
                    {
                        let _ = read_buf.split_to(consumed);
                        match packet {
                            Packet::PingResp => debug!("Publisher PINGRESP received"),
                            Packet::Disconnect => {
                                return Err(ConnectionError::ConnectionLost(
                                    "broker sent DISCONNECT".to_string(),
                                ));
                            }
                            other => debug!("Publisher ignoring packet type {}", other.packet_type()),
                        }
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
