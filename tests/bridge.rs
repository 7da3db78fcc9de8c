//! Bridge Integration Tests
//!
//! Runs the real supervisor, subscriber loop, and realtime servers against
//! a scripted in-process MQTT broker on a loopback listener.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;

use mqbridge::codec::{Decoder, Encoder};
use mqbridge::config::Config;
use mqbridge::protocol::{ConnAck, Connect, ConnectReturnCode, Packet, Publish, Subscribe};
use mqbridge::server::{HealthServer, RealtimeServer};
use mqbridge::Supervisor;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Reserve a loopback port
async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// One accepted broker-side connection, driven by the test script
struct BrokerSession {
    stream: TcpStream,
    decoder: Decoder,
    encoder: Encoder,
    read_buf: BytesMut,
}

impl BrokerSession {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_buf: BytesMut::with_capacity(4096),
        }
    }

    async fn recv(&mut self) -> Packet {
        timeout(STEP_TIMEOUT, async {
            loop {
                if let Some((packet, consumed)) = self.decoder.decode(&self.read_buf).unwrap() {
                    let _ = self.read_buf.split_to(consumed);
                    return packet;
                }
                let n = self.stream.read_buf(&mut self.read_buf).await.unwrap();
                assert!(n > 0, "peer closed while a packet was expected");
            }
        })
        .await
        .expect("timed out waiting for a packet")
    }

    async fn send(&mut self, packet: &Packet) {
        let mut buf = BytesMut::new();
        self.encoder.encode(packet, &mut buf).unwrap();
        self.stream.write_all(&buf).await.unwrap();
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Wait for the peer to tear the connection down
    async fn expect_close(&mut self) {
        timeout(STEP_TIMEOUT, async {
            loop {
                let n = self.stream.read_buf(&mut self.read_buf).await.unwrap();
                if n == 0 {
                    return;
                }
            }
        })
        .await
        .expect("timed out waiting for the peer to close");
    }

    /// CONNECT -> CONNACK handshake, from the broker side
    async fn accept_connect(&mut self, return_code: ConnectReturnCode) -> Connect {
        let connect = match self.recv().await {
            Packet::Connect(c) => c,
            other => panic!("expected CONNECT, got {:?}", other),
        };
        self.send(&Packet::ConnAck(ConnAck {
            session_present: false,
            return_code,
        }))
        .await;
        connect
    }

    /// SUBSCRIBE -> SUBACK, from the broker side
    async fn accept_subscribe(&mut self) -> Subscribe {
        let subscribe = match self.recv().await {
            Packet::Subscribe(s) => s,
            other => panic!("expected SUBSCRIBE, got {:?}", other),
        };
        let return_codes = vec![0u8; subscribe.subscriptions.len()];
        self.send(&Packet::SubAck(mqbridge::protocol::SubAck {
            packet_id: subscribe.packet_id,
            return_codes,
        }))
        .await;
        subscribe
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) {
        self.send(&Packet::Publish(Publish {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            retain: false,
        }))
        .await;
    }

    async fn expect_publish(&mut self) -> Publish {
        loop {
            match self.recv().await {
                Packet::Publish(p) => return p,
                Packet::PingReq => self.send(&Packet::PingResp).await,
                other => panic!("expected PUBLISH, got {:?}", other),
            }
        }
    }
}

fn test_config(broker_port: u16, backoff: Duration) -> Config {
    let mut config = Config::default();
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = broker_port;
    config.broker.reconnect_backoff = backoff;
    config.broker.connect_timeout = Duration::from_secs(2);
    config.broker.send_timeout = Duration::from_secs(1);
    config
}

async fn connect_ws(port: u16) -> tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<TcpStream>,
> {
    let url = format!("ws://127.0.0.1:{}", port);
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    loop {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => return ws,
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("websocket connect failed: {}", e),
        }
    }
}

async fn next_frame<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    timeout(STEP_TIMEOUT, async {
        loop {
            match ws.next().await.expect("websocket closed").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting until {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn telemetry_flows_to_every_connected_client() {
    let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_port = broker.local_addr().unwrap().port();

    let script = tokio::spawn(async move {
        // Publisher connects first
        let (stream, _) = broker.accept().await.unwrap();
        let mut publisher = BrokerSession::new(stream);
        let connect = publisher.accept_connect(ConnectReturnCode::Accepted).await;
        assert!(connect.client_id.contains("publisher"));

        // Then the subscriber, which re-applies the fixed topic set
        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        let connect = subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        assert!(connect.client_id.contains("subscriber"));
        let subscribe = subscriber.accept_subscribe().await;
        assert_eq!(subscribe.subscriptions.len(), 2);
        assert_eq!(subscribe.subscriptions[0].filter, "workwell/monitoramento");
        assert_eq!(subscribe.subscriptions[1].filter, "workwell/alerts");

        (publisher, subscriber)
    });

    let ws_port = free_port().await;
    let config = test_config(broker_port, Duration::from_millis(100));
    let supervisor = Supervisor::start(&config).await;

    let ws_bind: SocketAddr = format!("127.0.0.1:{}", ws_port).parse().unwrap();
    let realtime = RealtimeServer::new(ws_bind, supervisor.fanout(), supervisor.relay());
    tokio::spawn(realtime.run());

    let (_publisher, mut subscriber) = script.await.unwrap();

    let mut client_a = connect_ws(ws_port).await;
    let mut client_b = connect_ws(ws_port).await;

    // Each client gets its own greeting, once
    let greeting = next_frame(&mut client_a).await;
    assert_eq!(greeting["event"], "connected");
    assert_eq!(greeting["data"], json!({"ok": true}));
    assert_eq!(next_frame(&mut client_b).await["event"], "connected");

    subscriber
        .publish("workwell/monitoramento", br#"{"temp": 31}"#)
        .await;

    for client in [&mut client_a, &mut client_b] {
        let frame = next_frame(client).await;
        assert_eq!(frame["event"], "mqtt_message");
        assert_eq!(frame["data"]["topic"], "workwell/monitoramento");
        assert_eq!(frame["data"]["payload"], json!({"temp": 31}));
        assert_eq!(frame["data"]["raw"], r#"{"temp": 31}"#);
        assert!(frame["data"]["ts"].as_u64().unwrap() > 0);
    }
}

#[tokio::test]
async fn commands_are_relayed_and_answered_to_the_sender_only() {
    let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_port = broker.local_addr().unwrap().port();

    let script = tokio::spawn(async move {
        let (stream, _) = broker.accept().await.unwrap();
        let mut publisher = BrokerSession::new(stream);
        publisher.accept_connect(ConnectReturnCode::Accepted).await;

        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        subscriber.accept_subscribe().await;

        (publisher, subscriber)
    });

    let ws_port = free_port().await;
    let config = test_config(broker_port, Duration::from_millis(100));
    let supervisor = Supervisor::start(&config).await;

    let ws_bind: SocketAddr = format!("127.0.0.1:{}", ws_port).parse().unwrap();
    let realtime = RealtimeServer::new(ws_bind, supervisor.fanout(), supervisor.relay());
    tokio::spawn(realtime.run());

    let (mut publisher, _subscriber) = script.await.unwrap();

    let mut sender = connect_ws(ws_port).await;
    let mut bystander = connect_ws(ws_port).await;
    next_frame(&mut sender).await; // greeting
    next_frame(&mut bystander).await;

    sender
        .send(Message::Text(
            json!({"event": "send_command", "data": {"cmd": "LIGHT_ON"}}).to_string(),
        ))
        .await
        .unwrap();

    let published = publisher.expect_publish().await;
    assert_eq!(published.topic, "workwell/command");
    assert_eq!(published.payload.as_ref(), b"LIGHT_ON");

    let result = next_frame(&mut sender).await;
    assert_eq!(result["event"], "command_result");
    assert_eq!(result["data"], json!({"cmd": "LIGHT_ON", "ok": true}));

    // The result went to the requesting client only; the bystander sees
    // nothing until the next broadcast.
    sender
        .send(Message::Text(
            json!({"event": "send_command", "data": "LIGHT_OFF"}).to_string(),
        ))
        .await
        .unwrap();
    publisher.expect_publish().await;
    let result = next_frame(&mut sender).await;
    assert_eq!(result["data"]["cmd"], "LIGHT_OFF");

    // A payload without command text is silently ignored
    sender
        .send(Message::Text(
            json!({"event": "send_command", "data": {"other": 1}}).to_string(),
        ))
        .await
        .unwrap();
    sender
        .send(Message::Text(
            json!({"event": "send_command", "data": "PING"}).to_string(),
        ))
        .await
        .unwrap();
    let published = publisher.expect_publish().await;
    assert_eq!(published.payload.as_ref(), b"PING");
    let result = next_frame(&mut sender).await;
    assert_eq!(result["data"]["cmd"], "PING");
}

#[tokio::test]
async fn subscriber_reconnects_and_resubscribes_after_a_drop() {
    let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_port = broker.local_addr().unwrap().port();

    let config = test_config(broker_port, Duration::from_millis(100));

    let script = tokio::spawn(async move {
        let (stream, _) = broker.accept().await.unwrap();
        let mut publisher = BrokerSession::new(stream);
        publisher.accept_connect(ConnectReturnCode::Accepted).await;

        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        subscriber.accept_subscribe().await;

        // Simulated mid-session connection drop
        drop(subscriber);

        // The loop must come back and re-apply the full topic set before
        // any further message flows
        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        let subscribe = subscriber.accept_subscribe().await;
        assert_eq!(subscribe.subscriptions.len(), 2);
        assert_eq!(subscribe.subscriptions[0].filter, "workwell/monitoramento");

        subscriber.publish("workwell/alerts", b"back online").await;
        (publisher, subscriber)
    });

    let supervisor = Supervisor::start(&config).await;
    let mut events = supervisor.fanout().subscribe();

    let (_publisher, _subscriber) = timeout(STEP_TIMEOUT, script).await.unwrap().unwrap();

    let frame = timeout(STEP_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(frame.event, "mqtt_message");
    assert_eq!(frame.data["raw"], "back online");
    assert_eq!(frame.data["topic"], "workwell/alerts");

    let health = supervisor.health();
    assert!(health.mqtt_connected);
}

#[tokio::test]
async fn subscriber_reconnects_after_a_corrupt_packet() {
    let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_port = broker.local_addr().unwrap().port();

    let config = test_config(broker_port, Duration::from_millis(100));

    let script = tokio::spawn(async move {
        let (stream, _) = broker.accept().await.unwrap();
        let mut publisher = BrokerSession::new(stream);
        publisher.accept_connect(ConnectReturnCode::Accepted).await;

        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        subscriber.accept_subscribe().await;

        // Mid-session garbage: packet type 5 is outside the accepted set.
        // The link must be torn down the same as on a network failure.
        subscriber.send_raw(&[0x50, 0x02, 0x00, 0x01]).await;
        subscriber.expect_close().await;

        // Fresh session after the backoff, full topic set re-applied
        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        let subscribe = subscriber.accept_subscribe().await;
        assert_eq!(subscribe.subscriptions.len(), 2);
        assert_eq!(subscribe.subscriptions[0].filter, "workwell/monitoramento");
        assert_eq!(subscribe.subscriptions[1].filter, "workwell/alerts");

        subscriber.publish("workwell/monitoramento", b"clean again").await;
        (publisher, subscriber)
    });

    let supervisor = Supervisor::start(&config).await;
    let mut events = supervisor.fanout().subscribe();

    let (_publisher, _subscriber) = timeout(STEP_TIMEOUT, script).await.unwrap().unwrap();

    let frame = timeout(STEP_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(frame.event, "mqtt_message");
    assert_eq!(frame.data["topic"], "workwell/monitoramento");
    assert_eq!(frame.data["raw"], "clean again");

    assert!(supervisor.health().mqtt_connected);
}

#[tokio::test]
async fn health_reports_each_role_independently() {
    let broker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_port = broker.local_addr().unwrap().port();

    let script = tokio::spawn(async move {
        // Refuse the publisher: its role stays down for the process lifetime
        let (stream, _) = broker.accept().await.unwrap();
        let mut publisher = BrokerSession::new(stream);
        publisher.accept_connect(ConnectReturnCode::NotAuthorized).await;

        let (stream, _) = broker.accept().await.unwrap();
        let mut subscriber = BrokerSession::new(stream);
        subscriber.accept_connect(ConnectReturnCode::Accepted).await;
        subscriber.accept_subscribe().await;
        subscriber
    });

    let http_port = free_port().await;
    let config = test_config(broker_port, Duration::from_millis(100));
    let supervisor = Supervisor::start(&config).await;

    let (sub_state, pub_state) = supervisor.state_handles();
    let http_bind: SocketAddr = format!("127.0.0.1:{}", http_port).parse().unwrap();
    tokio::spawn(HealthServer::new(sub_state.clone(), pub_state, http_bind).run());

    let _subscriber = script.await.unwrap();
    wait_until(|| sub_state.is_connected(), "subscriber is connected").await;

    assert_eq!(
        supervisor.health(),
        mqbridge::HealthSnapshot {
            mqtt_connected: true,
            pub_connected: false
        }
    );

    // And the same picture over HTTP
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    let body = loop {
        match TcpStream::connect(("127.0.0.1", http_port)).await {
            Ok(mut stream) => {
                stream
                    .write_all(
                        b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
                    )
                    .await
                    .unwrap();
                let mut response = String::new();
                stream.read_to_string(&mut response).await.unwrap();
                let body = response.split("\r\n\r\n").nth(1).unwrap().to_string();
                break body;
            }
            Err(_) if tokio::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            Err(e) => panic!("health endpoint unreachable: {}", e),
        }
    };

    let health: Value = serde_json::from_str(body.trim()).unwrap();
    assert_eq!(health, json!({"mqtt_connected": true, "pub_connected": false}));

    // With the publisher down, a relayed command reports ok=false
    let result = supervisor
        .relay()
        .handle(&json!({"cmd": "LIGHT_ON"}))
        .await
        .unwrap();
    assert!(!result.ok);
    assert_eq!(result.cmd, "LIGHT_ON");
}
