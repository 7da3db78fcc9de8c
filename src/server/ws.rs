//! WebSocket server for realtime clients
//!
//! Each accepted client gets one task. Frames are JSON text messages shaped
//! `{"event": <name>, "data": <value>}`. On connect the client receives a
//! single `connected` greeting; afterwards it sees every `mqtt_message`
//! broadcast plus `command_result` replies to its own `send_command`s.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use crate::bridge::{ClientFrame, CommandRelay, EventFanout};

pub struct RealtimeServer {
    bind: SocketAddr,
    fanout: EventFanout,
    relay: Arc<CommandRelay>,
}

impl RealtimeServer {
    pub fn new(bind: SocketAddr, fanout: EventFanout, relay: Arc<CommandRelay>) -> Self {
        Self {
            bind,
            fanout,
            relay,
        }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        info!("Realtime server listening on ws://{}", self.bind);

        loop {
            let (stream, addr) = listener.accept().await?;
            let fanout = self.fanout.clone();
            let relay = self.relay.clone();
            tokio::spawn(async move {
                handle_client(stream, addr, fanout, relay).await;
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    addr: SocketAddr,
    fanout: EventFanout,
    relay: Arc<CommandRelay>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake from {} failed: {}", addr, e);
            return;
        }
    };
    info!("client connected: {}", addr);

    let (mut sink, mut inbound) = ws.split();

    // Subscribe before greeting so no broadcast can slip between the two
    let mut events = fanout.subscribe();

    if send_frame(&mut sink, &ClientFrame::connected()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            frame = events.recv() => match frame {
                Ok(frame) => {
                    if send_frame(&mut sink, &frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("client {} lagged, {} frame(s) dropped", addr, n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            msg = inbound.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = dispatch(&text, &relay).await {
                        if send_frame(&mut sink, &reply).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary/ping/pong: nothing to do
                Some(Err(e)) => {
                    debug!("client {} read error: {}", addr, e);
                    break;
                }
            },
        }
    }

    info!("client disconnected: {}", addr);
}

/// Handle one inbound client frame; the reply, if any, goes to this client
/// only. Unknown events and unparseable frames are ignored.
async fn dispatch(text: &str, relay: &CommandRelay) -> Option<ClientFrame> {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("ignoring unparseable client frame: {}", e);
            return None;
        }
    };

    match frame.event.as_str() {
        "send_command" => {
            debug!("send_command received: {}", frame.data);
            let result = relay.handle(&frame.data).await?;
            Some(ClientFrame::command_result(&result))
        }
        other => {
            debug!("ignoring unknown client event {:?}", other);
            None
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
    frame: &ClientFrame,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let text = serde_json::to_string(frame)
        .unwrap_or_else(|_| "{\"event\":\"error\"}".to_string());
    sink.send(Message::Text(text)).await
}
