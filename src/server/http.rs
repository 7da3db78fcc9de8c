//! HTTP server for the health endpoint

use std::convert::Infallible;
use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::bridge::HealthSnapshot;
use crate::broker::ConnectionHandle;

/// HTTP server that exposes the bridge health query
pub struct HealthServer {
    subscriber: ConnectionHandle,
    publisher: ConnectionHandle,
    addr: SocketAddr,
}

impl HealthServer {
    pub fn new(
        subscriber: ConnectionHandle,
        publisher: ConnectionHandle,
        addr: SocketAddr,
    ) -> Self {
        Self {
            subscriber,
            publisher,
            addr,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("Health endpoint listening on http://{}/health", self.addr);

        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let subscriber = self.subscriber.clone();
            let publisher = self.publisher.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let subscriber = subscriber.clone();
                    let publisher = publisher.clone();
                    async move { handle_request(req, subscriber, publisher).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving health connection: {:?}", err);
                }
            });
        }
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    subscriber: ConnectionHandle,
    publisher: ConnectionHandle,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/health" => {
            let snapshot = HealthSnapshot {
                mqtt_connected: subscriber.is_connected(),
                pub_connected: publisher.is_connected(),
            };
            let body = serde_json::to_vec(&snapshot).unwrap_or_default();
            Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap()
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .unwrap(),
    };

    Ok(response)
}
