//! WebSocket transport.
//!
//! Authenticates each connection during the handshake, admits it as a
//! [`ClientSession`], forwards inbound inputs and writes queued snapshots
//! back as text frames.

use crate::auth::{extract_token, validate_token, AuthError, TokenSource};
use crate::config::Config;
use crate::world::World;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{error, info, warn};

pub mod client;

pub use client::ClientSession;

/// Connection tracking state (shared across connection handlers).
struct ConnectionState {
    /// Total number of connections.
    total_connections: usize,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            total_connections: 0,
        }
    }

    /// Try to add a connection, returns true if allowed.
    fn try_add_connection(&mut self, max_total: usize) -> bool {
        if self.total_connections >= max_total {
            return false;
        }
        self.total_connections += 1;
        true
    }

    fn remove_connection(&mut self) {
        self.total_connections = self.total_connections.saturating_sub(1);
    }
}

/// Bind the configured address and serve until `shutdown` flips.
pub async fn run(
    config: &Config,
    world: Arc<World>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on ws://{}", addr);
    serve(listener, world, config.server.max_connections, shutdown).await
}

/// Accept connections on an already-bound listener.
pub async fn serve(
    listener: TcpListener,
    world: Arc<World>,
    max_connections: usize,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let conn_state = Arc::new(Mutex::new(ConnectionState::new()));

    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = shutdown.changed() => {
                info!("Listener shutting down");
                return Ok(());
            }
        };

        if !conn_state.lock().await.try_add_connection(max_connections) {
            warn!("Connection rejected (limit reached): {}", addr);
            continue;
        }

        let world = Arc::clone(&world);
        let conn_state = Arc::clone(&conn_state);
        tokio::spawn(async move {
            let result = handle_connection(stream, addr, world).await;

            // Always remove from connection tracking when done
            conn_state.lock().await.remove_connection();

            if let Err(e) = result {
                error!("Connection error from {}: {}", addr, e);
            }
        });
    }
}

fn unauthorized() -> ErrorResponse {
    let mut response = ErrorResponse::new(Some("unauthorized".to_string()));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    world: Arc<World>,
) -> anyhow::Result<()> {
    let mut user: Option<String> = None;
    let authenticate = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
        let header = req
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        let source = extract_token(header, req.uri().query());
        let validated = source
            .as_ref()
            .ok_or(AuthError::EmptyToken)
            .and_then(|s| validate_token(s.token()));

        match validated {
            Ok(id) => {
                if let Some(TokenSource::Header(token)) = &source {
                    match HeaderValue::from_str(token) {
                        Ok(value) => {
                            resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                        }
                        Err(_) => return Err(unauthorized()),
                    }
                }
                user = Some(id);
                Ok(resp)
            }
            Err(e) => {
                warn!("Unauthorized connection from {}: {}", addr, e);
                Err(unauthorized())
            }
        }
    };

    let ws_stream = accept_hdr_async(stream, authenticate).await?;
    let Some(user) = user else {
        return Ok(());
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = world.client_channel();
    let session = ClientSession::admit(Arc::clone(&world), user, addr, tx).await;

    // Snapshots go out in enqueue order on their own task, so a reader
    // waiting on a full input queue does not hold up delivery.
    let writer = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            let text = match Utf8Bytes::try_from(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Skipping non-UTF-8 snapshot for {}: {}", addr, e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::Text(text)).await {
                warn!("Failed to send snapshot to {}: {}", addr, e);
                break;
            }
        }
    });

    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                if let Err(e) = session.handle_message(text.as_bytes()).await {
                    warn!("Dropped message from {}: {}", addr, e);
                }
            }
            Some(Ok(Message::Binary(data))) => {
                if let Err(e) = session.handle_message(&data).await {
                    warn!("Dropped message from {}: {}", addr, e);
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
            Some(Ok(_)) => {}
        }
    }

    session.close().await;
    writer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ClientMessage, InputPayload, Snapshot};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;

    async fn start(config: &Config) -> (Arc<World>, SocketAddr, watch::Sender<bool>) {
        let world = Arc::new(World::new(config));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(serve(
            listener,
            Arc::clone(&world),
            config.server.max_connections,
            stop_rx,
        ));
        (world, addr, stop_tx)
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_end_to_end_input_and_snapshot() {
        let config = Config::from_toml_str("[mirrors]\nenabled = false\n").unwrap();
        let (world, addr, _stop) = start(&config).await;

        let (mut ws, _) = connect_async(format!("ws://{addr}/ws?token=alice"))
            .await
            .unwrap();
        wait_for(|| {
            let world = Arc::clone(&world);
            async move { world.client_count().await == 1 }
        })
        .await;

        let text = ClientMessage::encode_input(&InputPayload { t: 1, ax: 3.0, ay: 4.0, az: 0.0 }).unwrap();
        ws.send(Message::Text(text.into())).await.unwrap();
        wait_for(|| {
            let world = Arc::clone(&world);
            async move { world.pending_inputs() == 1 }
        })
        .await;

        world.step(1.0).await;

        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let snapshot = Snapshot::decode(&frame.into_data()).unwrap();
        // Entity 1 is the primary; the connection got the next id.
        let own = snapshot.entity(2).unwrap();
        assert_eq!((own.x, own.y, own.z), (3.0, 4.0, 0.0));
        assert_eq!(world.user_of(2).await.as_deref(), Some("alice"));

        ws.close(None).await.unwrap();
        wait_for(|| {
            let world = Arc::clone(&world);
            async move { world.client_count().await == 0 }
        })
        .await;
        assert!(world.user_of(2).await.is_none());
        assert!(world.has_entity(2).await);
    }

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let (world, addr, _stop) = start(&Config::default()).await;
        assert!(connect_async(format!("ws://{addr}/ws")).await.is_err());
        assert_eq!(world.client_count().await, 0);
        assert_eq!(world.entity_count().await, 5);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = Config::from_toml_str("[server]\nmax_connections = 1\n").unwrap();
        let (world, addr, _stop) = start(&config).await;

        let (_first, _) = connect_async(format!("ws://{addr}/?token=a")).await.unwrap();
        wait_for(|| {
            let world = Arc::clone(&world);
            async move { world.client_count().await == 1 }
        })
        .await;
        assert!(connect_async(format!("ws://{addr}/?token=b")).await.is_err());
    }
}
