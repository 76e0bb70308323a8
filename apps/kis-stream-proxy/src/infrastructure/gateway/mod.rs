//! Downstream WebSocket Gateway
//!
//! One WebSocket per viewer per symbol:
//!
//! - `GET /ws/stock/{code}`
//! - `GET /ws/stock/{code}/`
//!
//! Each connection subscribes a fresh sink on the multiplexer and relays
//! every event as one JSON text frame. Records are keyed by vendor field
//! codes; notices are sent as `{"error": msg}`. Closing the socket releases
//! the sink.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::Multiplexer;
use crate::domain::streaming::FeedEvent;
use crate::infrastructure::metrics;

// =============================================================================
// State
// =============================================================================

/// Shared gateway state.
pub struct GatewayState {
    multiplexer: Arc<Multiplexer>,
    clients: AtomicUsize,
    cancel: CancellationToken,
}

impl GatewayState {
    /// Create gateway state over a multiplexer.
    #[must_use]
    pub const fn new(multiplexer: Arc<Multiplexer>, cancel: CancellationToken) -> Self {
        Self {
            multiplexer,
            clients: AtomicUsize::new(0),
            cancel,
        }
    }

    /// Connected downstream clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// Counts a client for as long as it is held.
struct ClientGuard<'a> {
    clients: &'a AtomicUsize,
}

impl<'a> ClientGuard<'a> {
    fn enter(clients: &'a AtomicUsize) -> Self {
        let count = clients.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_gateway_clients(count);
        Self { clients }
    }
}

impl Drop for ClientGuard<'_> {
    fn drop(&mut self) {
        let count = self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::set_gateway_clients(count);
    }
}

// =============================================================================
// Server
// =============================================================================

/// Gateway HTTP server.
pub struct GatewayServer {
    port: u16,
    state: Arc<GatewayState>,
    cancel: CancellationToken,
}

impl GatewayServer {
    /// Create a gateway server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<GatewayState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError` if binding fails or the server stops with an
    /// error.
    pub async fn run(self) -> Result<(), GatewayError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::ServerFailed` if the server stops with an error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), GatewayError> {
        let local = listener.local_addr().ok();
        tracing::info!(addr = ?local, "Gateway listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| GatewayError::ServerFailed(e.to_string()))?;

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

/// Gateway routes.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws/stock/{code}", get(stock_handler))
        .route("/ws/stock/{code}/", get(stock_handler))
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

async fn stock_handler(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    ws.on_upgrade(move |socket| relay(socket, code, state))
}

async fn relay(socket: WebSocket, code: String, state: Arc<GatewayState>) {
    let _client = ClientGuard::enter(&state.clients);
    let mut subscription = state.multiplexer.subscribe_stream(&code);
    let (mut outbound, mut inbound) = socket.split();

    tracing::info!(symbol = %code, clients = state.client_count(), "Gateway client connected");

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => {
                let _ = outbound.send(Message::Close(None)).await;
                break;
            }
            event = subscription.next() => {
                let Some(event) = event else { break };
                let text = match encode_event(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(symbol = %code, error = %e, "Event not serializable");
                        continue;
                    }
                };
                if outbound.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    drop(subscription);
    tracing::info!(symbol = %code, "Gateway client disconnected");
}

/// JSON text for one feed event.
///
/// # Errors
///
/// Returns an error if the record cannot be serialized.
pub fn encode_event(event: &FeedEvent) -> Result<String, serde_json::Error> {
    match event {
        FeedEvent::Record(record) => serde_json::to_string(record.as_ref()),
        FeedEvent::Error(message) => serde_json::to_string(&serde_json::json!({ "error": message })),
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Gateway server errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
