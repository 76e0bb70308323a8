//! Upstream Connection
//!
//! The single WebSocket to the KIS real-time endpoint, as an explicit state
//! machine:
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Connected → Disconnected
//! ```
//!
//! The connection never reconnects by itself; its owner calls
//! [`UpstreamConnection::connect`] again. Every transition is mirrored into
//! a shared [`FeedState`] for the health endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::ApprovalKeyProvider;
use crate::domain::auth::Credential;
use crate::infrastructure::kis::messages::SubscribePacket;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// =============================================================================
// Error Type
// =============================================================================

/// Errors from the upstream connection.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// WebSocket transport failure.
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// No approval key could be obtained.
    #[error("failed to issue approval key")]
    Credential,

    /// Operation requires a connected socket.
    #[error("not connected")]
    NotConnected,

    /// Request could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

// =============================================================================
// Connection State
// =============================================================================

/// Upstream connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Opening the socket.
    Connecting,
    /// Socket open, obtaining the approval key.
    Authenticating,
    /// Ready to subscribe and receive.
    Connected,
}

/// Shared view of the upstream feed, read by the health endpoint.
#[derive(Debug, Default)]
pub struct FeedState {
    state: parking_lot::RwLock<ConnectionState>,
    last_connected_at: parking_lot::RwLock<Option<DateTime<Utc>>>,
    error_message: parking_lot::RwLock<Option<String>>,
    subscription_count: AtomicUsize,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl FeedState {
    /// Create a disconnected feed state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
        metrics::set_upstream_connected(state == ConnectionState::Connected);
    }

    /// Drop to `Disconnected`, remembering why.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Disconnected;
        *self.error_message.write() = Some(message);
        metrics::set_upstream_connected(false);
    }

    /// Increment reconnect attempts.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment messages received counter.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Update subscription count.
    pub fn set_subscription_count(&self, count: usize) {
        self.subscription_count.store(count, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Whether the feed is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Last successful connect.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Last recorded error.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Symbols subscribed in the current session.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscription_count.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Total text frames received.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Upstream Connection
// =============================================================================

/// The upstream WebSocket and its cached approval key.
pub struct UpstreamConnection {
    url: String,
    provider: Arc<dyn ApprovalKeyProvider>,
    credential: Option<Credential>,
    writer: Option<SplitSink<WsStream, Message>>,
    reader: Option<SplitStream<WsStream>>,
    feed: Arc<FeedState>,
}

impl UpstreamConnection {
    /// Create a disconnected connection.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        provider: Arc<dyn ApprovalKeyProvider>,
        feed: Arc<FeedState>,
    ) -> Self {
        Self {
            url: url.into(),
            provider,
            credential: None,
            writer: None,
            reader: None,
            feed,
        }
    }

    /// Open the socket and make sure an approval key is cached.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the socket cannot be opened and `Credential`
    /// if no approval key could be issued. Both leave the connection
    /// `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), UpstreamError> {
        self.drop_socket();

        self.feed.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.url, "Connecting to KIS real-time feed");

        let (mut ws, _response) = match tokio_tungstenite::connect_async(&self.url).await {
            Ok(pair) => pair,
            Err(e) => {
                self.feed.set_error(e.to_string());
                return Err(e.into());
            }
        };

        self.feed.set_state(ConnectionState::Authenticating);

        if self.credential.is_none() {
            if let Some(credential) = self.provider.approval_key().await {
                tracing::info!("Approval key issued");
                self.credential = Some(credential);
            } else {
                metrics::record_credential_failure();
                let _ = ws.close(None).await;
                self.feed.set_error(UpstreamError::Credential.to_string());
                return Err(UpstreamError::Credential);
            }
        }

        let (writer, reader) = ws.split();
        self.writer = Some(writer);
        self.reader = Some(reader);
        self.feed.set_state(ConnectionState::Connected);
        tracing::info!("Connected to KIS real-time feed");

        Ok(())
    }

    /// Send one request as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` unless connected, `Encode` if the packet does
    /// not serialize, and `Transport` if the write fails (which also drops
    /// the connection).
    pub async fn send(&mut self, packet: &SubscribePacket) -> Result<(), UpstreamError> {
        if self.state() != ConnectionState::Connected {
            return Err(UpstreamError::NotConnected);
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(UpstreamError::NotConnected);
        };

        let json = serde_json::to_string(packet)?;
        if let Err(e) = writer.send(Message::Text(json.into())).await {
            self.mark_down(&e.to_string());
            return Err(e.into());
        }

        Ok(())
    }

    /// Wait for the next text frame.
    ///
    /// Pings are answered along the way. `Ok(None)` means the server closed
    /// the connection. Either terminal result leaves it `Disconnected`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` on socket failure and `NotConnected` if there is
    /// no socket.
    pub async fn next_frame(&mut self) -> Result<Option<String>, UpstreamError> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Err(UpstreamError::NotConnected);
            };

            match reader.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.feed.increment_messages();
                    return Ok(Some(text.as_str().to_owned()));
                }
                Some(Ok(Message::Ping(data))) => {
                    let Some(writer) = self.writer.as_mut() else {
                        continue;
                    };
                    if let Err(e) = writer.send(Message::Pong(data)).await {
                        self.mark_down(&e.to_string());
                        return Err(e.into());
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Server sent close frame");
                    self.mark_down("closed by server");
                    return Ok(None);
                }
                Some(Ok(_)) => {
                    // Binary and pong frames carry nothing for us
                }
                Some(Err(e)) => {
                    self.mark_down(&e.to_string());
                    return Err(e.into());
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    self.mark_down("stream ended");
                    return Ok(None);
                }
            }
        }
    }

    /// Best-effort close, then `Disconnected`.
    pub async fn disconnect(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.send(Message::Close(None)).await;
            let _ = writer.close().await;
        }
        self.reader = None;
        self.feed.set_state(ConnectionState::Disconnected);
    }

    /// Cached approval key, if one has been issued.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.feed.state()
    }

    /// Shared feed state.
    #[must_use]
    pub fn feed(&self) -> Arc<FeedState> {
        Arc::clone(&self.feed)
    }

    fn mark_down(&mut self, reason: &str) {
        self.drop_socket();
        self.feed.set_error(reason.to_string());
    }

    fn drop_socket(&mut self) {
        self.writer = None;
        self.reader = None;
    }
}

// =============================================================================
// Tests
// =============================================================================
