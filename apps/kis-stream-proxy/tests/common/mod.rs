//! Shared fixtures: an in-process KIS real-time endpoint and helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use kis_stream_proxy::application::ports::ApprovalKeyProvider;
use kis_stream_proxy::domain::auth::Credential;
use kis_stream_proxy::{
    FeedState, Multiplexer, MultiplexerConfig, ReconnectConfig, TradeTick, UpstreamConnection,
};

/// Generous bound for anything that should happen promptly.
pub const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// Approval Key
// =============================================================================

/// Approval key provider with a fixed answer.
pub struct StaticKey(pub Option<&'static str>);

#[async_trait]
impl ApprovalKeyProvider for StaticKey {
    async fn approval_key(&self) -> Option<Credential> {
        self.0.map(|key| Credential::new(key, Utc::now()))
    }
}

// =============================================================================
// Fake Upstream
// =============================================================================

enum Command {
    Send(String),
    Drop,
}

/// One accepted upstream connection.
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    requests: mpsc::UnboundedReceiver<Value>,
}

impl Session {
    /// Push a text frame to the proxy.
    pub fn send(&self, frame: &str) {
        self.commands.send(Command::Send(frame.to_string())).unwrap();
    }

    /// Drop the socket without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.commands.send(Command::Drop);
    }

    /// Next request the proxy sent.
    pub async fn next_request(&mut self) -> Value {
        timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("session closed")
    }

    /// Next `n` requests as `(tr_type, tr_id, tr_key)`.
    pub async fn requests(&mut self, n: usize) -> Vec<(String, String, String)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(summarize(&self.next_request().await));
        }
        out
    }

    /// Whether another request arrives within `window`.
    pub async fn is_quiet_for(&mut self, window: Duration) -> bool {
        matches!(timeout(window, self.requests.recv()).await, Err(_) | Ok(None))
    }
}

/// `(tr_type, tr_id, tr_key)` of a subscribe packet.
pub fn summarize(request: &Value) -> (String, String, String) {
    let field = |v: &Value| v.as_str().unwrap_or_default().to_string();
    (
        field(&request["header"]["tr_type"]),
        field(&request["body"]["input"]["tr_id"]),
        field(&request["body"]["input"]["tr_key"]),
    )
}

/// Local WebSocket server standing in for the KIS real-time endpoint.
pub struct FakeUpstream {
    /// `ws://` URL to dial.
    pub url: String,
    sessions: mpsc::UnboundedReceiver<Session>,
}

impl FakeUpstream {
    /// Bind a random port and accept connections in the background.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (session_tx, sessions) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (command_tx, command_rx) = mpsc::unbounded_channel();
                let (request_tx, requests) = mpsc::unbounded_channel();
                if session_tx
                    .send(Session {
                        commands: command_tx,
                        requests,
                    })
                    .is_err()
                {
                    return;
                }
                tokio::spawn(serve_session(ws, command_rx, request_tx));
            }
        });

        Self {
            url: format!("ws://{addr}"),
            sessions,
        }
    }

    /// Wait for the proxy's next connection.
    pub async fn next_session(&mut self) -> Session {
        timeout(WAIT, self.sessions.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("server stopped")
    }
}

async fn serve_session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    requests: mpsc::UnboundedSender<Value>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut writer, mut reader) = ws.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if writer.send(Message::Text(frame.into())).await.is_err() {
                        return;
                    }
                }
                Some(Command::Drop) | None => return,
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str(text.as_str()) {
                        let _ = requests.send(value);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Multiplexer against `url` with a short reconnect delay.
pub fn multiplexer(url: &str, key: Option<&'static str>) -> Arc<Multiplexer> {
    let connection = UpstreamConnection::new(url, Arc::new(StaticKey(key)), Arc::new(FeedState::new()));
    Arc::new(Multiplexer::new(
        connection,
        MultiplexerConfig {
            sink_capacity: 64,
            reconnect: ReconnectConfig::fixed(Duration::from_millis(50)),
        },
        CancellationToken::new(),
    ))
}

/// A trade frame with the given leading fields and zeros elsewhere.
pub fn trade_frame(symbol: &str, time: &str, price: &str) -> String {
    let mut fields = vec!["0"; TradeTick::FIELD_COUNT];
    fields[0] = symbol;
    fields[1] = time;
    fields[2] = price;
    format!("0|H0STCNT0|001|{}", fields.join("^"))
}
