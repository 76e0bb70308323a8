//! Gateway Streaming Integration Tests
//!
//! A tokio-tungstenite client on `/ws/stock/{code}` against the gateway,
//! the multiplexer and an in-process upstream.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use common::{FakeUpstream, WAIT, multiplexer, trade_frame};
use kis_stream_proxy::{GatewayServer, GatewayState, Multiplexer};

type Client = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Serve the gateway on a random port.
async fn start_gateway(mux: &Arc<Multiplexer>) -> (String, Arc<GatewayState>, CancellationToken) {
    let cancel = CancellationToken::new();
    let state = Arc::new(GatewayState::new(Arc::clone(mux), cancel.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GatewayServer::new(addr.port(), Arc::clone(&state), cancel.clone());
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    (format!("ws://{addr}"), state, cancel)
}

async fn connect(url: &str) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn wait_for_clients(state: &GatewayState, expected: usize) {
    timeout(WAIT, async {
        while state.client_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client count never settled");
}

#[tokio::test]
async fn client_receives_trade_json() {
    let mut upstream = FakeUpstream::start().await;
    let mux = multiplexer(&upstream.url, Some("approval"));
    let (base, state, cancel) = start_gateway(&mux).await;

    let mut client = connect(&format!("{base}/ws/stock/005930")).await;
    let mut session = upstream.next_session().await;
    session.requests(2).await;
    wait_for_clients(&state, 1).await;

    session.send(&trade_frame("005930", "090000", "70000"));

    let json = next_json(&mut client).await;
    assert_eq!(json["MKSC_SHRN_ISCD"], "005930");
    assert_eq!(json["STCK_CNTG_HOUR"], "090000");
    assert_eq!(json["STCK_PRPR"], 70000.0);

    cancel.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn trailing_slash_route_is_served() {
    let mut upstream = FakeUpstream::start().await;
    let mux = multiplexer(&upstream.url, Some("approval"));
    let (base, _state, cancel) = start_gateway(&mux).await;

    let _client = connect(&format!("{base}/ws/stock/000660/")).await;
    let mut session = upstream.next_session().await;

    let requests = session.requests(2).await;
    assert!(requests.iter().all(|(_, _, symbol)| symbol == "000660"));

    cancel.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn approval_failure_is_error_frame() {
    let upstream = FakeUpstream::start().await;
    let mux = multiplexer(&upstream.url, None);
    let (base, _state, cancel) = start_gateway(&mux).await;

    let mut client = connect(&format!("{base}/ws/stock/005930")).await;

    let json = next_json(&mut client).await;
    assert_eq!(json, serde_json::json!({"error": "Failed to issue approval key"}));

    cancel.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn closing_client_releases_sink() {
    let mut upstream = FakeUpstream::start().await;
    let mux = multiplexer(&upstream.url, Some("approval"));
    let (base, state, cancel) = start_gateway(&mux).await;

    let mut client = connect(&format!("{base}/ws/stock/005930")).await;
    let mut session = upstream.next_session().await;
    session.requests(2).await;
    wait_for_clients(&state, 1).await;
    assert_eq!(mux.registry().live_sink_count("005930"), 1);

    client.close(None).await.unwrap();
    wait_for_clients(&state, 0).await;

    assert_eq!(mux.registry().live_sink_count("005930"), 0);
    // Upstream stays subscribed for the next viewer
    assert!(mux.registry().contains("005930"));
    assert!(session.is_quiet_for(Duration::from_millis(100)).await);

    cancel.cancel();
    mux.shutdown().await;
}
