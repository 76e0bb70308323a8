//! KIS Stream Proxy Binary
//!
//! Starts the market data multiplexer, the downstream gateway, the health
//! server and the ranking poll loop.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin kis-stream-proxy
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KIS_APP_KEY`: KIS app key (legacy: `g_appkey`)
//! - `KIS_APP_SECRET`: KIS app secret (legacy: `g_appsecret`)
//!
//! ## Optional
//! - `KIS_WS_URL`, `KIS_REST_URL`: upstream endpoints
//! - `STREAM_PROXY_GATEWAY_PORT`: downstream WebSocket port (default: 8000)
//! - `STREAM_PROXY_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `RANKING_POLL_ENABLED`: run the ranking poll loop (default: true)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kis_stream_proxy::application::ports::{AccessTokenProvider, ApprovalKeyProvider};
use kis_stream_proxy::infrastructure::kis::ReconnectConfig;
use kis_stream_proxy::infrastructure::telemetry;
use kis_stream_proxy::{
    FeedState, GatewayServer, GatewayState, HealthServer, HealthServerState, KisAuthClient,
    KisRestClient, Multiplexer, MultiplexerConfig, NewEntrantTracker, ProxyConfig,
    RankingPollLoop, UpstreamConnection, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting KIS Stream Proxy");

    let _metrics_handle = init_metrics().context("failed to initialize metrics")?;

    let config = ProxyConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Credentials and REST adapters
    let auth = Arc::new(
        KisAuthClient::new(
            config.upstream.rest_url.clone(),
            config.credentials.clone(),
            config.upstream.request_timeout,
        )
        .context("failed to build auth client")?,
    );

    // Multiplexer over the single upstream connection
    let connection = UpstreamConnection::new(
        config.upstream.ws_url.clone(),
        Arc::clone(&auth) as Arc<dyn ApprovalKeyProvider>,
        Arc::new(FeedState::new()),
    );
    let multiplexer = Arc::new(Multiplexer::new(
        connection,
        MultiplexerConfig {
            sink_capacity: config.delivery.sink_capacity,
            reconnect: ReconnectConfig::from_settings(&config.upstream),
        },
        shutdown_token.clone(),
    ));

    // Downstream gateway
    let gateway_state = Arc::new(GatewayState::new(
        Arc::clone(&multiplexer),
        shutdown_token.clone(),
    ));
    let gateway = GatewayServer::new(
        config.server.gateway_port,
        Arc::clone(&gateway_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = gateway.run().await {
            tracing::error!(error = %e, "Gateway error");
        }
    });

    // Health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&multiplexer),
        gateway_state,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Ranking poll loop
    let poll_handle = if config.ranking.enabled {
        let rest = KisRestClient::new(
            config.upstream.rest_url.clone(),
            config.credentials.clone(),
            Arc::clone(&auth) as Arc<dyn AccessTokenProvider>,
            config.upstream.request_timeout,
        )
        .context("failed to build REST client")?;

        let poll = RankingPollLoop::from_settings(
            Arc::new(rest),
            Arc::new(NewEntrantTracker::new(config.ranking.top_n)),
            &config.ranking,
            shutdown_token.clone(),
        );
        Some(tokio::spawn(poll.run()))
    } else {
        tracing::info!("Ranking poll loop disabled");
        None
    };

    tracing::info!("Stream proxy ready");

    await_shutdown(shutdown_token).await;

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        multiplexer.shutdown().await;
        if let Some(handle) = poll_handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Ranking poll task failed");
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Shutdown timed out"
        );
    }

    tracing::info!("Stream proxy stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &ProxyConfig) {
    tracing::info!(
        gateway_port = config.server.gateway_port,
        health_port = config.server.health_port,
        sink_capacity = config.delivery.sink_capacity,
        ranking_enabled = config.ranking.enabled,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.upstream.ws_url,
        rest_url = %config.upstream.rest_url,
        reconnect_delay_secs = config.upstream.reconnect_delay.as_secs(),
        "Upstream endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
