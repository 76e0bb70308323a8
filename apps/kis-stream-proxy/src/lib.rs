#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! KIS Stream Proxy - Market Data Multiplexer
//!
//! Holds one connection to the Korea Investment & Securities real-time
//! WebSocket feed and fans quote and trade records out to any number of
//! downstream consumers. A second task polls the fluctuation ranking during
//! market hours.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types with no I/O
//!   - `streaming`: symbols, instrument kinds, decoded records
//!   - `subscription`: symbol → sink registry
//!   - `auth`, `ranking`: credentials and ranking rows
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: credential, ranking and change-detector interfaces
//!   - `services`: the multiplexer, ranking poll loop, new-entrant tracker
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `kis`: wire codec, upstream connection, reconnect policy, REST clients
//!   - `broadcast`: bounded channel sinks
//!   - `gateway`: downstream WebSocket route
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                      ┌─────────────┐      ┌──────────┐
//! KIS real-time WS ───►│ Multiplexer │─────►│  Sinks   │──► Client 1
//!                      │  run loop   │      │ (mpsc)   │──► Client 2
//!                      └─────────────┘      └──────────┘──► Client N
//!                             ▲
//!            subscribe ───────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no external dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{
    DecodedRecord, FeedEvent, InstrumentKind, QuoteSnapshot, StreamKind, Symbol, TradeTick,
};
pub use domain::subscription::{
    Delivery, RecordSink, SinkId, SubscriptionRegistry, SubscriptionStats,
};

// Ports
pub use application::ports::{
    AccessTokenProvider, ApprovalKeyProvider, ChangeDetector, RankingError, RankingSource,
};

// Services
pub use application::services::{
    DispatchSummary, Multiplexer, MultiplexerConfig, NewEntrantTracker, RankingPollLoop,
    Subscription,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, ProxyConfig};

// Upstream adapters
pub use infrastructure::kis::{
    ConnectionState, FeedState, KisAuthClient, KisRestClient, ReconnectConfig,
    UpstreamConnection, UpstreamError,
};

// Downstream
pub use infrastructure::broadcast::ChannelSink;
pub use infrastructure::gateway::{GatewayError, GatewayServer, GatewayState};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
