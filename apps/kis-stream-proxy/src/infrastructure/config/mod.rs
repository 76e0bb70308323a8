//! Configuration Module
//!
//! Configuration loading for the proxy service.

mod settings;

pub use settings::{
    AppCredentials, ConfigError, DEFAULT_REST_URL, DEFAULT_WS_URL, DeliverySettings, ProxyConfig,
    RankingSettings, ServerSettings, UpstreamSettings,
};
