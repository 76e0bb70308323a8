//! Proxy Configuration Settings
//!
//! Configuration types for the stream proxy, loaded from environment variables.

use std::time::Duration;

use chrono::{FixedOffset, NaiveTime, Offset, Utc};

/// Default real-time WebSocket endpoint.
pub const DEFAULT_WS_URL: &str = "ws://ops.koreainvestment.com:21000";

/// Default REST endpoint.
pub const DEFAULT_REST_URL: &str = "https://openapi.koreainvestment.com:9443";

/// KRX local time is UTC+9 with no daylight saving.
const MARKET_UTC_OFFSET_SECS: i32 = 9 * 3600;

/// KIS application credentials.
#[derive(Clone)]
pub struct AppCredentials {
    app_key: String,
    app_secret: String,
}

impl AppCredentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(app_key: String, app_secret: String) -> Self {
        Self {
            app_key,
            app_secret,
        }
    }

    /// Get the app key.
    #[must_use]
    pub fn app_key(&self) -> &str {
        &self.app_key
    }

    /// Get the app secret.
    #[must_use]
    pub fn app_secret(&self) -> &str {
        &self.app_secret
    }
}

impl std::fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppCredentials")
            .field("app_key", &"[REDACTED]")
            .field("app_secret", &"[REDACTED]")
            .finish()
    }
}

/// Upstream endpoint and reconnect settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Real-time WebSocket URL.
    pub ws_url: String,
    /// REST base URL.
    pub rest_url: String,
    /// Timeout for REST calls.
    pub request_timeout: Duration,
    /// Delay before reconnecting.
    pub reconnect_delay: Duration,
    /// Maximum reconnect delay.
    pub reconnect_delay_max: Duration,
    /// Reconnect delay multiplier (`1.0` = fixed delay).
    pub reconnect_delay_multiplier: f64,
    /// Reconnect jitter as a fraction of the delay (`0.0` = none).
    pub reconnect_jitter: f64,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_delay_multiplier: 1.0,
            reconnect_jitter: 0.0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket gateway port.
    pub gateway_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            gateway_port: 8000,
            health_port: 8082,
        }
    }
}

/// Downstream delivery settings.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Per-subscriber queue capacity; events beyond it are dropped.
    pub sink_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self { sink_capacity: 256 }
    }
}

/// Ranking poll loop settings.
#[derive(Debug, Clone)]
pub struct RankingSettings {
    /// Whether the poll loop runs at all.
    pub enabled: bool,
    /// Target time between cycle starts.
    pub cadence: Duration,
    /// Minimum sleep after a cycle.
    pub min_interval: Duration,
    /// Sleep after a failed cycle.
    pub error_backoff: Duration,
    /// Sleep between checks outside market hours.
    pub off_hours_sleep: Duration,
    /// Market open, local time.
    pub market_open: NaiveTime,
    /// Market close, local time.
    pub market_close: NaiveTime,
    /// Market UTC offset.
    pub market_offset: FixedOffset,
    /// Ranking depth compared between cycles.
    pub top_n: usize,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence: Duration::from_secs(60),
            min_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(10),
            off_hours_sleep: Duration::from_secs(300),
            market_open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap_or(NaiveTime::MIN),
            market_offset: FixedOffset::east_opt(MARKET_UTC_OFFSET_SECS)
                .unwrap_or_else(|| Utc.fix()),
            top_n: 30,
        }
    }
}

/// Complete proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// KIS application credentials.
    pub credentials: AppCredentials,
    /// Upstream endpoints and reconnect settings.
    pub upstream: UpstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Downstream delivery settings.
    pub delivery: DeliverySettings,
    /// Ranking poll settings.
    pub ranking: RankingSettings,
}

impl ProxyConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the app key or secret is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let app_key = env.required(&["KIS_APP_KEY", "g_appkey"])?;
        let app_secret = env.required(&["KIS_APP_SECRET", "g_appsecret", "g_appsceret"])?;

        let upstream_defaults = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            ws_url: env.string("KIS_WS_URL", upstream_defaults.ws_url),
            rest_url: env.string("KIS_REST_URL", upstream_defaults.rest_url),
            request_timeout: env.duration_secs(
                "KIS_REQUEST_TIMEOUT_SECS",
                upstream_defaults.request_timeout,
            ),
            reconnect_delay: env.duration_secs(
                "STREAM_PROXY_RECONNECT_DELAY_SECS",
                upstream_defaults.reconnect_delay,
            ),
            reconnect_delay_max: env.duration_secs(
                "STREAM_PROXY_RECONNECT_DELAY_MAX_SECS",
                upstream_defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "STREAM_PROXY_RECONNECT_DELAY_MULTIPLIER",
                upstream_defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter: env.parse(
                "STREAM_PROXY_RECONNECT_JITTER",
                upstream_defaults.reconnect_jitter,
            ),
        };

        let server = ServerSettings {
            gateway_port: env.parse(
                "STREAM_PROXY_GATEWAY_PORT",
                ServerSettings::default().gateway_port,
            ),
            health_port: env.parse(
                "STREAM_PROXY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let delivery = DeliverySettings {
            sink_capacity: env
                .parse(
                    "STREAM_PROXY_SINK_CAPACITY",
                    DeliverySettings::default().sink_capacity,
                )
                .max(1),
        };

        let ranking_defaults = RankingSettings::default();
        let ranking = RankingSettings {
            enabled: env.flag("RANKING_POLL_ENABLED", ranking_defaults.enabled),
            cadence: env.duration_secs("RANKING_POLL_CADENCE_SECS", ranking_defaults.cadence),
            min_interval: env.duration_secs(
                "RANKING_POLL_MIN_INTERVAL_SECS",
                ranking_defaults.min_interval,
            ),
            error_backoff: env.duration_secs(
                "RANKING_POLL_ERROR_BACKOFF_SECS",
                ranking_defaults.error_backoff,
            ),
            off_hours_sleep: env.duration_secs(
                "RANKING_POLL_OFF_HOURS_SECS",
                ranking_defaults.off_hours_sleep,
            ),
            market_open: env.time("RANKING_MARKET_OPEN", ranking_defaults.market_open),
            market_close: env.time("RANKING_MARKET_CLOSE", ranking_defaults.market_close),
            market_offset: ranking_defaults.market_offset,
            top_n: env.parse("RANKING_TOP_N", ranking_defaults.top_n),
        };

        Ok(Self {
            credentials: AppCredentials::new(app_key, app_secret),
            upstream,
            server,
            delivery,
            ranking,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// First key that is set wins; the first key names the error.
    fn required(&self, keys: &[&str]) -> Result<String, ConfigError> {
        let primary = keys.first().copied().unwrap_or_default();
        let Some((key, value)) = keys.iter().find_map(|k| (self.0)(k).map(|v| (*k, v))) else {
            return Err(ConfigError::MissingEnvVar(primary.to_string()));
        };
        if value.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn string(&self, key: &str, default: String) -> String {
        (self.0)(key).filter(|v| !v.trim().is_empty()).unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        (self.0)(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        (self.0)(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match (self.0)(key).map(|v| v.trim().to_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => true,
            Some("0" | "false" | "no" | "off") => false,
            _ => default,
        }
    }

    fn time(&self, key: &str, default: NaiveTime) -> NaiveTime {
        (self.0)(key)
            .and_then(|v| NaiveTime::parse_from_str(v.trim(), "%H:%M").ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_with_only_credentials() {
        let config =
            ProxyConfig::from_lookup(lookup(&[("KIS_APP_KEY", "k"), ("KIS_APP_SECRET", "s")]))
                .unwrap();

        assert_eq!(config.credentials.app_key(), "k");
        assert_eq!(config.upstream.ws_url, DEFAULT_WS_URL);
        assert_eq!(config.upstream.rest_url, DEFAULT_REST_URL);
        assert_eq!(config.upstream.request_timeout, Duration::from_secs(10));
        assert_eq!(config.upstream.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.server.gateway_port, 8000);
        assert_eq!(config.server.health_port, 8082);
        assert_eq!(config.delivery.sink_capacity, 256);
        assert!(config.ranking.enabled);
        assert_eq!(config.ranking.cadence, Duration::from_secs(60));
        assert_eq!(config.ranking.market_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(config.ranking.top_n, 30);
    }

    #[test]
    fn legacy_credential_names() {
        let config =
            ProxyConfig::from_lookup(lookup(&[("g_appkey", "k"), ("g_appsceret", "s")])).unwrap();

        assert_eq!(config.credentials.app_key(), "k");
        assert_eq!(config.credentials.app_secret(), "s");
    }

    #[test]
    fn missing_secret_is_error() {
        let err = ProxyConfig::from_lookup(lookup(&[("KIS_APP_KEY", "k")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "KIS_APP_SECRET"));
    }

    #[test]
    fn empty_key_is_error() {
        let err = ProxyConfig::from_lookup(lookup(&[("KIS_APP_KEY", " "), ("KIS_APP_SECRET", "s")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(ref k) if k == "KIS_APP_KEY"));
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("KIS_APP_KEY", "k"),
            ("KIS_APP_SECRET", "s"),
            ("KIS_WS_URL", "ws://127.0.0.1:9999"),
            ("STREAM_PROXY_GATEWAY_PORT", "not-a-port"),
            ("STREAM_PROXY_SINK_CAPACITY", "0"),
            ("RANKING_POLL_ENABLED", "false"),
            ("RANKING_MARKET_CLOSE", "15:20"),
            ("RANKING_MARKET_OPEN", "9am"),
        ]))
        .unwrap();

        assert_eq!(config.upstream.ws_url, "ws://127.0.0.1:9999");
        assert_eq!(config.server.gateway_port, 8000);
        assert_eq!(config.delivery.sink_capacity, 1);
        assert!(!config.ranking.enabled);
        assert_eq!(config.ranking.market_close, NaiveTime::from_hms_opt(15, 20, 0).unwrap());
        assert_eq!(config.ranking.market_open, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn credentials_redacted_debug() {
        let creds = AppCredentials::new("key123".to_string(), "secret456".to_string());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("key123"));
        assert!(!debug.contains("secret456"));
        assert!(debug.contains("[REDACTED]"));
    }
}
