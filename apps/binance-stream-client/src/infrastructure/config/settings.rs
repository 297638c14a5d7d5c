//! Client Configuration Settings
//!
//! Configuration types for the stream client, loaded from environment
//! variables. Optional values fall back to defaults when unset or
//! unparsable; only an invalid endpoint is fatal at startup.

use std::time::Duration;

use crate::application::ports::BackpressurePolicy;
use crate::infrastructure::binance::heartbeat::LivenessConfig;
use crate::infrastructure::binance::reconnect::BackoffConfig;
use crate::infrastructure::dispatch::DispatchConfig;

/// Default stream endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://stream.binance.com:9443/ws";

/// Connection and reconnection settings.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Timeout for establishing the transport (including the WebSocket
    /// upgrade).
    pub connect_timeout: Duration,
    /// Maximum time without any inbound frame before the connection is
    /// declared stale.
    pub idle_timeout: Duration,
    /// Interval between outbound pings.
    pub ping_interval: Duration,
    /// Initial reconnection delay.
    pub backoff_min: Duration,
    /// Maximum reconnection delay.
    pub backoff_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Live time after which the backoff schedule resets to the minimum.
    pub backoff_reset_threshold: Duration,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(20),
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            backoff_reset_threshold: Duration::from_secs(60),
            max_reconnect_attempts: 0, // Unlimited
        }
    }
}

impl ConnectionSettings {
    /// Build the backoff configuration from these settings.
    #[must_use]
    pub const fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            min_delay: self.backoff_min,
            max_delay: self.backoff_max,
            multiplier: self.backoff_multiplier,
            jitter_factor: 0.1, // Default jitter
            reset_threshold: self.backoff_reset_threshold,
            max_attempts: self.max_reconnect_attempts,
        }
    }

    /// Build the liveness configuration from these settings.
    #[must_use]
    pub const fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig::new(self.ping_interval, self.idle_timeout)
    }
}

/// Delivery settings for the dispatcher and pipeline.
#[derive(Debug, Clone, Copy)]
pub struct DeliverySettings {
    /// Per-consumer delivery queue capacity.
    pub queue_capacity: usize,
    /// Default backpressure policy for the CLI consumer.
    pub backpressure: BackpressurePolicy,
    /// Capacity of the supervisor-to-pipeline frame channel.
    pub feed_capacity: usize,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::DropOldest,
            feed_capacity: 4096,
        }
    }
}

impl DeliverySettings {
    /// Build the dispatcher configuration from these settings.
    #[must_use]
    pub const fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            queue_capacity: self.queue_capacity,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint URI.
    pub endpoint: String,
    /// Connection and reconnection settings.
    pub connection: ConnectionSettings,
    /// Delivery settings.
    pub delivery: DeliverySettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connection: ConnectionSettings::default(),
            delivery: DeliverySettings::default(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given endpoint with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] when the endpoint is
    /// not a plausible `ws://`/`wss://` URI.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ConfigError> {
        let config = Self {
            endpoint: endpoint.into(),
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured endpoint is invalid; all
    /// other values fall back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint =
            std::env::var("KLINE_STREAM_ENDPOINT").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let defaults = ConnectionSettings::default();
        let connection = ConnectionSettings {
            connect_timeout: parse_env_duration_millis(
                "KLINE_STREAM_CONNECT_TIMEOUT_MS",
                defaults.connect_timeout,
            ),
            idle_timeout: parse_env_duration_secs(
                "KLINE_STREAM_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout,
            ),
            ping_interval: parse_env_duration_secs(
                "KLINE_STREAM_PING_INTERVAL_SECS",
                defaults.ping_interval,
            ),
            backoff_min: parse_env_duration_millis("KLINE_STREAM_BACKOFF_MIN_MS", defaults.backoff_min),
            backoff_max: parse_env_duration_secs("KLINE_STREAM_BACKOFF_MAX_SECS", defaults.backoff_max),
            backoff_multiplier: parse_env_f64(
                "KLINE_STREAM_BACKOFF_MULTIPLIER",
                defaults.backoff_multiplier,
            ),
            backoff_reset_threshold: parse_env_duration_secs(
                "KLINE_STREAM_BACKOFF_RESET_SECS",
                defaults.backoff_reset_threshold,
            ),
            max_reconnect_attempts: parse_env_u32(
                "KLINE_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        let delivery_defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            queue_capacity: parse_env_usize(
                "KLINE_STREAM_QUEUE_CAPACITY",
                delivery_defaults.queue_capacity,
            ),
            backpressure: std::env::var("KLINE_STREAM_BACKPRESSURE")
                .ok()
                .and_then(|v| parse_backpressure(&v))
                .unwrap_or(delivery_defaults.backpressure),
            feed_capacity: parse_env_usize(
                "KLINE_STREAM_FEED_CAPACITY",
                delivery_defaults.feed_capacity,
            ),
        };

        let config = Self {
            endpoint,
            connection,
            delivery,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that the endpoint is a plausible WebSocket URI.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEndpoint`] otherwise.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let rest = self
            .endpoint
            .strip_prefix("wss://")
            .or_else(|| self.endpoint.strip_prefix("ws://"))
            .ok_or_else(|| ConfigError::InvalidEndpoint(self.endpoint.clone()))?;

        let host = rest.split('/').next().unwrap_or_default();
        if host.is_empty() {
            return Err(ConfigError::InvalidEndpoint(self.endpoint.clone()));
        }

        Ok(())
    }
}

/// Parse a backpressure policy string: `drop_oldest`, `drop_newest`,
/// or `block:<millis>`.
#[must_use]
pub fn parse_backpressure(value: &str) -> Option<BackpressurePolicy> {
    match value.to_lowercase().as_str() {
        "drop_oldest" => Some(BackpressurePolicy::DropOldest),
        "drop_newest" => Some(BackpressurePolicy::DropNewest),
        other => {
            let millis: u64 = other.strip_prefix("block:")?.parse().ok()?;
            Some(BackpressurePolicy::Block {
                timeout: Duration::from_millis(millis),
            })
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The endpoint is not a valid WebSocket URI.
    #[error("invalid stream endpoint: {0}")]
    InvalidEndpoint(String),
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn connection_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.connect_timeout, Duration::from_secs(10));
        assert_eq!(settings.idle_timeout, Duration::from_secs(60));
        assert_eq!(settings.ping_interval, Duration::from_secs(20));
        assert_eq!(settings.backoff_min, Duration::from_millis(500));
        assert_eq!(settings.backoff_max, Duration::from_secs(30));
        assert!((settings.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.max_reconnect_attempts, 0);
    }

    #[test]
    fn delivery_defaults() {
        let settings = DeliverySettings::default();
        assert_eq!(settings.queue_capacity, 1024);
        assert_eq!(settings.backpressure, BackpressurePolicy::DropOldest);
    }

    #[test]
    fn backoff_config_from_settings() {
        let settings = ConnectionSettings::default();
        let backoff = settings.backoff_config();
        assert_eq!(backoff.min_delay, settings.backoff_min);
        assert_eq!(backoff.max_delay, settings.backoff_max);
        assert_eq!(backoff.reset_threshold, settings.backoff_reset_threshold);
    }

    #[test]
    fn liveness_config_from_settings() {
        let settings = ConnectionSettings::default();
        let liveness = settings.liveness_config();
        assert_eq!(liveness.ping_interval, settings.ping_interval);
        assert_eq!(liveness.idle_timeout, settings.idle_timeout);
    }

    #[test_case("wss://stream.binance.com:9443/ws" ; "default endpoint")]
    #[test_case("ws://127.0.0.1:8080/ws" ; "plain ws with port")]
    #[test_case("wss://example.com/stream" ; "path only")]
    fn valid_endpoints(endpoint: &str) {
        assert!(ClientConfig::new(endpoint).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("http://example.com" ; "wrong scheme")]
    #[test_case("wss://" ; "missing host")]
    #[test_case("stream.binance.com" ; "no scheme")]
    fn invalid_endpoints(endpoint: &str) {
        assert!(matches!(
            ClientConfig::new(endpoint),
            Err(ConfigError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn backpressure_parsing() {
        assert_eq!(
            parse_backpressure("drop_oldest"),
            Some(BackpressurePolicy::DropOldest)
        );
        assert_eq!(
            parse_backpressure("DROP_NEWEST"),
            Some(BackpressurePolicy::DropNewest)
        );
        assert_eq!(
            parse_backpressure("block:250"),
            Some(BackpressurePolicy::Block {
                timeout: Duration::from_millis(250)
            })
        );
        assert_eq!(parse_backpressure("block:abc"), None);
        assert_eq!(parse_backpressure("unknown"), None);
    }
}
