//! Session Controller configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP API bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default number of concurrent video sessions.
pub const DEFAULT_MAX_CONCURRENT_CAPACITY: usize = 15;

/// Default client heartbeat cadence in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 20;

/// Default stale threshold in seconds (3x heartbeat interval).
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 60;

/// Default presence sweep interval in seconds.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 30;

/// Default queue promotion polling interval in seconds.
pub const DEFAULT_QUEUE_POLL_INTERVAL_SECONDS: u64 = 3;

/// Default cap on time spent waiting in the queue (1 hour).
pub const DEFAULT_MAX_QUEUE_WAIT_SECONDS: u64 = 3600;

/// Default average session length used for wait estimates.
pub const DEFAULT_AVERAGE_SESSION_MINUTES: u64 = 15;

/// Default price of one minute of credit in dollars.
pub const DEFAULT_PRICE_PER_MINUTE: f64 = 1.50;

/// Default number of provisioning attempts for retryable provider errors.
pub const DEFAULT_PROVIDER_MAX_ATTEMPTS: u32 = 3;

/// Default running-balance check interval in milliseconds.
pub const DEFAULT_BILLING_TICK_MILLIS: u64 = 1000;

/// Session Controller configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// HTTP API bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent video sessions (`MAX_CONCURRENT_CAPACITY`, >= 1).
    pub max_concurrent_capacity: usize,

    /// Expected client heartbeat cadence.
    pub heartbeat_interval: Duration,

    /// Entries silent for longer than this are evicted.
    pub heartbeat_timeout: Duration,

    /// How often the presence sweep runs.
    pub sweep_interval: Duration,

    /// How often a queued session polls for promotion.
    pub queue_poll_interval: Duration,

    /// Maximum time a session may wait in the queue.
    pub max_queue_wait: Duration,

    /// Average session length used for advisory wait estimates.
    pub average_session_minutes: u64,

    /// Price of one minute of credit in dollars.
    pub price_per_minute: f64,

    /// Running balance check interval for connected sessions.
    pub billing_tick: Duration,

    /// Video provider base URL.
    pub provider_url: String,

    /// Video provider API key.
    /// Protected by `SecretString` to prevent accidental logging.
    pub provider_api_key: SecretString,

    /// Attempts for retryable provisioning failures.
    pub provider_max_attempts: u32,

    /// Redis URL for the ledger. `None` selects the in-memory store.
    /// Protected by `SecretString` since it may embed credentials.
    pub redis_url: Option<SecretString>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("max_concurrent_capacity", &self.max_concurrent_capacity)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("sweep_interval", &self.sweep_interval)
            .field("queue_poll_interval", &self.queue_poll_interval)
            .field("max_queue_wait", &self.max_queue_wait)
            .field("average_session_minutes", &self.average_session_minutes)
            .field("price_per_minute", &self.price_per_minute)
            .field("billing_tick", &self.billing_tick)
            .field("provider_url", &self.provider_url)
            .field("provider_api_key", &"[REDACTED]")
            .field("provider_max_attempts", &self.provider_max_attempts)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let provider_url = vars
            .get("SC_PROVIDER_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("SC_PROVIDER_URL".to_string()))?
            .clone();

        let provider_api_key = SecretString::from(
            vars.get("SC_PROVIDER_API_KEY")
                .ok_or_else(|| ConfigError::MissingEnvVar("SC_PROVIDER_API_KEY".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("SC_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let max_concurrent_capacity: usize = parse_or(
            vars,
            "SC_MAX_CONCURRENT_CAPACITY",
            DEFAULT_MAX_CONCURRENT_CAPACITY,
        )?;
        if max_concurrent_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_MAX_CONCURRENT_CAPACITY must be at least 1".to_string(),
            ));
        }

        let heartbeat_interval_seconds: u64 = parse_or(
            vars,
            "SC_HEARTBEAT_INTERVAL_SECONDS",
            DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        )?;
        let heartbeat_timeout_seconds: u64 = parse_or(
            vars,
            "SC_HEARTBEAT_TIMEOUT_SECONDS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS,
        )?;
        if heartbeat_interval_seconds == 0 || heartbeat_timeout_seconds <= heartbeat_interval_seconds
        {
            return Err(ConfigError::InvalidValue(
                "SC_HEARTBEAT_TIMEOUT_SECONDS must exceed a non-zero SC_HEARTBEAT_INTERVAL_SECONDS"
                    .to_string(),
            ));
        }

        let sweep_interval_seconds: u64 = parse_or(
            vars,
            "SC_SWEEP_INTERVAL_SECONDS",
            DEFAULT_SWEEP_INTERVAL_SECONDS,
        )?;
        let queue_poll_interval_seconds: u64 = parse_or(
            vars,
            "SC_QUEUE_POLL_INTERVAL_SECONDS",
            DEFAULT_QUEUE_POLL_INTERVAL_SECONDS,
        )?;
        if sweep_interval_seconds == 0 || queue_poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "sweep and queue poll intervals must be non-zero".to_string(),
            ));
        }

        let max_queue_wait_seconds: u64 = parse_or(
            vars,
            "SC_MAX_QUEUE_WAIT_SECONDS",
            DEFAULT_MAX_QUEUE_WAIT_SECONDS,
        )?;

        let average_session_minutes: u64 = parse_or(
            vars,
            "SC_AVERAGE_SESSION_MINUTES",
            DEFAULT_AVERAGE_SESSION_MINUTES,
        )?;

        let price_per_minute: f64 =
            parse_or(vars, "SC_PRICE_PER_MINUTE", DEFAULT_PRICE_PER_MINUTE)?;
        if !price_per_minute.is_finite() || price_per_minute < 0.0 {
            return Err(ConfigError::InvalidValue(
                "SC_PRICE_PER_MINUTE must be a non-negative decimal".to_string(),
            ));
        }

        let provider_max_attempts: u32 = parse_or(
            vars,
            "SC_PROVIDER_MAX_ATTEMPTS",
            DEFAULT_PROVIDER_MAX_ATTEMPTS,
        )?;
        if provider_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_PROVIDER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let billing_tick_millis: u64 =
            parse_or(vars, "SC_BILLING_TICK_MILLIS", DEFAULT_BILLING_TICK_MILLIS)?;
        if billing_tick_millis == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_BILLING_TICK_MILLIS must be non-zero".to_string(),
            ));
        }

        let redis_url = vars
            .get("SC_REDIS_URL")
            .filter(|url| !url.is_empty())
            .map(|url| SecretString::from(url.clone()));

        Ok(Config {
            bind_address,
            max_concurrent_capacity,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_seconds),
            heartbeat_timeout: Duration::from_secs(heartbeat_timeout_seconds),
            sweep_interval: Duration::from_secs(sweep_interval_seconds),
            queue_poll_interval: Duration::from_secs(queue_poll_interval_seconds),
            max_queue_wait: Duration::from_secs(max_queue_wait_seconds),
            average_session_minutes,
            price_per_minute,
            billing_tick: Duration::from_millis(billing_tick_millis),
            provider_url,
            provider_api_key,
            provider_max_attempts,
            redis_url,
        })
    }
}

/// Parse an optional variable, falling back to `default` when absent.
///
/// Present-but-unparseable values are rejected rather than silently
/// replaced, so a typo in capacity never runs with the default.
fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} has an invalid value"))),
        None => Ok(default),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            (
                "SC_PROVIDER_URL".to_string(),
                "https://video.example.com".to_string(),
            ),
            (
                "SC_PROVIDER_API_KEY".to_string(),
                "pk_test_0123456789".to_string(),
            ),
        ])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(
            config.max_concurrent_capacity,
            DEFAULT_MAX_CONCURRENT_CAPACITY
        );
        assert_eq!(
            config.heartbeat_interval,
            Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECONDS)
        );
        assert_eq!(
            config.heartbeat_timeout,
            Duration::from_secs(DEFAULT_HEARTBEAT_TIMEOUT_SECONDS)
        );
        assert_eq!(config.queue_poll_interval, Duration::from_secs(3));
        assert_eq!(config.average_session_minutes, 15);
        assert!((config.price_per_minute - DEFAULT_PRICE_PER_MINUTE).abs() < f64::EPSILON);
        assert_eq!(config.provider_max_attempts, 3);
        assert_eq!(config.provider_api_key.expose_secret(), "pk_test_0123456789");
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("SC_BIND_ADDRESS".to_string(), "127.0.0.1:9090".to_string());
        vars.insert("SC_MAX_CONCURRENT_CAPACITY".to_string(), "2".to_string());
        vars.insert("SC_HEARTBEAT_INTERVAL_SECONDS".to_string(), "10".to_string());
        vars.insert("SC_HEARTBEAT_TIMEOUT_SECONDS".to_string(), "25".to_string());
        vars.insert("SC_PRICE_PER_MINUTE".to_string(), "2.25".to_string());
        vars.insert(
            "SC_REDIS_URL".to_string(),
            "redis://:pw@localhost:6379".to_string(),
        );

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:9090");
        assert_eq!(config.max_concurrent_capacity, 2);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(25));
        assert!((config.price_per_minute - 2.25).abs() < f64::EPSILON);
        assert_eq!(
            config.redis_url.as_ref().map(|u| u.expose_secret().to_string()),
            Some("redis://:pw@localhost:6379".to_string())
        );
    }

    #[test]
    fn test_from_vars_missing_provider_url() {
        let mut vars = base_vars();
        vars.remove("SC_PROVIDER_URL");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "SC_PROVIDER_URL"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_MAX_CONCURRENT_CAPACITY".to_string(), "0".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_unparseable_capacity_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_MAX_CONCURRENT_CAPACITY".to_string(), "fifteen".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_timeout_must_exceed_interval() {
        let mut vars = base_vars();
        vars.insert("SC_HEARTBEAT_INTERVAL_SECONDS".to_string(), "30".to_string());
        vars.insert("SC_HEARTBEAT_TIMEOUT_SECONDS".to_string(), "30".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut vars = base_vars();
        vars.insert("SC_PRICE_PER_MINUTE".to_string(), "-1".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let mut vars = base_vars();
        vars.insert(
            "SC_REDIS_URL".to_string(),
            "redis://:hunter2@localhost:6379".to_string(),
        );
        let config = Config::from_vars(&vars).expect("Config should load successfully");

        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("pk_test_0123456789"));
        assert!(!debug_output.contains("hunter2"));
    }
}
