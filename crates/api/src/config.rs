//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use breaker::{BreakerConfig, ConfigError};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3002`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `PAYMENT_SERVICE_URL`: base URL of the payment service (default: this server)
/// - `PROJECT_SERVICE_URL`: base URL of the project service (default: unset,
///   payment sagas use this server's project store directly)
/// - `BREAKER_FAILURE_THRESHOLD`: failures before a breaker opens (default: `3`)
/// - `BREAKER_RESET_TIMEOUT_MS`: open period before a probe (default: `30000`)
/// - `BREAKER_CALL_TIMEOUT_MS`: per-call timeout, `0` disables (default: `3000`)
/// - `SAGA_DEADLINE_MS`: bound on a saga's forward path, `0` disables (default: `10000`)
/// - `SAGA_RETENTION_SECS`: how long finished sagas stay inspectable (default: `3600`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub payment_service_url: String,
    pub project_service_url: Option<String>,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout_ms: u64,
    pub breaker_call_timeout_ms: u64,
    pub saga_deadline_ms: u64,
    pub saga_retention_secs: u64,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    parse_or(key, std::env::var(key).ok(), default)
}

/// Parses `raw`, warning and keeping `default` when it is malformed.
fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, "malformed environment value, using default");
            default
        }
    }
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let port = env_or("PORT", defaults.port);
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port,
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            payment_service_url: std::env::var("PAYMENT_SERVICE_URL")
                .unwrap_or_else(|_| format!("http://127.0.0.1:{port}")),
            project_service_url: std::env::var("PROJECT_SERVICE_URL")
                .ok()
                .filter(|url| !url.is_empty()),
            breaker_failure_threshold: env_or(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_reset_timeout_ms: env_or(
                "BREAKER_RESET_TIMEOUT_MS",
                defaults.breaker_reset_timeout_ms,
            ),
            breaker_call_timeout_ms: env_or(
                "BREAKER_CALL_TIMEOUT_MS",
                defaults.breaker_call_timeout_ms,
            ),
            saga_deadline_ms: env_or("SAGA_DEADLINE_MS", defaults.saga_deadline_ms),
            saga_retention_secs: env_or("SAGA_RETENTION_SECS", defaults.saga_retention_secs),
        }
    }

    /// Filter directive and format for the log subscriber.
    ///
    /// Read before the subscriber exists; a malformed `LOG_FORMAT` is reported
    /// by [`Config::from_env`] once logging is up.
    pub fn logging_from_env() -> (String, LogFormat) {
        let defaults = Self::default();
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(defaults.log_format);
        (
            std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            format,
        )
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Breaker configuration shared by every dependency.
    pub fn breaker_config(&self) -> Result<BreakerConfig, ConfigError> {
        BreakerConfig::from_millis(
            self.breaker_failure_threshold,
            self.breaker_reset_timeout_ms,
            self.breaker_call_timeout_ms,
        )
    }

    /// Zero means the saga runs without a deadline.
    pub fn saga_deadline(&self) -> Duration {
        Duration::from_millis(self.saga_deadline_ms)
    }

    pub fn saga_retention(&self) -> Duration {
        Duration::from_secs(self.saga_retention_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3002,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            payment_service_url: "http://127.0.0.1:3002".to_string(),
            project_service_url: None,
            breaker_failure_threshold: 3,
            breaker_reset_timeout_ms: 30_000,
            breaker_call_timeout_ms: 3_000,
            saga_deadline_ms: 10_000,
            saga_retention_secs: 3_600,
        }
    }
}
