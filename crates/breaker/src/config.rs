//! Breaker tuning knobs.

use std::time::Duration;

use thiserror::Error;

/// Rejected breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failure_threshold must be at least 1")]
    ZeroThreshold,
}

/// Configuration for a single [`CircuitBreaker`](crate::CircuitBreaker).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    failure_threshold: u32,
    reset_timeout: Duration,
    call_timeout: Duration,
}

impl BreakerConfig {
    /// Creates a configuration.
    ///
    /// A zero `call_timeout` disables the per-call timer; a zero
    /// `reset_timeout` makes an open breaker probe on the very next call.
    pub fn new(
        failure_threshold: u32,
        reset_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::ZeroThreshold);
        }
        Ok(Self {
            failure_threshold,
            reset_timeout,
            call_timeout,
        })
    }

    /// Same as [`BreakerConfig::new`] with millisecond durations.
    pub fn from_millis(
        failure_threshold: u32,
        reset_timeout_ms: u64,
        call_timeout_ms: u64,
    ) -> Result<Self, ConfigError> {
        Self::new(
            failure_threshold,
            Duration::from_millis(reset_timeout_ms),
            Duration::from_millis(call_timeout_ms),
        )
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(5),
        }
    }
}
