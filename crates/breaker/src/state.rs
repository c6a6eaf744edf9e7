//! Circuit breaker state machine.

use serde::{Deserialize, Serialize};

/// The state of a circuit breaker.
///
/// State transitions:
/// ```text
/// Closed ──(failures >= threshold)──► Open ──(reset timeout)──► HalfOpen
///   ▲                                  ▲                           │
///   └────────(probe succeeds)──────────┼───────────────────────────┤
///                                      └────(probe fails)──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    #[default]
    Closed,

    /// The dependency is presumed unhealthy; calls fail fast.
    Open,

    /// A single probe call is in flight.
    HalfOpen,
}

impl BreakerState {
    /// Returns true if calls are rejected without being invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerState::Open)
    }

    /// Value exported on the `circuit_breaker_state` gauge.
    pub fn gauge_value(&self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
