//! Breaker error types.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a call rejected or failed by a [`CircuitBreaker`](crate::CircuitBreaker).
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open (or a probe is already in flight); the action was
    /// not invoked. Callers should retry later, not immediately.
    #[error("circuit breaker for '{dependency}' is open, retry after {retry_after:?}")]
    Open {
        dependency: String,
        retry_after: Duration,
    },

    /// The action did not finish within the call timeout.
    #[error("call to '{dependency}' timed out after {after:?}")]
    Timeout { dependency: String, after: Duration },

    /// The action itself failed.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns true if the call was rejected without being invoked.
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Returns true if the call exceeded the call timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BreakerError::Timeout { .. })
    }

    /// Returns the action's own error, if that is what failed.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            _ => None,
        }
    }
}
