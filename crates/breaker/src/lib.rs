//! Circuit breakers for calls that cross a service boundary.
//!
//! A [`CircuitBreaker`] wraps every outbound call to one dependency. After
//! `failure_threshold` consecutive failures it opens and rejects calls without
//! invoking them until `reset_timeout` has elapsed, then lets a single probe
//! through to decide whether the dependency has recovered.
//!
//! Breakers are meant to be shared: a [`BreakerRegistry`] is the single place
//! where a breaker is created for a dependency name, and every caller of that
//! dependency receives the same instance.

pub mod breaker;
pub mod config;
pub mod error;
pub mod registry;
pub mod state;

pub use breaker::{BreakerSnapshot, CircuitBreaker, TransitionListener};
pub use config::{BreakerConfig, ConfigError};
pub use error::BreakerError;
pub use registry::BreakerRegistry;
pub use state::BreakerState;
