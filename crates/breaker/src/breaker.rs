//! The circuit breaker itself.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::error::BreakerError;
use crate::state::BreakerState;

/// Receives breaker state transitions.
///
/// Called synchronously after the breaker lock has been released, so an
/// implementation must return quickly and must not call back into the breaker.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, dependency: &str, from: BreakerState, to: BreakerState);
}

/// Point-in-time view of a breaker, for health and inspection endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerSnapshot {
    pub dependency: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    pub call_timeout_ms: u64,
    /// Milliseconds since the most recent failure, if any.
    pub last_failure_ago_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Normal,
    Probe,
}

/// Guards calls to one dependency.
///
/// All counters live behind a single mutex that is never held across an
/// `.await`, so admissions and outcomes from concurrent callers are
/// linearized: `n` concurrent failures always add exactly `n` to the count.
pub struct CircuitBreaker {
    dependency: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
    listener: Option<Arc<dyn TransitionListener>>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for `dependency`.
    pub fn new(dependency: impl Into<String>, config: BreakerConfig) -> Self {
        let breaker = Self {
            dependency: dependency.into(),
            config,
            inner: Mutex::new(Inner::default()),
            listener: None,
        };
        metrics::gauge!("circuit_breaker_state", "dependency" => breaker.dependency.clone())
            .set(BreakerState::Closed.gauge_value());
        breaker
    }

    /// Attaches a listener notified on every state transition.
    pub fn with_listener(mut self, listener: Arc<dyn TransitionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            dependency: self.dependency.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold(),
            reset_timeout_ms: self.config.reset_timeout().as_millis() as u64,
            call_timeout_ms: self.config.call_timeout().as_millis() as u64,
            last_failure_ago_ms: inner
                .last_failure
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Runs `action` through the breaker.
    ///
    /// When the breaker is open the closure is never called. Otherwise the
    /// returned future races the call timeout; a timed-out future is dropped
    /// and the call is recorded as a failure.
    pub async fn execute<F, Fut, T, E>(&self, action: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = match self.admit() {
            Ok(admission) => admission,
            Err(retry_after) => {
                metrics::counter!("circuit_breaker_rejections_total", "dependency" => self.dependency.clone())
                    .increment(1);
                tracing::debug!(dependency = %self.dependency, ?retry_after, "call rejected, circuit open");
                return Err(BreakerError::Open {
                    dependency: self.dependency.clone(),
                    retry_after,
                });
            }
        };

        let guard = CallGuard {
            breaker: self,
            admission,
            settled: false,
        };

        let call_timeout = self.config.call_timeout();
        let outcome = if call_timeout.is_zero() {
            Some(action().await)
        } else {
            tokio::time::timeout(call_timeout, action()).await.ok()
        };

        match outcome {
            Some(Ok(value)) => {
                guard.succeed();
                Ok(value)
            }
            Some(Err(e)) => {
                guard.fail();
                Err(BreakerError::Inner(e))
            }
            None => {
                guard.fail();
                tracing::warn!(dependency = %self.dependency, after = ?call_timeout, "call timed out");
                Err(BreakerError::Timeout {
                    dependency: self.dependency.clone(),
                    after: call_timeout,
                })
            }
        }
    }

    /// Returns the breaker to a closed state with cleared counters.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.failure_count = 0;
            inner.last_failure = None;
            Self::transition(&mut inner, BreakerState::Closed)
        };
        self.notify(transition);
    }

    fn admit(&self) -> Result<Admission, Duration> {
        let (admission, transition) = {
            let mut inner = self.lock();
            match inner.state {
                BreakerState::Closed => (Ok(Admission::Normal), None),
                // The probe is still in flight.
                BreakerState::HalfOpen => (Err(Duration::ZERO), None),
                BreakerState::Open => {
                    let reset_timeout = self.config.reset_timeout();
                    let elapsed = inner
                        .last_failure
                        .map(|at| at.elapsed())
                        .unwrap_or(reset_timeout);
                    if elapsed >= reset_timeout {
                        let transition = Self::transition(&mut inner, BreakerState::HalfOpen);
                        (Ok(Admission::Probe), transition)
                    } else {
                        (Err(reset_timeout - elapsed), None)
                    }
                }
            }
        };
        self.notify(transition);
        admission
    }

    fn record_success(&self, admission: Admission) {
        let transition = {
            let mut inner = self.lock();
            match (inner.state, admission) {
                (BreakerState::HalfOpen, Admission::Probe) => {
                    inner.failure_count = 0;
                    Self::transition(&mut inner, BreakerState::Closed)
                }
                (BreakerState::Closed, _) => {
                    inner.failure_count = 0;
                    None
                }
                // A call admitted before the breaker opened; it says nothing
                // about the dependency now.
                _ => None,
            }
        };
        self.notify(transition);
    }

    fn record_failure(&self, admission: Admission) {
        metrics::counter!("circuit_breaker_failures_total", "dependency" => self.dependency.clone())
            .increment(1);
        let transition = {
            let mut inner = self.lock();
            inner.failure_count = inner.failure_count.saturating_add(1);
            inner.last_failure = Some(Instant::now());
            match (inner.state, admission) {
                (BreakerState::HalfOpen, Admission::Probe) => {
                    Self::transition(&mut inner, BreakerState::Open)
                }
                (BreakerState::Closed, _)
                    if inner.failure_count >= self.config.failure_threshold() =>
                {
                    Self::transition(&mut inner, BreakerState::Open)
                }
                _ => None,
            }
        };
        self.notify(transition);
    }

    /// The probe's caller went away before it finished. Reopen and restart
    /// the reset window without counting a failure.
    fn abandon_probe(&self) {
        let transition = {
            let mut inner = self.lock();
            if inner.state != BreakerState::HalfOpen {
                return;
            }
            inner.last_failure = Some(Instant::now());
            Self::transition(&mut inner, BreakerState::Open)
        };
        self.notify(transition);
    }

    fn transition(inner: &mut Inner, to: BreakerState) -> Option<(BreakerState, BreakerState)> {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        Some((from, to))
    }

    fn notify(&self, transition: Option<(BreakerState, BreakerState)>) {
        let Some((from, to)) = transition else {
            return;
        };

        metrics::gauge!("circuit_breaker_state", "dependency" => self.dependency.clone())
            .set(to.gauge_value());
        metrics::counter!(
            "circuit_breaker_transitions_total",
            "dependency" => self.dependency.clone(),
            "to" => to.as_str()
        )
        .increment(1);

        if to.is_open() {
            tracing::warn!(dependency = %self.dependency, %from, %to, "circuit breaker opened");
        } else {
            tracing::info!(dependency = %self.dependency, %from, %to, "circuit breaker transition");
        }

        if let Some(listener) = &self.listener {
            listener.on_transition(&self.dependency, from, to);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("dependency", &self.dependency)
            .field("config", &self.config)
            .field("inner", &*self.lock())
            .finish()
    }
}

/// Settles an admitted call exactly once, including when the caller drops
/// the `execute` future mid-flight.
struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    admission: Admission,
    settled: bool,
}

impl CallGuard<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.record_success(self.admission);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.admission);
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.admission == Admission::Probe {
            self.breaker.abandon_probe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn breaker(threshold: u32, reset_ms: u64, call_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "payment-service",
            BreakerConfig::from_millis(threshold, reset_ms, call_ms).unwrap(),
        )
    }

    async fn fail(breaker: &CircuitBreaker) -> BreakerError<String> {
        breaker
            .execute(|| async { Err::<(), _>("boom".to_string()) })
            .await
            .unwrap_err()
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, BreakerError<String>> {
        breaker.execute(|| async { Ok::<_, String>(7) }).await
    }

    #[derive(Default)]
    struct RecordingListener {
        seen: Mutex<Vec<(BreakerState, BreakerState)>>,
    }

    impl TransitionListener for RecordingListener {
        fn on_transition(&self, _dependency: &str, from: BreakerState, to: BreakerState) {
            self.seen.lock().unwrap().push((from, to));
        }
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let b = breaker(3, 30_000, 1_000);
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_stops_invoking() {
        let b = breaker(3, 30_000, 1_000);
        for _ in 0..3 {
            assert!(matches!(fail(&b).await, BreakerError::Inner(_)));
        }
        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.failure_count(), 3);

        let calls = AtomicUsize::new(0);
        let err = b
            .execute(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_open());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let b = breaker(3, 30_000, 1_000);
        fail(&b).await;
        fail(&b).await;
        succeed(&b).await.unwrap();
        assert_eq!(b.failure_count(), 0);
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes() {
        let b = breaker(3, 30_000, 1_000);
        for _ in 0..3 {
            fail(&b).await;
        }
        tokio::time::advance(Duration::from_millis(30_001)).await;

        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);
        assert_eq!(b.failure_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_and_restarts_window() {
        let b = breaker(3, 30_000, 1_000);
        for _ in 0..3 {
            fail(&b).await;
        }
        tokio::time::advance(Duration::from_millis(30_001)).await;

        assert!(matches!(fail(&b).await, BreakerError::Inner(_)));
        assert_eq!(b.state(), BreakerState::Open);

        // The window counts from the probe failure, not the original one.
        tokio::time::advance(Duration::from_millis(29_000)).await;
        assert!(succeed(&b).await.unwrap_err().is_open());
        tokio::time::advance(Duration::from_millis(1_001)).await;
        assert!(succeed(&b).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_before_window_elapses() {
        let b = breaker(1, 30_000, 1_000);
        fail(&b).await;
        tokio::time::advance(Duration::from_millis(29_999)).await;
        match succeed(&b).await.unwrap_err() {
            BreakerError::Open { retry_after, .. } => {
                assert_eq!(retry_after, Duration::from_millis(1))
            }
            other => panic!("expected open, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let b = breaker(3, 30_000, 50);
        let err = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, String>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(b.failure_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_call_timeout_disables_timer() {
        let b = breaker(3, 30_000, 0);
        let value = b
            .execute(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, String>(1)
            })
            .await
            .unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_call_rejected_while_probe_in_flight() {
        let b = breaker(1, 1_000, 10_000);
        fail(&b).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let probe = b.execute(|| async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>(1)
        });
        let other = async {
            tokio::task::yield_now().await;
            succeed(&b).await
        };
        let (probe, other) = tokio::join!(probe, other);

        assert_eq!(probe.unwrap(), 1);
        assert!(other.unwrap_err().is_open());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_reopens() {
        let b = breaker(1, 1_000, 10_000);
        fail(&b).await;
        tokio::time::advance(Duration::from_millis(1_001)).await;

        let probe = b.execute(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, String>(())
        });
        let _ = tokio::time::timeout(Duration::from_millis(10), probe).await;

        assert_eq!(b.state(), BreakerState::Open);
        assert_eq!(b.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_sees_transitions() {
        let listener = Arc::new(RecordingListener::default());
        let b = CircuitBreaker::new(
            "auth-service",
            BreakerConfig::from_millis(1, 0, 1_000).unwrap(),
        )
        .with_listener(listener.clone());

        fail(&b).await;
        succeed(&b).await.unwrap();

        let seen = listener.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (BreakerState::Closed, BreakerState::Open),
                (BreakerState::Open, BreakerState::HalfOpen),
                (BreakerState::HalfOpen, BreakerState::Closed),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_closes_and_clears() {
        let b = breaker(1, 30_000, 1_000);
        fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        b.reset();
        let snapshot = b.snapshot();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.last_failure_ago_ms, None);
        assert!(succeed(&b).await.is_ok());
    }
}
