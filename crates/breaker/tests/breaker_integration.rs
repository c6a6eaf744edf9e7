//! Concurrency tests for shared circuit breakers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use breaker::{BreakerConfig, BreakerError, BreakerRegistry, BreakerState, CircuitBreaker};

async fn failing_call() -> Result<(), String> {
    tokio::time::sleep(Duration::from_millis(10)).await;
    Err("payment service error".to_string())
}

#[tokio::test]
async fn test_concurrent_failures_are_all_counted() {
    let breaker = CircuitBreaker::new(
        "payment-service",
        BreakerConfig::from_millis(1, 30_000, 1_000).unwrap(),
    );

    let (a, b, c) = tokio::join!(
        breaker.execute(failing_call),
        breaker.execute(failing_call),
        breaker.execute(failing_call),
    );

    for result in [a, b, c] {
        assert!(matches!(result, Err(BreakerError::Inner(_))));
    }
    assert_eq!(breaker.failure_count(), 3);
    assert_eq!(breaker.state(), BreakerState::Open);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_lost_updates_across_threads() {
    let breaker = Arc::new(CircuitBreaker::new(
        "project-service",
        BreakerConfig::from_millis(1_000, 30_000, 1_000).unwrap(),
    ));

    let mut handles = Vec::new();
    for _ in 0..64 {
        let breaker = breaker.clone();
        handles.push(tokio::spawn(async move {
            breaker.execute(failing_call).await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_err());
    }

    assert_eq!(breaker.failure_count(), 64);
    assert_eq!(breaker.state(), BreakerState::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_threshold_crossed_once_under_load() {
    let registry = BreakerRegistry::new(BreakerConfig::from_millis(5, 60_000, 1_000).unwrap());
    let invoked = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let registry = registry.clone();
        let invoked = invoked.clone();
        handles.push(tokio::spawn(async move {
            registry
                .get_or_create("payment-service")
                .execute(|| async move {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    failing_call().await
                })
                .await
        }));
    }

    let mut rejected = 0;
    for handle in handles {
        if let Err(BreakerError::Open { .. }) = handle.await.unwrap() {
            rejected += 1;
        }
    }

    let breaker = registry.get("payment-service").unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(breaker.state(), BreakerState::Open);
    assert_eq!(invoked.load(Ordering::SeqCst) + rejected, 20);
    assert_eq!(breaker.failure_count() as usize, invoked.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_recovery_cycle() {
    let breaker = CircuitBreaker::new(
        "payment-service",
        BreakerConfig::from_millis(3, 30_000, 3_000).unwrap(),
    );
    for _ in 0..3 {
        let _ = breaker.execute(failing_call).await;
    }
    assert_eq!(breaker.state(), BreakerState::Open);

    tokio::time::advance(Duration::from_millis(30_001)).await;
    let value = breaker
        .execute(|| async { Ok::<_, String>("recovered") })
        .await
        .unwrap();

    assert_eq!(value, "recovered");
    assert_eq!(breaker.state(), BreakerState::Closed);
    assert_eq!(breaker.failure_count(), 0);
}
