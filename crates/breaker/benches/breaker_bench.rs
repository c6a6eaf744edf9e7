use breaker::{BreakerConfig, CircuitBreaker};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_closed_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new("bench", BreakerConfig::default());

    c.bench_function("breaker/closed_execute", |b| {
        b.iter(|| {
            rt.block_on(async {
                breaker
                    .execute(|| async { Ok::<_, String>(42) })
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_open_rejection(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreaker::new(
        "bench",
        BreakerConfig::from_millis(1, 3_600_000, 1_000).unwrap(),
    );
    rt.block_on(async {
        let _ = breaker.execute(|| async { Err::<(), _>("down") }).await;
    });

    c.bench_function("breaker/open_rejection", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = breaker.execute(|| async { Ok::<_, String>(()) }).await;
            });
        });
    });
}

criterion_group!(benches, bench_closed_execute, bench_open_rejection);
criterion_main!(benches);
