//! API server entry point.

use std::time::Duration;

use api::config::{Config, LogFormat};
use saga::SagaRegistry;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Periodically drops finished sagas past their retention window.
async fn sweep_finished_sagas(registry: SagaRegistry) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        let evicted = registry.evict_expired().await;
        if evicted > 0 {
            tracing::debug!(evicted, "swept finished sagas");
        }
    }
}

fn init_tracing(log_level: &str, log_format: LogFormat) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let (log_level, log_format) = Config::logging_from_env();
    init_tracing(&log_level, log_format);
    let config = Config::from_env();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let addr = config.addr();
    tracing::info!(
        payment_service = %config.payment_service_url,
        failure_threshold = config.breaker_failure_threshold,
        reset_timeout_ms = config.breaker_reset_timeout_ms,
        call_timeout_ms = config.breaker_call_timeout_ms,
        "configuration loaded"
    );
    let state = api::create_default_state(config).expect("invalid circuit breaker configuration");
    let sweeper = tokio::spawn(sweep_finished_sagas(state.registry().clone()));
    let app = api::create_app(state, metrics_handle);

    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.abort();
    tracing::info!("server shut down gracefully");
}
