//! Shared application state.

use std::sync::Arc;

use breaker::{BreakerRegistry, ConfigError};
use saga::payment_processing::PROJECT_SERVICE;
use saga::project_creation::PAYMENT_SERVICE;
use saga::{
    HttpPeer, InMemoryMonitor, InMemoryRecordStore, LocalProjectPeer, MetricsMonitor, MonitorSet,
    RecordStore, RemoteInvoker, RemotePeer, SagaOrchestrator, SagaRegistry,
};

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub config: Config,
    pub orchestrator: SagaOrchestrator,
    pub invoker: RemoteInvoker,
    /// Project records, written by the project sagas.
    pub projects: Arc<dyn RecordStore>,
    /// Payment intents and payments served by the `/payments` endpoints.
    pub payments: Arc<dyn RecordStore>,
    pub monitor: InMemoryMonitor,
}

impl AppState {
    /// Builds the state with `payment_peer` answering for the payment service
    /// and this state's own project store answering for the project service.
    pub fn new(config: Config, payment_peer: Arc<dyn RemotePeer>) -> Result<Self, ConfigError> {
        Self::with_peers(config, payment_peer, None)
    }

    /// Like [`AppState::new`], with `project_peer` answering for the project
    /// service when given.
    pub fn with_peers(
        config: Config,
        payment_peer: Arc<dyn RemotePeer>,
        project_peer: Option<Arc<dyn RemotePeer>>,
    ) -> Result<Self, ConfigError> {
        let projects: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new());
        let project_peer = project_peer
            .unwrap_or_else(|| Arc::new(LocalProjectPeer::new(projects.clone())));

        let monitor = InMemoryMonitor::default();
        let breakers = BreakerRegistry::new(config.breaker_config()?)
            .with_listener(Arc::new(monitor.clone()));
        let invoker = RemoteInvoker::new(breakers.clone())
            .with_peer(PAYMENT_SERVICE, payment_peer)
            .with_peer(PROJECT_SERVICE, project_peer);

        let monitors = MonitorSet::new()
            .with(Arc::new(MetricsMonitor))
            .with(Arc::new(monitor.clone()));
        let orchestrator = SagaOrchestrator::new(
            SagaRegistry::new(config.saga_retention()),
            breakers,
            Arc::new(monitors),
        );

        Ok(Self {
            config,
            orchestrator,
            invoker,
            projects,
            payments: Arc::new(InMemoryRecordStore::new()),
            monitor,
        })
    }

    /// Builds the state with the payment service reached over HTTP at
    /// `config.payment_service_url`, and the project service at
    /// `config.project_service_url` when set.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let payment_peer = HttpPeer::new(config.payment_service_url.clone());
        let project_peer = config
            .project_service_url
            .clone()
            .map(|url| Arc::new(HttpPeer::new(url)) as Arc<dyn RemotePeer>);
        Self::with_peers(config, Arc::new(payment_peer), project_peer)
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        self.orchestrator.breakers()
    }

    pub fn registry(&self) -> &SagaRegistry {
        self.orchestrator.registry()
    }
}
