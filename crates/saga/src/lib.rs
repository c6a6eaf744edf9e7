//! Saga orchestration for multi-service business transactions.
//!
//! A saga is an ordered list of steps, each pairing a forward action with a
//! compensation. The [`SagaOrchestrator`] runs the forward actions in order;
//! on the first failure it compensates every completed step in reverse order
//! and reports the outcome of each compensation to the caller.
//!
//! Steps that call another service are marked [`StepKind::Remote`] and run
//! through that dependency's circuit breaker, shared through a
//! [`breaker::BreakerRegistry`].
//!
//! The project creation saga follows these steps:
//! 1. Create the project in draft state
//! 2. Open a payment intent on the payment service
//! 3. Activate the project
//!
//! [`project_update`] changes a project and keeps its payment intent in step
//! with the budget; [`payment_processing`] holds the payment and refund sagas,
//! which call the project service.

pub mod context;
pub mod error;
pub mod events;
pub mod instance;
pub mod orchestrator;
pub mod payment_processing;
pub mod project_creation;
pub mod project_update;
pub mod registry;
pub mod remote;
pub mod services;
pub mod state;
pub mod step;

pub use context::SagaContext;
pub use error::{
    CompensationError, CompensationOutcome, CompensationResult, SagaExecutionFailed, StepError,
    StoreError,
};
pub use events::SagaEvent;
pub use instance::SagaInstance;
pub use orchestrator::{SagaOrchestrator, SagaOutcome};
pub use payment_processing::{PaymentRequest, payment_saga, refund_saga};
pub use project_creation::{NewProject, project_creation_saga};
pub use project_update::{ProjectChanges, project_update_saga};
pub use registry::{RegistryMetrics, SagaRegistry};
pub use remote::{RemoteInvoker, through_breaker};
pub use services::{
    HttpPeer, InMemoryMonitor, InMemoryPaymentPeer, InMemoryRecordStore, LocalProjectPeer,
    MetricsMonitor, Monitor, MonitorEvent, MonitorSet, MonitorSummary, Record, RecordStore,
    RemotePeer, RemoteRequest, RemoteResponse,
};
pub use state::SagaStatus;
pub use step::{FnStep, SagaDefinition, SagaDefinitionBuilder, SagaStep, StepKind};
