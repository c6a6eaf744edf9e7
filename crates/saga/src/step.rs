//! Saga steps and definitions.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::context::SagaContext;
use crate::error::StepError;

/// Where a step does its work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Runs against a local store; not guarded by a breaker.
    Local,
    /// Calls another service; forward and compensation run through the
    /// circuit breaker registered for `dependency`.
    Remote { dependency: String },
}

impl StepKind {
    pub fn remote(dependency: impl Into<String>) -> Self {
        StepKind::Remote {
            dependency: dependency.into(),
        }
    }

    pub fn dependency(&self) -> Option<&str> {
        match self {
            StepKind::Local => None,
            StepKind::Remote { dependency } => Some(dependency),
        }
    }
}

/// One step of a saga: a forward action paired with its compensation.
#[async_trait]
pub trait SagaStep: Send + Sync {
    /// Step name, used in logs, the registry, and compensation reports.
    fn name(&self) -> &str;

    fn kind(&self) -> StepKind;

    /// Runs the forward action. The returned patch is merged into the context.
    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError>;

    /// Undoes the forward action. `context` is the context as it stood right
    /// after this step's own forward action completed.
    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError>;
}

/// Boxed future returned by closure-based steps.
pub type StepFuture<T> = Pin<Box<dyn Future<Output = Result<T, StepError>> + Send>>;

type ForwardFn = dyn Fn(SagaContext) -> StepFuture<SagaContext> + Send + Sync;
type CompensateFn = dyn Fn(SagaContext) -> StepFuture<()> + Send + Sync;

/// A step built from closures.
///
/// Closures receive an owned copy of the context. Without an explicit
/// compensation the step has nothing to undo.
pub struct FnStep {
    name: String,
    kind: StepKind,
    forward: Box<ForwardFn>,
    compensate: Box<CompensateFn>,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, kind: StepKind, forward: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SagaContext, StepError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind,
            forward: Box::new(move |ctx| -> StepFuture<SagaContext> { Box::pin(forward(ctx)) }),
            compensate: Box::new(|_| -> StepFuture<()> { Box::pin(async { Ok(()) }) }),
        }
    }

    pub fn local<F, Fut>(name: impl Into<String>, forward: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SagaContext, StepError>> + Send + 'static,
    {
        Self::new(name, StepKind::Local, forward)
    }

    pub fn remote<F, Fut>(name: impl Into<String>, dependency: impl Into<String>, forward: F) -> Self
    where
        F: Fn(SagaContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SagaContext, StepError>> + Send + 'static,
    {
        Self::new(name, StepKind::remote(dependency), forward)
    }

    /// Sets the compensation.
    pub fn compensate_with<C, CFut>(mut self, compensate: C) -> Self
    where
        C: Fn(SagaContext) -> CFut + Send + Sync + 'static,
        CFut: Future<Output = Result<(), StepError>> + Send + 'static,
    {
        self.compensate = Box::new(move |ctx| -> StepFuture<()> { Box::pin(compensate(ctx)) });
        self
    }
}

#[async_trait]
impl SagaStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StepKind {
        self.kind.clone()
    }

    async fn execute(&self, context: &SagaContext) -> Result<SagaContext, StepError> {
        (self.forward)(context.clone()).await
    }

    async fn compensate(&self, context: &SagaContext) -> Result<(), StepError> {
        (self.compensate)(context.clone()).await
    }
}

impl std::fmt::Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// An ordered list of steps, executed front to back and compensated back to front.
#[derive(Clone)]
pub struct SagaDefinition {
    saga_type: String,
    steps: Vec<Arc<dyn SagaStep>>,
    deadline: Option<Duration>,
}

impl SagaDefinition {
    pub fn builder(saga_type: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            saga_type: saga_type.into(),
            steps: Vec::new(),
            deadline: None,
        }
    }

    pub fn saga_type(&self) -> &str {
        &self.saga_type
    }

    pub fn steps(&self) -> &[Arc<dyn SagaStep>] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Upper bound on the whole forward path, if any.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Debug for SagaDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("saga_type", &self.saga_type)
            .field("steps", &self.step_names())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Builder for [`SagaDefinition`].
pub struct SagaDefinitionBuilder {
    saga_type: String,
    steps: Vec<Arc<dyn SagaStep>>,
    deadline: Option<Duration>,
}

impl SagaDefinitionBuilder {
    pub fn step(mut self, step: impl SagaStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Bounds the forward path of every execution. A zero duration means no deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = (!deadline.is_zero()).then_some(deadline);
        self
    }

    pub fn build(self) -> SagaDefinition {
        SagaDefinition {
            saga_type: self.saga_type,
            steps: self.steps,
            deadline: self.deadline,
        }
    }
}
