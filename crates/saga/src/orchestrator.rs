//! Saga orchestrator: forward execution and reverse-order compensation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use breaker::BreakerRegistry;
use common::SagaId;
use serde_json::json;
use tokio::time::Instant;
use tracing::Instrument;

use crate::context::SagaContext;
use crate::error::{CompensationResult, SagaExecutionFailed, StepError};
use crate::events::SagaEvent;
use crate::instance::SagaInstance;
use crate::registry::SagaRegistry;
use crate::remote::through_breaker;
use crate::services::monitor::Monitor;
use crate::state::SagaStatus;
use crate::step::{SagaDefinition, SagaStep, StepKind};

/// Result of a saga whose forward steps all succeeded.
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub saga_id: SagaId,
    pub context: SagaContext,
}

/// Runs saga definitions.
///
/// Steps run strictly one after another. The first forward failure stops
/// forward progress, and every step that had completed is compensated in
/// reverse order, one at a time. A failing compensation is recorded and the
/// remaining compensations still run. REMOTE steps, forward and
/// compensation, go through the circuit breaker of their dependency.
///
/// Many sagas may run concurrently on one orchestrator; they only share the
/// breakers and the registry.
#[derive(Clone)]
pub struct SagaOrchestrator {
    registry: SagaRegistry,
    breakers: BreakerRegistry,
    monitor: Arc<dyn Monitor>,
}

impl SagaOrchestrator {
    pub fn new(registry: SagaRegistry, breakers: BreakerRegistry, monitor: Arc<dyn Monitor>) -> Self {
        Self {
            registry,
            breakers,
            monitor,
        }
    }

    pub fn registry(&self) -> &SagaRegistry {
        &self.registry
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    /// Looks up a running or recently finished saga.
    pub async fn get_saga(&self, saga_id: SagaId) -> Option<SagaInstance> {
        self.registry.get(saga_id).await
    }

    /// Executes `definition` starting from `initial`.
    ///
    /// Returns the final context when every step succeeds. Otherwise returns
    /// [`SagaExecutionFailed`] once compensation has finished; its status is
    /// `Compensated` if every compensation succeeded and `Failed` if any did not.
    ///
    /// Compensation runs on its own task, so it finishes even if the caller
    /// stops waiting. If the returned future is dropped before the saga
    /// finishes, the completed steps are compensated in the background and the
    /// instance is closed with [`StepError::Abandoned`].
    #[tracing::instrument(
        skip(self, definition, initial),
        fields(saga = %definition.saga_type(), saga_id = tracing::field::Empty)
    )]
    pub async fn execute_saga(
        &self,
        definition: &SagaDefinition,
        initial: SagaContext,
    ) -> Result<SagaOutcome, SagaExecutionFailed> {
        let saga_type = definition.saga_type();
        metrics::counter!("saga_executions_total", "saga" => saga_type.to_string()).increment(1);
        let started = Instant::now();

        let saga_id = SagaId::new();
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));

        let mut guard = AbandonGuard::new(self, definition, saga_id);
        let mut instance =
            SagaInstance::new(saga_id, saga_type, definition.step_names(), initial.clone());
        // Running before it is visible, so an abandoned saga is always compensable.
        instance.set_status(SagaStatus::Running);
        self.registry.register(instance).await;
        self.monitor.record_saga_start(saga_id, saga_type);

        let deadline = definition
            .deadline()
            .map(|budget| (started + budget, budget));
        let mut context = initial;

        for (index, step) in definition.steps().iter().enumerate() {
            tracing::info!(step = step.name(), index, "saga step started");
            match self.forward(step.as_ref(), &context, deadline).await {
                Ok(patch) => {
                    context.merge(patch);
                    // Context as it stood right after this step, for its compensation.
                    guard.snapshots.push(context.clone());
                    self.registry
                        .apply(
                            saga_id,
                            SagaEvent::step_completed(index, step.name(), context.clone()),
                        )
                        .await;
                    tracing::info!(step = step.name(), index, "saga step completed");
                }
                Err(cause) => {
                    let snapshots = guard.disarm();
                    let failure = self
                        .spawn_compensation(definition, saga_id, index, cause, snapshots)
                        .await;
                    metrics::histogram!("saga_duration_seconds", "saga" => saga_type.to_string())
                        .record(started.elapsed().as_secs_f64());
                    return Err(failure);
                }
            }
        }

        self.registry
            .apply(saga_id, SagaEvent::saga_completed())
            .await;
        guard.disarm();
        self.monitor.record_saga_success(saga_id, saga_type);

        let duration = started.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "saga" => saga_type.to_string())
            .record(duration);
        metrics::counter!("saga_completed_total", "saga" => saga_type.to_string()).increment(1);
        tracing::info!(%saga_id, duration, "saga completed successfully");

        Ok(SagaOutcome { saga_id, context })
    }

    /// Runs [`Self::compensate`] on a separate task and waits for its report.
    async fn spawn_compensation(
        &self,
        definition: &SagaDefinition,
        saga_id: SagaId,
        failed_index: usize,
        cause: StepError,
        snapshots: Vec<SagaContext>,
    ) -> SagaExecutionFailed {
        let this = self.clone();
        let owned = definition.clone();
        let report_cause = cause.clone();
        let task = tokio::spawn(
            async move {
                this.compensate(&owned, saga_id, failed_index, cause, &snapshots)
                    .await
            }
            .in_current_span(),
        );

        match task.await {
            Ok(failure) => failure,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                tracing::error!(%saga_id, error = %e, "compensation task did not finish");
                SagaExecutionFailed {
                    saga_id,
                    saga_type: definition.saga_type().to_string(),
                    failed_step: definition.steps()[failed_index].name().to_string(),
                    failed_index,
                    cause: report_cause,
                    compensation_results: Vec::new(),
                    status: SagaStatus::Failed,
                }
            }
        }
    }

    /// Runs a forward action, bounded by the saga deadline if there is one.
    async fn forward(
        &self,
        step: &dyn SagaStep,
        context: &SagaContext,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<SagaContext, StepError> {
        let action = self.guarded(step, || step.execute(context));
        match deadline {
            None => action.await,
            Some((at, budget)) => tokio::time::timeout_at(at, action)
                .await
                .unwrap_or_else(|_| {
                    Err(StepError::DeadlineExceeded {
                        after_ms: budget.as_millis() as u64,
                    })
                }),
        }
    }

    /// Runs `action` through the step's breaker when the step is remote.
    async fn guarded<F, Fut, T>(&self, step: &dyn SagaStep, action: F) -> Result<T, StepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        match step.kind() {
            StepKind::Local => action().await,
            StepKind::Remote { dependency } => {
                let breaker = self.breakers.get_or_create(&dependency);
                through_breaker(&breaker, action).await
            }
        }
    }

    /// Unwinds the steps before `failed_index` and builds the caller's error.
    #[tracing::instrument(skip(self, definition, cause, snapshots))]
    async fn compensate(
        &self,
        definition: &SagaDefinition,
        saga_id: SagaId,
        failed_index: usize,
        cause: StepError,
        snapshots: &[SagaContext],
    ) -> SagaExecutionFailed {
        let saga_type = definition.saga_type();
        let steps = definition.steps();
        let failed_step = steps[failed_index].name().to_string();

        tracing::warn!(step = %failed_step, index = failed_index, error = %cause, "saga step failed");
        self.monitor.record_event(
            "step_failed",
            json!({
                "sagaId": saga_id,
                "saga": saga_type,
                "step": failed_step,
                "index": failed_index,
                "error": cause,
            }),
        );
        self.registry
            .apply(
                saga_id,
                SagaEvent::step_failed(failed_index, &failed_step, cause.clone()),
            )
            .await;
        self.registry
            .apply(saga_id, SagaEvent::compensation_started(&failed_step))
            .await;

        let mut results = Vec::with_capacity(failed_index);
        for index in (0..failed_index).rev() {
            let step = steps[index].as_ref();
            let snapshot = &snapshots[index];

            match self.guarded(step, || step.compensate(snapshot)).await {
                Ok(()) => {
                    tracing::info!(step = step.name(), index, "compensation completed");
                    results.push(CompensationResult::succeeded(index, step.name()));
                    self.registry
                        .apply(
                            saga_id,
                            SagaEvent::compensation_step_completed(index, step.name()),
                        )
                        .await;
                }
                Err(error) => {
                    tracing::error!(step = step.name(), index, %error, "compensation failed");
                    metrics::counter!("saga_compensation_failures_total", "saga" => saga_type.to_string())
                        .increment(1);
                    self.monitor.record_event(
                        "compensation_failed",
                        json!({
                            "sagaId": saga_id,
                            "saga": saga_type,
                            "step": step.name(),
                            "index": index,
                            "error": error,
                        }),
                    );
                    results.push(CompensationResult::failed(index, step.name(), error.clone()));
                    self.registry
                        .apply(
                            saga_id,
                            SagaEvent::compensation_step_failed(index, step.name(), error),
                        )
                        .await;
                }
            }
        }

        let status = if results.iter().all(CompensationResult::is_success) {
            metrics::counter!("saga_compensated_total", "saga" => saga_type.to_string())
                .increment(1);
            SagaStatus::Compensated
        } else {
            SagaStatus::Failed
        };
        metrics::counter!("saga_failed_total", "saga" => saga_type.to_string()).increment(1);

        self.registry
            .apply(
                saga_id,
                SagaEvent::saga_failed(status, format!("Step '{failed_step}' failed: {cause}")),
            )
            .await;
        self.monitor.record_saga_failure(saga_id, saga_type);
        tracing::warn!(%saga_id, %status, compensations = results.len(), "saga failed");

        SagaExecutionFailed {
            saga_id,
            saga_type: saga_type.to_string(),
            failed_step,
            failed_index,
            cause,
            compensation_results: results,
            status,
        }
    }
}

/// Cleans up after a saga whose `execute_saga` future was dropped mid-flight.
///
/// While armed, dropping the guard spawns a task that compensates every step
/// recorded in `snapshots` and moves the instance to a terminal status. If
/// every step had already completed, the saga is closed as completed instead.
struct AbandonGuard {
    orchestrator: SagaOrchestrator,
    definition: SagaDefinition,
    saga_id: SagaId,
    snapshots: Vec<SagaContext>,
    armed: bool,
}

impl AbandonGuard {
    fn new(orchestrator: &SagaOrchestrator, definition: &SagaDefinition, saga_id: SagaId) -> Self {
        Self {
            orchestrator: orchestrator.clone(),
            definition: definition.clone(),
            saga_id,
            snapshots: Vec::with_capacity(definition.len()),
            armed: true,
        }
    }

    /// Hands the snapshots back and stops the guard from acting on drop.
    fn disarm(&mut self) -> Vec<SagaContext> {
        self.armed = false;
        std::mem::take(&mut self.snapshots)
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let saga_id = self.saga_id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(%saga_id, "saga abandoned outside a runtime, left uncompensated");
            return;
        };

        let orchestrator = self.orchestrator.clone();
        let definition = self.definition.clone();
        let snapshots = std::mem::take(&mut self.snapshots);
        let completed = snapshots.len();
        tracing::warn!(%saga_id, completed, "saga abandoned by its caller");

        runtime.spawn(async move {
            if completed >= definition.len() {
                orchestrator
                    .registry
                    .apply(saga_id, SagaEvent::saga_completed())
                    .await;
                orchestrator
                    .monitor
                    .record_saga_success(saga_id, definition.saga_type());
            } else {
                orchestrator
                    .compensate(&definition, saga_id, completed, StepError::Abandoned, &snapshots)
                    .await;
            }
        });
    }
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryMonitor;
    use crate::step::FnStep;
    use breaker::{BreakerConfig, BreakerState};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn orchestrator(threshold: u32) -> (SagaOrchestrator, InMemoryMonitor) {
        let monitor = InMemoryMonitor::default();
        let breakers =
            BreakerRegistry::new(BreakerConfig::from_millis(threshold, 30_000, 3_000).unwrap());
        let orchestrator =
            SagaOrchestrator::new(SagaRegistry::default(), breakers, Arc::new(monitor.clone()));
        (orchestrator, monitor)
    }

    /// A step that records its forward and compensation calls in `log`.
    fn scripted(name: &str, kind: StepKind, log: &Log, fail_forward: bool, fail_compensate: bool) -> FnStep {
        let forward_log = log.clone();
        let compensate_log = log.clone();
        let forward_name = name.to_string();
        let compensate_name = name.to_string();
        FnStep::new(name, kind, move |_| {
            let log = forward_log.clone();
            let name = forward_name.clone();
            async move {
                log.lock().unwrap().push(format!("forward:{name}"));
                if fail_forward {
                    return Err(StepError::failed(format!("{name} failed")));
                }
                Ok(SagaContext::new().with(format!("{name}Id"), format!("{name}-1")))
            }
        })
        .compensate_with(move |ctx| {
            let log = compensate_log.clone();
            let name = compensate_name.clone();
            async move {
                let seen = ctx.len();
                log.lock().unwrap().push(format!("compensate:{name}:{seen}"));
                if fail_compensate {
                    return Err(StepError::failed(format!("undo {name} failed")));
                }
                Ok(())
            }
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_empty_saga_completes() {
        let (orchestrator, monitor) = orchestrator(3);
        let definition = SagaDefinition::builder("empty").build();

        let outcome = orchestrator
            .execute_saga(&definition, SagaContext::new().with("userId", "u1"))
            .await
            .unwrap();
        assert_eq!(outcome.context.require_str("userId").unwrap(), "u1");

        let saga = orchestrator.get_saga(outcome.saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
        assert!(saga.compensations().is_empty());
        assert_eq!(monitor.summary().sagas_completed, 1);
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let definition = SagaDefinition::builder("three")
            .step(scripted("a", StepKind::Local, &log, false, false))
            .step(scripted("b", StepKind::remote("svc"), &log, false, false))
            .step(scripted("c", StepKind::Local, &log, false, false))
            .build();

        let outcome = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap();
        assert_eq!(outcome.context.len(), 3);
        assert_eq!(entries(&log), vec!["forward:a", "forward:b", "forward:c"]);

        let saga = orchestrator.get_saga(outcome.saga_id).await.unwrap();
        assert_eq!(saga.completed_step_count(), 3);
        assert!(saga.ended_at().is_some());
    }

    #[tokio::test]
    async fn test_failure_at_first_step_runs_no_compensation() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let definition = SagaDefinition::builder("first_fails")
            .step(scripted("a", StepKind::Local, &log, true, false))
            .step(scripted("b", StepKind::Local, &log, false, false))
            .build();

        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.failed_index, 0);
        assert!(err.compensation_results.is_empty());
        assert_eq!(err.status, SagaStatus::Compensated);
        assert_eq!(entries(&log), vec!["forward:a"]);
    }

    #[tokio::test]
    async fn test_compensates_in_reverse_order_with_step_snapshots() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let definition = SagaDefinition::builder("reverse")
            .step(scripted("a", StepKind::Local, &log, false, false))
            .step(scripted("b", StepKind::Local, &log, false, false))
            .step(scripted("c", StepKind::Local, &log, false, false))
            .step(scripted("d", StepKind::Local, &log, true, false))
            .build();

        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();

        // Each compensation sees the context as of right after its own step.
        assert_eq!(
            entries(&log),
            vec![
                "forward:a",
                "forward:b",
                "forward:c",
                "forward:d",
                "compensate:c:3",
                "compensate:b:2",
                "compensate:a:1",
            ]
        );
        let order: Vec<_> = err.compensation_results.iter().map(|r| r.index).collect();
        assert_eq!(order, vec![2, 1, 0]);
        assert!(err.fully_compensated());
        assert_eq!(err.status, SagaStatus::Compensated);
        assert_eq!(err.failed_step, "d");
    }

    #[tokio::test]
    async fn test_failing_compensation_does_not_stop_the_rest() {
        let (orchestrator, monitor) = orchestrator(3);
        let log = Log::default();
        let definition = SagaDefinition::builder("partial")
            .step(scripted("a", StepKind::Local, &log, false, false))
            .step(scripted("b", StepKind::Local, &log, false, true))
            .step(scripted("c", StepKind::Local, &log, true, false))
            .build();

        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();

        assert_eq!(err.compensation_results.len(), 2);
        assert!(!err.compensation_results[0].is_success());
        assert!(err.compensation_results[1].is_success());
        assert_eq!(err.status, SagaStatus::Failed);
        assert_eq!(err.cause, StepError::failed("c failed"));
        assert_eq!(monitor.event_count("compensation_failed"), 1);

        let saga = orchestrator.get_saga(err.saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Failed);
        assert_eq!(saga.failed_step(), Some("c"));
        assert_eq!(saga.compensations().len(), 2);
    }

    #[tokio::test]
    async fn test_local_then_two_remotes_with_second_remote_failing() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let definition = SagaDefinition::builder("scenario")
            .step(scripted("createLocal", StepKind::Local, &log, false, false))
            .step(scripted("callRemoteA", StepKind::remote("service-a"), &log, false, false))
            .step(scripted("callRemoteB", StepKind::remote("service-b"), &log, true, false))
            .build();

        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();

        let compensated: Vec<_> = err
            .compensation_results
            .iter()
            .map(|r| r.step.as_str())
            .collect();
        assert_eq!(compensated, vec!["callRemoteA", "createLocal"]);
        assert_eq!(err.compensation_results.len(), 2);
        assert_eq!(err.failed_step, "callRemoteB");
        // Both compensations succeeded, so the saga ends COMPENSATED; FAILED is
        // reserved for a saga with a failed compensation.
        assert!(err.fully_compensated());
        assert_eq!(err.status, SagaStatus::Compensated);
        let saga = orchestrator.get_saga(err.saga_id).await.unwrap();
        assert_eq!(saga.status(), SagaStatus::Compensated);

        // Forward failure and compensation both went through the breakers.
        let breakers = orchestrator.breakers();
        assert_eq!(breakers.get("service-b").unwrap().failure_count(), 1);
        assert_eq!(breakers.get("service-a").unwrap().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_fails_remote_step_without_invoking() {
        let (orchestrator, _) = orchestrator(1);
        let log = Log::default();
        let definition = SagaDefinition::builder("remote")
            .step(scripted("local", StepKind::Local, &log, false, false))
            .step(scripted("pay", StepKind::remote("payment-service"), &log, true, false))
            .build();

        assert!(orchestrator.execute_saga(&definition, SagaContext::new()).await.is_err());
        assert_eq!(
            orchestrator.breakers().get("payment-service").unwrap().state(),
            BreakerState::Open
        );

        log.lock().unwrap().clear();
        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();
        assert!(matches!(err.cause, StepError::CircuitOpen { .. }));
        assert_eq!(entries(&log), vec!["forward:local", "compensate:local:1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_forward_path() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let stuck = FnStep::local("stuck", |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(SagaContext::new())
        });
        let definition = SagaDefinition::builder("bounded")
            .step(scripted("a", StepKind::Local, &log, false, false))
            .step(stuck)
            .deadline(Duration::from_secs(5))
            .build();

        let err = orchestrator
            .execute_saga(&definition, SagaContext::new())
            .await
            .unwrap_err();
        assert_eq!(err.cause, StepError::DeadlineExceeded { after_ms: 5_000 });
        assert_eq!(err.failed_step, "stuck");
        assert_eq!(err.compensation_results.len(), 1);
    }

    #[tokio::test]
    async fn test_registry_moves_finished_sagas_to_recent() {
        let (orchestrator, monitor) = orchestrator(3);
        let log = Log::default();
        let ok = SagaDefinition::builder("ok")
            .step(scripted("a", StepKind::Local, &log, false, false))
            .build();
        let failing = SagaDefinition::builder("failing")
            .step(scripted("a", StepKind::Local, &log, true, false))
            .build();

        orchestrator.execute_saga(&ok, SagaContext::new()).await.unwrap();
        orchestrator
            .execute_saga(&failing, SagaContext::new())
            .await
            .unwrap_err();

        let metrics = orchestrator.registry().metrics().await;
        assert_eq!(metrics.active, 0);
        assert_eq!(metrics.recent, 2);

        let summary = monitor.summary();
        assert_eq!(summary.sagas_started, 2);
        assert_eq!(summary.sagas_completed, 1);
        assert_eq!(summary.sagas_failed, 1);
    }

    async fn wait_until_finished(orchestrator: &SagaOrchestrator, saga_id: SagaId) -> SagaInstance {
        for _ in 0..1_000 {
            if let Some(saga) = orchestrator.get_saga(saga_id).await
                && saga.status().is_terminal()
            {
                return saga;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("saga {saga_id} never reached a terminal status");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_saga_is_compensated_in_background() {
        let (orchestrator, monitor) = orchestrator(3);
        let log = Log::default();
        let slow = FnStep::local("slow", |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(SagaContext::new())
        });
        let definition = SagaDefinition::builder("dropped")
            .step(scripted("create", StepKind::Local, &log, false, false))
            .step(slow)
            .build();

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.execute_saga(&definition, SagaContext::new()),
        )
        .await;
        assert!(abandoned.is_err());

        // The slow step is still running, so the saga is still active here.
        let saga_id = orchestrator.registry().list_active().await[0].id();
        let saga = wait_until_finished(&orchestrator, saga_id).await;

        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.failed_step(), Some("slow"));
        assert_eq!(saga.compensations().len(), 1);
        assert_eq!(entries(&log), vec!["forward:create", "compensate:create:1"]);
        assert_eq!(orchestrator.registry().metrics().await.active, 0);
        assert_eq!(monitor.summary().sagas_failed, 1);

        // Finished, so it ages out of the registry like any other saga.
        tokio::time::advance(Duration::from_secs(2 * 3600)).await;
        assert_eq!(orchestrator.registry().evict_expired().await, 1);
        assert!(orchestrator.get_saga(saga_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_compensation_survives_caller_drop() {
        let (orchestrator, _) = orchestrator(3);
        let log = Log::default();
        let undo_log = log.clone();
        let reserve = FnStep::local("reserve", |_| async {
            Ok(SagaContext::new().with("reserved", true))
        })
        .compensate_with(move |_| {
            let log = undo_log.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                log.lock().unwrap().push("compensate:reserve".to_string());
                Ok(())
            }
        });
        let definition = SagaDefinition::builder("undo_in_flight")
            .step(reserve)
            .step(scripted("charge", StepKind::Local, &log, true, false))
            .build();

        // The caller gives up while the compensation is still sleeping.
        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            orchestrator.execute_saga(&definition, SagaContext::new()),
        )
        .await;
        assert!(abandoned.is_err());

        let saga_id = orchestrator.registry().list_active().await[0].id();
        let saga = wait_until_finished(&orchestrator, saga_id).await;
        assert_eq!(saga.status(), SagaStatus::Compensated);
        assert_eq!(saga.failed_step(), Some("charge"));
        assert_eq!(entries(&log), vec!["forward:charge", "compensate:reserve"]);
    }
}
