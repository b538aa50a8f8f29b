//! The run driver.
//!
//! Each submitted run gets one driver task that walks the phases of its
//! pipeline. Run state lives behind a per-run mutex; the status is mirrored
//! into a watch channel so callers can await settlement without polling.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::{
    decide, AgentSpan, ApprovalRecord, Decision, EvaluationReport, OrchestratorConfig, PauseReason, Phase,
    PipelineSet, RetryConfig, RetryState, Run, RunOutcome, RunRequest, RunStatus, SpanKind, StageStep,
};
use crate::agents::{AgentResult, AgentRole};
use crate::canary::{CanaryManager, CompletionRecord};
use crate::classifier::{FailureClassifier, FailureSignal};
use crate::errors::RunError;
use crate::events::{types, Event, EventSink, NoOpEventSink};
use crate::executor::{DistributedExecutor, TaskFailure, TaskRequest, TaskStatus};
use crate::observability::{RunSpanAttributes, SpanTimer, StepSpanAttributes};

#[derive(Debug)]
struct RunHandle {
    run: Mutex<Run>,
    status: watch::Sender<RunStatus>,
}

impl RunHandle {
    fn snapshot(&self) -> Run {
        self.run.lock().clone()
    }
}

/// One finished step attempt, as recorded on the run.
struct StepRecord<'a> {
    step: &'a StageStep,
    attempt: u32,
    started_at: DateTime<Utc>,
    input: serde_json::Value,
    result: Option<&'a AgentResult>,
    failure: Option<&'a TaskFailure>,
}

enum PhaseOutcome {
    Completed,
    Restart { phase: Phase, reason: String },
    Paused,
    Escalated(RunError),
}

/// Drives runs through their pipeline.
///
/// ```rust,ignore
/// let orchestrator = Arc::new(RunOrchestrator::new(executor, canary));
/// let run_id = orchestrator.submit_run(RunRequest::new("acme", "build a todo app"));
/// let run = orchestrator.wait_for_settled(run_id).await?;
/// ```
#[derive(Debug)]
pub struct RunOrchestrator {
    config: OrchestratorConfig,
    retry: RetryConfig,
    classifier: FailureClassifier,
    canary: Arc<CanaryManager>,
    executor: Arc<DistributedExecutor>,
    pipelines: PipelineSet,
    events: Arc<dyn EventSink>,
    runs: DashMap<Uuid, Arc<RunHandle>>,
}

impl RunOrchestrator {
    /// Creates an orchestrator with default configuration.
    #[must_use]
    pub fn new(executor: Arc<DistributedExecutor>, canary: Arc<CanaryManager>) -> Self {
        Self {
            config: OrchestratorConfig::default(),
            retry: RetryConfig::default(),
            classifier: FailureClassifier::default(),
            canary,
            executor,
            pipelines: PipelineSet::default(),
            events: Arc::new(NoOpEventSink),
            runs: DashMap::new(),
        }
    }

    /// Sets the orchestrator configuration.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the in-place retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the failure classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sets the pipelines run for each cohort.
    #[must_use]
    pub fn with_pipelines(mut self, pipelines: PipelineSet) -> Self {
        self.pipelines = pipelines;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The canary manager runs are assigned by.
    #[must_use]
    pub fn canary(&self) -> &Arc<CanaryManager> {
        &self.canary
    }

    /// The executor steps run on.
    #[must_use]
    pub fn executor(&self) -> &Arc<DistributedExecutor> {
        &self.executor
    }

    /// The orchestrator configuration.
    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Accepts a run and starts driving it in the background.
    ///
    /// The cohort is assigned here, once; the run executes that cohort's
    /// pipeline for its whole life.
    pub fn submit_run(self: &Arc<Self>, request: RunRequest) -> Uuid {
        let run_id = Uuid::new_v4();
        let version = self.canary.assign(run_id, &request.tenant_id);
        let limits = request
            .limits
            .clone()
            .unwrap_or_else(|| self.config.default_limits.clone());
        let run = Run::new(run_id, request, limits, version);
        let attributes = RunSpanAttributes::new(run_id, run.tenant_id.clone(), version);

        info!(
            run_id = %run_id,
            tenant_id = %run.tenant_id,
            pipeline_version = %version,
            "Run submitted"
        );
        self.events.try_emit(
            Event::new(types::RUN_SUBMITTED)
                .with_run(run_id)
                .with_data(json!({
                    "tenant_id": run.tenant_id,
                    "goal": run.goal,
                    "pipeline_version": version,
                })),
        );

        let (status, _) = watch::channel(RunStatus::Pending);
        let handle = Arc::new(RunHandle {
            run: Mutex::new(run),
            status,
        });
        self.runs.insert(run_id, Arc::clone(&handle));

        let this = Arc::clone(self);
        tokio::spawn(
            async move {
                if this.begin(&handle) {
                    this.drive(&handle, Phase::Planning).await;
                }
            }
            .instrument(attributes.span()),
        );
        run_id
    }

    /// Resolves a paused run.
    ///
    /// A final review approval succeeds the run and a rejection rolls it
    /// back. A security approval re-plans in a new iteration and a rejection
    /// fails the run. Only the first decision on a pause is accepted.
    pub fn approve_run(
        self: &Arc<Self>,
        run_id: Uuid,
        approved: bool,
        comments: Option<String>,
    ) -> Result<Run, RunError> {
        let handle = self.handle(run_id)?;

        let pause = {
            let mut run = handle.run.lock();
            let pause = match (run.status, run.pause) {
                (RunStatus::AwaitingApproval, Some(pause)) => pause,
                (status, _) => {
                    return Err(RunError::NotAwaitingApproval {
                        run_id,
                        status: status.to_string(),
                    })
                }
            };
            run.pause = None;
            run.approvals.push(ApprovalRecord {
                reason: pause,
                approved,
                comments: comments.clone(),
                decided_at: Utc::now(),
            });
            if pause == PauseReason::FinalReview && !approved {
                run.rollback_count += 1;
            }
            pause
        };

        info!(run_id = %run_id, ?pause, approved, "Approval decision recorded");

        match (pause, approved) {
            (PauseReason::FinalReview, true) => self.succeed(&handle),
            (PauseReason::FinalReview, false) => {
                let reason = comments.unwrap_or_else(|| "Rejected at final review".to_string());
                self.complete(&handle, RunStatus::RolledBack, reason.clone(), None, |_| {
                    RunOutcome::RolledBack { reason }
                });
            }
            (PauseReason::Security, true) => {
                if self.start_iteration(&handle, Phase::Planning, "security finding approved") {
                    let this = Arc::clone(self);
                    let handle = Arc::clone(&handle);
                    let span = {
                        let run = handle.run.lock();
                        RunSpanAttributes::new(run.id, run.tenant_id.clone(), run.pipeline_version).span()
                    };
                    tokio::spawn(
                        async move { this.drive(&handle, Phase::Planning).await }.instrument(span),
                    );
                }
            }
            (PauseReason::Security, false) => {
                self.fail(&handle, "Security finding rejected by reviewer".to_string(), None);
            }
        }

        Ok(handle.snapshot())
    }

    /// Returns a snapshot of a run.
    pub fn get_run_status(&self, run_id: Uuid) -> Result<Run, RunError> {
        self.handle(run_id).map(|handle| handle.snapshot())
    }

    /// Returns snapshots of every known run.
    #[must_use]
    pub fn list_runs(&self) -> Vec<Run> {
        self.runs.iter().map(|entry| entry.value().snapshot()).collect()
    }

    /// Number of known runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Waits until a run is terminal or awaiting approval.
    pub async fn wait_for_settled(&self, run_id: Uuid) -> Result<Run, RunError> {
        let handle = self.handle(run_id)?;
        let mut status = handle.status.subscribe();
        loop {
            if status.borrow_and_update().is_settled() {
                break;
            }
            if status.changed().await.is_err() {
                break;
            }
        }
        Ok(handle.snapshot())
    }

    fn handle(&self, run_id: Uuid) -> Result<Arc<RunHandle>, RunError> {
        self.runs
            .get(&run_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RunError::NotFound { run_id })
    }

    fn emit(&self, run_id: Uuid, event_type: &str, data: serde_json::Value) {
        self.events
            .try_emit(Event::new(event_type).with_run(run_id).with_data(data));
    }

    fn begin(&self, handle: &RunHandle) -> bool {
        {
            let mut run = handle.run.lock();
            run.iteration = 1;
            run.started_at = Some(Utc::now());
        }
        self.transition(handle, RunStatus::Planning, "run started").is_ok()
    }

    async fn drive(&self, handle: &RunHandle, mut phase: Phase) {
        loop {
            match self.run_phase(handle, phase).await {
                PhaseOutcome::Completed => match phase.next() {
                    Some(next) => {
                        if self
                            .transition(handle, next.into(), format!("{phase} completed"))
                            .is_err()
                        {
                            return;
                        }
                        phase = next;
                    }
                    None => {
                        self.finish_evaluation(handle);
                        return;
                    }
                },
                PhaseOutcome::Restart { phase: restart, reason } => {
                    if !self.start_iteration(handle, restart, reason) {
                        return;
                    }
                    phase = restart;
                }
                PhaseOutcome::Paused => return,
                PhaseOutcome::Escalated(err) => {
                    warn!(error = %err, "Run escalated");
                    self.fail(handle, err.to_string(), Some(&err));
                    return;
                }
            }
        }
    }

    async fn run_phase(&self, handle: &RunHandle, phase: Phase) -> PhaseOutcome {
        let (version, review) = {
            let run = handle.run.lock();
            (run.pipeline_version, run.review.clone())
        };
        let steps = self.pipelines.get(version).steps(phase).to_vec();

        for step in &steps {
            let mut retry = RetryState::new();
            loop {
                let limits = check_limits(&handle.run.lock());
                if let Err(err) = limits {
                    return PhaseOutcome::Escalated(err);
                }

                let attempt = retry.attempt;
                let (iteration, input) = step_input(&handle.run.lock(), step, phase);
                let started_at = Utc::now();
                let timer = SpanTimer::start(step.step_id.clone());

                let (result, failure) = match self.execute_step(handle, step, input.clone()).await {
                    Ok(Ok(result)) => {
                        let failure = reported_failure(&result);
                        (Some(result), failure)
                    }
                    Ok(Err(failure)) => (None, Some(failure)),
                    Err(err) => return PhaseOutcome::Escalated(err),
                };

                let duration_ms = timer.finish();
                let attributes = StepSpanAttributes::new(step.step_id.clone(), iteration, attempt)
                    .with_status(if failure.is_none() { "ok" } else { "error" })
                    .with_duration_ms(duration_ms);
                debug!(attributes = ?attributes.to_otel_attributes(), "Step attempt finished");

                self.record_step(
                    handle,
                    StepRecord {
                        step,
                        attempt,
                        started_at,
                        input,
                        result: result.as_ref(),
                        failure: failure.as_ref(),
                    },
                );

                let Some(failure) = failure else {
                    let limits = check_limits(&handle.run.lock());
                    if let Err(err) = limits {
                        return PhaseOutcome::Escalated(err);
                    }
                    break;
                };

                let signal = self.classify(handle, step, &failure);
                match decide(&signal, &mut retry, &self.retry, &review) {
                    Decision::RetryStep { delay } => {
                        let budget = retry_budget(&handle.run.lock(), delay);
                        if let Err(err) = budget {
                            return PhaseOutcome::Escalated(err);
                        }
                        let run_id = {
                            let mut run = handle.run.lock();
                            run.retry_count += 1;
                            run.id
                        };
                        debug!(
                            step_id = %step.step_id,
                            attempt = retry.attempt,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "Retrying step"
                        );
                        self.emit(
                            run_id,
                            types::RUN_RETRY_SCHEDULED,
                            json!({
                                "step_id": step.step_id,
                                "attempt": retry.attempt,
                                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "failure_type": signal.failure_type,
                            }),
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Decision::Restart { phase: restart } => {
                        return PhaseOutcome::Restart {
                            phase: restart,
                            reason: format!("{} failure in {}", signal.failure_type, step.step_id),
                        };
                    }
                    Decision::AwaitApproval => {
                        self.pause(
                            handle,
                            PauseReason::Security,
                            format!("security finding in {}", step.step_id),
                        );
                        return PhaseOutcome::Paused;
                    }
                }
            }
        }

        PhaseOutcome::Completed
    }

    /// Runs one attempt of a step on the pool.
    ///
    /// The outer error escalates the run; the inner one is a step failure to
    /// classify. A wait that outlives the task timeout plus one lease TTL is
    /// cancelled and reported as a timeout.
    async fn execute_step(
        &self,
        handle: &RunHandle,
        step: &StageStep,
        input: serde_json::Value,
    ) -> Result<Result<AgentResult, TaskFailure>, RunError> {
        let (run_id, timeout) = {
            let run = handle.run.lock();
            (run.id, run.limits.task_timeout())
        };
        let pool = self.executor.pool();

        if !pool.has_live_worker(step.queue_class) {
            return Err(RunError::PoolExhausted {
                reason: format!("no live {} workers for {}", step.queue_class, step.step_id),
            });
        }

        let task_id = pool.submit(
            TaskRequest::new(run_id, step.step_id.clone(), step.queue_class)
                .with_payload(step.payload(input))
                .with_timeout(timeout),
        );
        let deadline = timeout + Duration::from_millis(pool.config().lease_ttl_ms) + Duration::from_secs(1);

        let waited = tokio::time::timeout(deadline, pool.wait_for_task(task_id)).await;
        let outcome = match waited {
            Ok(Ok(task)) if task.status == TaskStatus::Completed => Ok(Ok(task.result.unwrap_or_default())),
            Ok(Ok(task)) => Ok(Err(task
                .error
                .unwrap_or_else(|| TaskFailure::new("Task failed without details", "")))),
            Ok(Err(err)) => Err(RunError::PoolExhausted {
                reason: err.to_string(),
            }),
            Err(_) => {
                warn!(task_id = %task_id, step_id = %step.step_id, "Task wait timed out, cancelling");
                if let Err(err) = pool.cancel_task(task_id, "wait deadline exceeded") {
                    debug!(task_id = %task_id, error = %err, "Cancel after timeout failed");
                }
                Ok(Err(TaskFailure::new(
                    format!("{} did not finish within {}s", step.step_id, deadline.as_secs()),
                    format!("TimeoutError: {} timed out waiting for a result", step.step_id),
                )))
            }
        };
        pool.forget_task(task_id);
        outcome
    }

    fn record_step(&self, handle: &RunHandle, record: StepRecord<'_>) {
        let StepRecord {
            step,
            attempt,
            started_at,
            input,
            result,
            failure,
        } = record;

        let mut run = handle.run.lock();
        if let Some(result) = result {
            run.tokens_used += result.tokens_used;
            run.cache_hits += result.cache_hits;
            run.cost_usd += result.cost_usd;
            if failure.is_none() {
                run.outputs.insert(step.step_id.clone(), result.output.clone());
            }
        }
        let kind = SpanKind::Step {
            step_id: step.step_id.clone(),
            role: step.role,
            attempt,
            success: failure.is_none(),
            tokens_used: result.map_or(0, |r| r.tokens_used),
            cost_usd: result.map_or(0.0, |r| r.cost_usd),
            cache_hits: result.map_or(0, |r| r.cache_hits),
            input,
            output: result.map(|r| r.output.clone()),
            error: failure.map(|f| f.message.clone()),
        };
        let span = AgentSpan::new(run.id, run.iteration, kind, started_at);
        run.spans.push(span);
    }

    fn classify(&self, handle: &RunHandle, step: &StageStep, failure: &TaskFailure) -> FailureSignal {
        let text = if failure.logs.trim().is_empty() {
            failure.message.as_str()
        } else {
            failure.logs.as_str()
        };

        let (run_id, signal) = {
            let mut run = handle.run.lock();
            let signal = self.classifier.classify(&step.step_id, text, &run.failure_signals);
            run.failure_signals.push(signal.clone());
            (run.id, signal)
        };

        info!(
            step_id = %step.step_id,
            failure_type = %signal.failure_type,
            confidence = signal.confidence(),
            synthetic = signal.synthetic,
            "Step failure classified"
        );
        self.emit(
            run_id,
            types::RUN_FAILURE_CLASSIFIED,
            serde_json::to_value(&signal).unwrap_or_default(),
        );
        signal
    }

    /// Opens the next iteration at `phase`, or fails the run when the budget
    /// is spent. Returns false when the run did not continue.
    fn start_iteration(&self, handle: &RunHandle, phase: Phase, reason: impl Into<String>) -> bool {
        let spent = {
            let mut run = handle.run.lock();
            if run.iteration >= self.config.max_iterations {
                Some(run.iteration)
            } else {
                run.iteration += 1;
                run.replan_count += 1;
                None
            }
        };
        if let Some(iterations) = spent {
            let err = RunError::IterationBudgetExhausted { iterations };
            self.fail(handle, err.to_string(), Some(&err));
            return false;
        }
        self.transition(handle, phase.into(), reason).is_ok()
    }

    fn pause(&self, handle: &RunHandle, reason: PauseReason, why: String) {
        handle.run.lock().pause = Some(reason);
        if self.transition(handle, RunStatus::AwaitingApproval, why).is_err() {
            handle.run.lock().pause = None;
        }
    }

    fn finish_evaluation(&self, handle: &RunHandle) {
        let require_approval = handle.run.lock().review.require_approval;
        if require_approval {
            self.pause(handle, PauseReason::FinalReview, "evaluation passed".to_string());
        } else {
            self.succeed(handle);
        }
    }

    fn succeed(&self, handle: &RunHandle) {
        self.complete(handle, RunStatus::Succeeded, "pipeline completed", None, |run| {
            self.success_outcome(run)
        });
    }

    fn fail(&self, handle: &RunHandle, reason: String, error: Option<&RunError>) {
        self.complete(handle, RunStatus::Failed, reason.clone(), error, |run| RunOutcome::Failed {
            reason,
            failure_chain: run.failure_signals.clone(),
        });
    }

    fn success_outcome(&self, run: &Run) -> RunOutcome {
        let pipeline = self.pipelines.get(run.pipeline_version);
        let output_of = |role: AgentRole| {
            pipeline
                .planning
                .iter()
                .chain(&pipeline.generating)
                .chain(&pipeline.evaluating)
                .find(|step| step.role == role)
                .and_then(|step| run.outputs.get(&step.step_id))
        };

        let artifacts = output_of(AgentRole::CodegenEngineer)
            .and_then(|output| output.get("artifacts"))
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let report = EvaluationReport::from_output(
            output_of(AgentRole::QaEvaluator).unwrap_or(&serde_json::Value::Null),
        );
        RunOutcome::Succeeded { artifacts, report }
    }

    /// Moves the run to a terminal status and reports it to the canary.
    ///
    /// The state machine rejects a second terminal transition, so each run
    /// completes at most once. Waiters wake only after the canary record and
    /// the completion event are out.
    fn complete(
        &self,
        handle: &RunHandle,
        status: RunStatus,
        reason: impl Into<String>,
        error: Option<&RunError>,
        outcome: impl FnOnce(&Run) -> RunOutcome,
    ) {
        let mut record = None;
        let applied = self.transition_with(handle, status, reason, |run| {
            run.ended_at = Some(Utc::now());
            run.pause = None;
            run.outcome = Some(outcome(&*run));
            record = Some(
                CompletionRecord {
                    success: status == RunStatus::Succeeded,
                    metrics: Default::default(),
                    cost_usd: run.cost_usd,
                    duration_seconds: run.elapsed().as_secs_f64(),
                    retry_count: run.retry_count,
                    replan_count: run.replan_count,
                    rollback_count: run.rollback_count,
                }
                .with_metric("iterations", json!(run.iteration))
                .with_metric("tokens_used", json!(run.tokens_used))
                .with_metric("cache_hits", json!(run.cache_hits)),
            );
        });
        if applied.is_err() {
            return;
        }

        let snapshot = handle.snapshot();
        if let Some(record) = record {
            if let Err(err) = self.canary.record_completion(snapshot.id, record) {
                warn!(run_id = %snapshot.id, error = %err, "Canary completion not recorded");
            }
        }

        info!(
            run_id = %snapshot.id,
            status = %status,
            iterations = snapshot.iteration,
            cost_usd = snapshot.cost_usd,
            tokens_used = snapshot.tokens_used,
            "Run completed"
        );
        self.emit(
            snapshot.id,
            types::RUN_COMPLETED,
            json!({
                "status": status,
                "iterations": snapshot.iteration,
                "cost_usd": snapshot.cost_usd,
                "tokens_used": snapshot.tokens_used,
                "retry_count": snapshot.retry_count,
                "replan_count": snapshot.replan_count,
                "rollback_count": snapshot.rollback_count,
                "outcome": snapshot.outcome,
                "error": error.map(RunError::to_dict),
            }),
        );
        handle.status.send_replace(status);
    }

    fn transition(&self, handle: &RunHandle, to: RunStatus, reason: impl Into<String>) -> Result<(), RunError> {
        self.transition_with(handle, to, reason, |_| {})?;
        handle.status.send_replace(to);
        Ok(())
    }

    /// Validates and applies a status change. `apply` runs under the same
    /// lock. Waiters are not woken; the caller broadcasts once its own
    /// bookkeeping is done.
    fn transition_with(
        &self,
        handle: &RunHandle,
        to: RunStatus,
        reason: impl Into<String>,
        apply: impl FnOnce(&mut Run),
    ) -> Result<(), RunError> {
        let reason = reason.into();
        let (run_id, from, iteration) = {
            let mut run = handle.run.lock();
            let from = run.status;
            if !from.can_transition_to(to) {
                warn!(run_id = %run.id, %from, %to, "Rejected status change");
                return Err(RunError::InvalidTransition {
                    run_id: run.id,
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            run.status = to;
            let span = AgentSpan::transition(run.id, run.iteration, from, to, reason.clone());
            run.spans.push(span);
            apply(&mut *run);
            (run.id, from, run.iteration)
        };

        info!(run_id = %run_id, %from, %to, iteration, reason = %reason, "Run transition");
        self.emit(
            run_id,
            types::RUN_TRANSITION,
            json!({
                "from": from,
                "to": to,
                "iteration": iteration,
                "reason": reason,
            }),
        );
        Ok(())
    }
}

fn check_limits(run: &Run) -> Result<(), RunError> {
    if run.cost_usd > run.limits.max_cost_usd {
        return Err(RunError::limit_exceeded(
            "max_cost_usd",
            run.cost_usd,
            run.limits.max_cost_usd,
        ));
    }
    if run.tokens_used > run.limits.max_tokens {
        return Err(RunError::limit_exceeded(
            "max_tokens",
            run.tokens_used as f64,
            run.limits.max_tokens as f64,
        ));
    }
    let elapsed = run.elapsed();
    if elapsed > run.limits.max_duration() {
        return Err(RunError::limit_exceeded(
            "max_duration_secs",
            elapsed.as_secs_f64(),
            run.limits.max_duration_secs as f64,
        ));
    }
    Ok(())
}

/// Rejects a retry whose delay would outlast the run's wall-clock limit.
fn retry_budget(run: &Run, delay: Duration) -> Result<(), RunError> {
    let resumes_at = run.elapsed().saturating_add(delay);
    if resumes_at > run.limits.max_duration() {
        return Err(RunError::limit_exceeded(
            "max_duration_secs",
            resumes_at.as_secs_f64(),
            run.limits.max_duration_secs as f64,
        ));
    }
    Ok(())
}

fn step_input(run: &Run, step: &StageStep, phase: Phase) -> (u32, serde_json::Value) {
    let feedback = run.failure_signals.last().map(|signal| {
        json!({
            "failure_type": signal.failure_type,
            "source": signal.source,
            "message": signal.message,
        })
    });
    let input = json!({
        "goal": run.goal,
        "iteration": run.iteration,
        "phase": phase,
        "step_id": step.step_id,
        "pipeline_version": run.pipeline_version,
        "context": run.outputs,
        "feedback": feedback,
    });
    (run.iteration, input)
}

/// An agent that returns `"passed": false` has failed its step even though
/// the invocation itself succeeded.
fn reported_failure(result: &AgentResult) -> Option<TaskFailure> {
    if result.output.get("passed").and_then(serde_json::Value::as_bool) != Some(false) {
        return None;
    }
    let logs = if result.logs.is_empty() {
        result.output.to_string()
    } else {
        result.logs.clone()
    };
    Some(TaskFailure::new("Step reported passed=false", logs))
}
