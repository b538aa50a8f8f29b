//! Worker loops and the lease reaper.

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{QueueClass, Task, TaskFailure, TaskRequest, WorkerPool};
use crate::agents::{AgentRegistry, AgentResult};
use crate::cancellation::CancellationToken;
use crate::errors::PoolError;
use crate::events::{types, Event, EventSink, NoOpEventSink};

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
struct WorkerContext {
    pool: Arc<WorkerPool>,
    agents: Arc<AgentRegistry>,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
    default_timeout: Duration,
}

/// Runs worker loops against a shared [`WorkerPool`].
///
/// Each spawned worker registers with the pool, holds a lease renewed by
/// heartbeats, and executes tasks through the [`AgentRegistry`]. Idle
/// workers sleep on the pool's per-class notifier instead of spinning.
#[derive(Debug)]
pub struct DistributedExecutor {
    ctx: WorkerContext,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_worker: AtomicUsize,
}

impl DistributedExecutor {
    /// Creates an executor. No workers run until [`Self::spawn_workers`].
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, agents: Arc<AgentRegistry>) -> Self {
        Self {
            ctx: WorkerContext {
                pool,
                agents,
                events: Arc::new(NoOpEventSink),
                shutdown: CancellationToken::new(),
                default_timeout: DEFAULT_TASK_TIMEOUT,
            },
            handles: Mutex::new(Vec::new()),
            next_worker: AtomicUsize::new(0),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.ctx.events = events;
        self
    }

    /// Sets the timeout for tasks that carry none.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.default_timeout = timeout;
        self
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.ctx.pool
    }

    /// The agent registry.
    #[must_use]
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.ctx.agents
    }

    /// Returns true once shutdown started.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.ctx.shutdown.is_cancelled()
    }

    /// Registers and starts up to `count` workers for a class.
    ///
    /// Stops early when the pool refuses a registration. Returns the ids of
    /// the started workers.
    pub fn spawn_workers(&self, queue_class: QueueClass, count: usize) -> Vec<String> {
        let mut started = Vec::with_capacity(count);
        let mut handles = self.handles.lock();

        for _ in 0..count {
            let n = self.next_worker.fetch_add(1, Ordering::Relaxed);
            let worker_id = format!("{queue_class}-worker-{n}");
            if !self.ctx.pool.register_worker(worker_id.clone(), queue_class) {
                break;
            }
            self.ctx.pool.acquire_lease(&worker_id);

            let ctx = self.ctx.clone();
            let id = worker_id.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(ctx, id, queue_class).await;
            }));
            started.push(worker_id);
        }

        info!(%queue_class, requested = count, started = started.len(), "Workers spawned");
        started
    }

    /// Starts the periodic lease sweep.
    pub fn start_reaper(&self) {
        let ctx = self.ctx.clone();
        self.handles.lock().push(tokio::spawn(async move {
            reaper_loop(ctx).await;
        }));
    }

    /// Submits a task and waits for its terminal state.
    ///
    /// Fails fast if no live worker serves the task's class.
    pub async fn execute(&self, request: TaskRequest) -> Result<Task, PoolError> {
        if !self.ctx.pool.has_live_worker(request.queue_class) {
            return Err(PoolError::NoWorkers {
                queue_class: request.queue_class,
            });
        }
        let task_id = self.ctx.pool.submit(request);
        let task = self.ctx.pool.wait_for_task(task_id).await?;
        self.ctx.pool.forget_task(task_id);
        Ok(task)
    }

    /// Stops all loops and waits for them to exit.
    ///
    /// Workers finish their current task first, then unregister.
    pub async fn shutdown(&self) {
        if !self.ctx.shutdown.cancel("executor shutdown") {
            return;
        }
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        let count = handles.len();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Executor loop ended abnormally");
            }
        }
        info!(loops = count, "Executor shut down");
    }
}

async fn worker_loop(ctx: WorkerContext, worker_id: String, queue_class: QueueClass) {
    let idle_poll = ctx.pool.config().idle_poll();
    let mut heartbeat = tokio::time::interval(ctx.pool.config().heartbeat_interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if ctx.shutdown.is_cancelled() {
            break;
        }

        match ctx.pool.get_next_task(&worker_id) {
            Ok(Some(task)) => run_task(&ctx, &worker_id, task).await,
            Ok(None) => {
                tokio::select! {
                    () = ctx.shutdown.cancelled() => break,
                    () = ctx.pool.wait_for_work(queue_class, idle_poll) => {}
                    _ = heartbeat.tick() => {
                        if !ctx.pool.heartbeat(&worker_id) && !rejoin(&ctx, &worker_id, queue_class) {
                            return;
                        }
                    }
                }
            }
            Err(PoolError::UnknownWorker { .. } | PoolError::WorkerDead { .. }) => {
                if !rejoin(&ctx, &worker_id, queue_class) {
                    return;
                }
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "Worker stopping");
                return;
            }
        }
    }

    if let Err(e) = ctx.pool.unregister_worker(&worker_id) {
        debug!(worker_id = %worker_id, error = %e, "Worker already gone at shutdown");
    }
}

/// Registers an evicted worker again under its old id.
///
/// Returns false if the pool has no room for it, in which case the loop
/// ends.
fn rejoin(ctx: &WorkerContext, worker_id: &str, queue_class: QueueClass) -> bool {
    if ctx.shutdown.is_cancelled() {
        return false;
    }
    if !ctx.pool.register_worker(worker_id, queue_class) {
        warn!(worker_id, %queue_class, "Evicted worker could not rejoin, stopping");
        return false;
    }
    ctx.pool.acquire_lease(worker_id);
    info!(worker_id, %queue_class, "Evicted worker rejoined the pool");
    ctx.events.try_emit(
        Event::new(types::WORKER_REJOINED).with_data(serde_json::json!({ "worker_id": worker_id })),
    );
    true
}

async fn run_task(ctx: &WorkerContext, worker_id: &str, task: Task) {
    let task_id = task.id;
    let timeout = task.timeout.unwrap_or(ctx.default_timeout);
    let execution = invoke(ctx, &task, timeout);
    tokio::pin!(execution);

    let mut heartbeat = tokio::time::interval(ctx.pool.config().heartbeat_interval());
    heartbeat.tick().await;

    let outcome = loop {
        tokio::select! {
            outcome = &mut execution => break outcome,
            _ = heartbeat.tick() => {
                if !ctx.pool.heartbeat(worker_id) {
                    warn!(worker_id, %task_id, "Heartbeat rejected, lease lost");
                }
            }
        }
    };

    if let Err(e) = ctx.pool.complete_task(worker_id, task_id, outcome) {
        warn!(worker_id, %task_id, error = %e, "Completion rejected");
    }
}

async fn invoke(
    ctx: &WorkerContext,
    task: &Task,
    timeout: Duration,
) -> Result<AgentResult, TaskFailure> {
    let Some(payload) = task.payload.as_ref() else {
        return Ok(AgentResult::default());
    };

    let agent = ctx
        .agents
        .get(payload.role)
        .map_err(|e| TaskFailure::new(e.to_string(), e.logs()))?;

    let call = AssertUnwindSafe(agent.execute(&payload.action, payload.input.clone())).catch_unwind();
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(e))) => Err(TaskFailure::new(e.to_string(), e.logs())),
        Ok(Err(_)) => Err(TaskFailure::new(
            format!("Agent {} panicked during {}", payload.role, payload.action),
            "agent panicked",
        )),
        Err(_) => Err(TaskFailure::new(
            format!("Task {} timed out after {}s", task.step_id, timeout.as_secs_f64()),
            format!("TimeoutError: {} timed out after {}s", task.step_id, timeout.as_secs_f64()),
        )),
    }
}

async fn reaper_loop(ctx: WorkerContext) {
    let mut interval = tokio::time::interval(ctx.pool.config().reap_interval());

    loop {
        tokio::select! {
            () = ctx.shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        let report = ctx.pool.reap_expired_leases();
        for worker_id in &report.evicted_workers {
            ctx.events.try_emit(
                Event::new(types::WORKER_EVICTED).with_data(serde_json::json!({ "worker_id": worker_id })),
            );
        }
        for task_id in &report.requeued_tasks {
            let run_id = ctx.pool.get_task(*task_id).map(|t| t.run_id);
            let mut event =
                Event::new(types::TASK_REQUEUED).with_data(serde_json::json!({ "task_id": task_id }));
            if let Some(run_id) = run_id {
                event = event.with_run(run_id);
            }
            ctx.events.try_emit(event);
        }
    }
}
