//! Queue-class based task scheduling with lease liveness.
//!
//! All task and worker bookkeeping lives behind one mutex so that dispatch,
//! completion, cancellation and lease expiry are linearizable: a task can
//! never be handed to two workers, and a requeue happens at most once per
//! lost assignment.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::stats::{ClassQueueStats, QueueStats, WorkerStats};
use super::{QueueClass, Task, TaskFailure, TaskRequest, TaskStatus, Worker, WorkerStatus};
use crate::agents::AgentResult;
use crate::errors::PoolError;

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum registered workers across classes.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum workers serving the cpu class.
    #[serde(default = "default_class_capacity")]
    pub cpu_capacity: usize,
    /// Maximum workers serving the io class.
    #[serde(default = "default_class_capacity")]
    pub io_capacity: usize,
    /// Lease time-to-live in milliseconds.
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    /// How often the reaper checks leases, in milliseconds.
    #[serde(default = "default_reap_interval_ms")]
    pub reap_interval_ms: u64,
    /// How often workers heartbeat, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Longest an idle worker sleeps before re-checking, in milliseconds.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_max_workers() -> usize {
    16
}

fn default_class_capacity() -> usize {
    8
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_reap_interval_ms() -> u64 {
    1_000
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_idle_poll_ms() -> u64 {
    250
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            cpu_capacity: default_class_capacity(),
            io_capacity: default_class_capacity(),
            lease_ttl_ms: default_lease_ttl_ms(),
            reap_interval_ms: default_reap_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

impl PoolConfig {
    /// Sets the global worker limit.
    #[must_use]
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Sets the worker limit for a class.
    #[must_use]
    pub fn with_capacity(mut self, queue_class: QueueClass, capacity: usize) -> Self {
        match queue_class {
            QueueClass::Cpu => self.cpu_capacity = capacity,
            QueueClass::Io => self.io_capacity = capacity,
        }
        self
    }

    /// Sets the lease TTL.
    #[must_use]
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the reaper interval.
    #[must_use]
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Sets the idle poll ceiling.
    #[must_use]
    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll_ms = u64::try_from(idle_poll.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Worker limit for a class.
    #[must_use]
    pub fn capacity(&self, queue_class: QueueClass) -> usize {
        match queue_class {
            QueueClass::Cpu => self.cpu_capacity,
            QueueClass::Io => self.io_capacity,
        }
    }

    /// Lease TTL as a chrono duration.
    #[must_use]
    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.lease_ttl_ms).unwrap_or(i64::MAX))
    }

    /// Heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Reaper interval.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    /// Idle poll ceiling.
    #[must_use]
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

/// Result of a lease sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Workers declared dead and evicted.
    pub evicted_workers: Vec<String>,
    /// Tasks returned to pending.
    pub requeued_tasks: Vec<Uuid>,
}

impl ReapReport {
    /// Returns true if nothing was reaped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.evicted_workers.is_empty() && self.requeued_tasks.is_empty()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    workers: HashMap<String, Worker>,
    tasks: HashMap<Uuid, Task>,
    pending: HashMap<QueueClass, VecDeque<Uuid>>,
    waiters: HashMap<Uuid, Vec<oneshot::Sender<Task>>>,
    completed: u64,
    failed: u64,
    requeued: u64,
}

impl PoolState {
    fn class_worker_count(&self, queue_class: QueueClass) -> usize {
        self.workers
            .values()
            .filter(|w| w.queue_class == queue_class && w.status != WorkerStatus::Dead)
            .count()
    }

    fn requeue(&mut self, task_id: Uuid, worker_id: &str) -> bool {
        let Some(task) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if task.status != TaskStatus::Running || task.assigned_worker.as_deref() != Some(worker_id) {
            return false;
        }
        task.status = TaskStatus::Pending;
        task.assigned_worker = None;
        task.started_at = None;
        let queue_class = task.queue_class;
        self.pending.entry(queue_class).or_default().push_front(task_id);
        self.requeued += 1;
        true
    }

    fn finish(
        &mut self,
        task_id: Uuid,
        outcome: Result<AgentResult, TaskFailure>,
        now: DateTime<Utc>,
    ) -> Option<(Task, Vec<oneshot::Sender<Task>>)> {
        let task = self.tasks.get_mut(&task_id)?;
        match outcome {
            Ok(result) => {
                task.status = TaskStatus::Completed;
                task.result = Some(result);
                self.completed += 1;
            }
            Err(failure) => {
                task.status = TaskStatus::Failed;
                task.error = Some(failure);
                self.failed += 1;
            }
        }
        task.completed_at = Some(now);
        task.payload = None;
        let snapshot = task.clone();
        let waiters = self.waiters.remove(&task_id).unwrap_or_default();
        Some((snapshot, waiters))
    }

    fn release_worker(&mut self, worker_id: &str, processed: bool) {
        if let Some(worker) = self.workers.get_mut(worker_id) {
            worker.current_task = None;
            if processed {
                worker.tasks_processed += 1;
            }
            if worker.status == WorkerStatus::Busy {
                worker.status = WorkerStatus::Idle;
            }
        }
    }
}

/// Bounded pool of workers partitioned by queue class.
#[derive(Debug)]
pub struct WorkerPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
    cpu_available: Notify,
    io_available: Notify,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl WorkerPool {
    /// Creates a pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
            cpu_available: Notify::new(),
            io_available: Notify::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn notifier(&self, queue_class: QueueClass) -> &Notify {
        match queue_class {
            QueueClass::Cpu => &self.cpu_available,
            QueueClass::Io => &self.io_available,
        }
    }

    /// Registers a worker.
    ///
    /// Returns false if the id is taken, the pool is full, or the class is
    /// at capacity.
    pub fn register_worker(&self, worker_id: impl Into<String>, queue_class: QueueClass) -> bool {
        let worker_id = worker_id.into();
        let mut state = self.state.lock();

        if state.workers.contains_key(&worker_id) {
            warn!(worker_id = %worker_id, "Worker already registered");
            return false;
        }
        if state.workers.len() >= self.config.max_workers {
            warn!(worker_id = %worker_id, max_workers = self.config.max_workers, "Worker pool at capacity");
            return false;
        }
        let capacity = self.config.capacity(queue_class);
        if state.class_worker_count(queue_class) >= capacity {
            warn!(worker_id = %worker_id, %queue_class, capacity, "Queue class at capacity");
            return false;
        }

        state
            .workers
            .insert(worker_id.clone(), Worker::new(worker_id.clone(), queue_class, Utc::now()));
        drop(state);

        info!(worker_id = %worker_id, %queue_class, "Worker registered");
        true
    }

    /// Removes a worker, returning its in-flight task to pending.
    ///
    /// Returns the id of the requeued task, if any.
    pub fn unregister_worker(&self, worker_id: &str) -> Result<Option<Uuid>, PoolError> {
        let mut state = self.state.lock();
        let worker = state
            .workers
            .remove(worker_id)
            .ok_or_else(|| PoolError::unknown_worker(worker_id))?;

        let requeued = worker
            .current_task
            .filter(|task_id| state.requeue(*task_id, worker_id));
        drop(state);

        if let Some(task_id) = requeued {
            self.notifier(worker.queue_class).notify_one();
            info!(worker_id, %task_id, "Worker unregistered, task requeued");
        } else {
            info!(worker_id, "Worker unregistered");
        }
        Ok(requeued)
    }

    /// Marks a worker as draining: it finishes its task and gets no new ones.
    pub fn drain_worker(&self, worker_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.workers.get_mut(worker_id) {
            Some(worker) if worker.status != WorkerStatus::Dead => {
                worker.status = WorkerStatus::Draining;
                true
            }
            _ => false,
        }
    }

    /// Enqueues a bare task.
    pub fn submit_task(&self, run_id: Uuid, step_id: impl Into<String>, queue_class: QueueClass) -> Uuid {
        self.submit(TaskRequest::new(run_id, step_id, queue_class))
    }

    /// Enqueues a task.
    pub fn submit(&self, request: TaskRequest) -> Uuid {
        let task = Task::from_request(request);
        let task_id = task.id;
        let queue_class = task.queue_class;

        {
            let mut state = self.state.lock();
            debug!(%task_id, run_id = %task.run_id, step_id = %task.step_id, %queue_class, "Task submitted");
            state.tasks.insert(task_id, task);
            state.pending.entry(queue_class).or_default().push_back(task_id);
        }

        self.notifier(queue_class).notify_one();
        task_id
    }

    /// Pops the oldest pending task of the worker's class and assigns it.
    ///
    /// Returns `Ok(None)` when nothing is queued or the worker is not idle.
    pub fn get_next_task(&self, worker_id: &str) -> Result<Option<Task>, PoolError> {
        let mut state = self.state.lock();
        let worker = state
            .workers
            .get(worker_id)
            .ok_or_else(|| PoolError::unknown_worker(worker_id))?;
        if worker.status == WorkerStatus::Dead {
            return Err(PoolError::WorkerDead {
                worker_id: worker_id.to_string(),
            });
        }
        if !worker.is_available() {
            return Ok(None);
        }
        let queue_class = worker.queue_class;

        let now = Utc::now();
        let state = &mut *state;
        let queue = state.pending.entry(queue_class).or_default();
        while let Some(task_id) = queue.pop_front() {
            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            task.status = TaskStatus::Running;
            task.assigned_worker = Some(worker_id.to_string());
            task.attempts += 1;
            task.started_at = Some(now);
            let assigned = task.clone();

            if let Some(worker) = state.workers.get_mut(worker_id) {
                worker.status = WorkerStatus::Busy;
                worker.current_task = Some(task_id);
            }

            debug!(%task_id, worker_id, attempt = assigned.attempts, "Task dispatched");
            return Ok(Some(assigned));
        }

        Ok(None)
    }

    /// Records a task outcome and frees the worker.
    ///
    /// Rejected if the task is no longer assigned to `worker_id`, e.g. after
    /// the worker's lease expired and the task was requeued.
    pub fn complete_task(
        &self,
        worker_id: &str,
        task_id: Uuid,
        outcome: Result<AgentResult, TaskFailure>,
    ) -> Result<(), PoolError> {
        let success = outcome.is_ok();
        let (task, waiters) = {
            let mut state = self.state.lock();
            if !state.workers.contains_key(worker_id) {
                return Err(PoolError::unknown_worker(worker_id));
            }
            let task = state
                .tasks
                .get(&task_id)
                .ok_or(PoolError::UnknownTask { task_id })?;
            if task.status != TaskStatus::Running || task.assigned_worker.as_deref() != Some(worker_id) {
                return Err(PoolError::not_assigned(task_id, worker_id));
            }

            let finished = state
                .finish(task_id, outcome, Utc::now())
                .ok_or(PoolError::UnknownTask { task_id })?;
            state.release_worker(worker_id, true);
            finished
        };

        debug!(%task_id, worker_id, success, "Task completed");
        for waiter in waiters {
            let _ = waiter.send(task.clone());
        }
        Ok(())
    }

    /// Fails a task that has not finished yet.
    ///
    /// A running task's worker is released; its eventual completion is
    /// rejected. Returns false if the task was already terminal.
    pub fn cancel_task(&self, task_id: Uuid, reason: &str) -> Result<bool, PoolError> {
        let (task, waiters) = {
            let mut state = self.state.lock();
            let task = state
                .tasks
                .get(&task_id)
                .ok_or(PoolError::UnknownTask { task_id })?;
            if task.status.is_terminal() {
                return Ok(false);
            }
            let queue_class = task.queue_class;
            let holder = task.assigned_worker.clone().filter(|_| task.status == TaskStatus::Running);

            if let Some(queue) = state.pending.get_mut(&queue_class) {
                queue.retain(|id| *id != task_id);
            }
            if let Some(worker_id) = holder {
                state.release_worker(&worker_id, false);
            }

            state
                .finish(
                    task_id,
                    Err(TaskFailure::new(format!("cancelled: {reason}"), String::new())),
                    Utc::now(),
                )
                .ok_or(PoolError::UnknownTask { task_id })?
        };

        info!(%task_id, reason, "Task cancelled");
        for waiter in waiters {
            let _ = waiter.send(task.clone());
        }
        Ok(true)
    }

    /// Refreshes a worker's liveness and extends a held lease.
    pub fn heartbeat(&self, worker_id: &str) -> bool {
        let now = Utc::now();
        let ttl = self.config.lease_ttl();
        let mut state = self.state.lock();
        match state.workers.get_mut(worker_id) {
            Some(worker) if worker.status != WorkerStatus::Dead => {
                worker.last_heartbeat = now;
                if worker.lease_expires_at.is_some() {
                    worker.lease_expires_at = Some(now + ttl);
                }
                true
            }
            _ => false,
        }
    }

    /// Grants a time-boxed lease that heartbeats must keep renewing.
    pub fn acquire_lease(&self, worker_id: &str) -> bool {
        let now = Utc::now();
        let ttl = self.config.lease_ttl();
        let mut state = self.state.lock();
        match state.workers.get_mut(worker_id) {
            Some(worker) if worker.status != WorkerStatus::Dead => {
                worker.last_heartbeat = now;
                worker.lease_expires_at = Some(now + ttl);
                true
            }
            _ => false,
        }
    }

    /// Evicts workers whose lease expired and requeues their tasks.
    pub fn reap_expired_leases(&self) -> ReapReport {
        self.reap_expired_leases_at(Utc::now())
    }

    /// Like [`Self::reap_expired_leases`] with an explicit clock.
    ///
    /// A worker without a lease is treated as expired once its last
    /// heartbeat is older than the lease TTL.
    pub fn reap_expired_leases_at(&self, now: DateTime<Utc>) -> ReapReport {
        let ttl = self.config.lease_ttl();
        let mut report = ReapReport::default();
        let mut woken = Vec::new();

        {
            let mut state = self.state.lock();
            let stale: Vec<String> = state
                .workers
                .values()
                .filter(|w| match w.lease_expires_at {
                    Some(_) => w.lease_expired(now),
                    None => now - w.last_heartbeat >= ttl,
                })
                .map(|w| w.id.clone())
                .collect();

            for worker_id in stale {
                let Some(mut worker) = state.workers.remove(&worker_id) else {
                    continue;
                };
                worker.status = WorkerStatus::Dead;
                if let Some(task_id) = worker.current_task.take() {
                    if state.requeue(task_id, &worker_id) {
                        report.requeued_tasks.push(task_id);
                        woken.push(worker.queue_class);
                    }
                }
                warn!(worker_id = %worker_id, queue_class = %worker.queue_class, "Worker lease expired, evicted");
                report.evicted_workers.push(worker_id);
            }
        }

        for queue_class in woken {
            self.notifier(queue_class).notify_one();
        }
        report
    }

    /// Waits until a task reaches a terminal state.
    pub async fn wait_for_task(&self, task_id: Uuid) -> Result<Task, PoolError> {
        let rx = {
            let mut state = self.state.lock();
            let task = state
                .tasks
                .get(&task_id)
                .ok_or(PoolError::UnknownTask { task_id })?;
            if task.status.is_terminal() {
                return Ok(task.clone());
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.entry(task_id).or_default().push(tx);
            rx
        };

        rx.await.map_err(|_| PoolError::Closed { task_id })
    }

    /// Drops a terminal task from the pool's bookkeeping.
    ///
    /// Callers forget a task once they have its outcome. Tasks still pending
    /// or running are kept and `None` is returned.
    pub fn forget_task(&self, task_id: Uuid) -> Option<Task> {
        let mut state = self.state.lock();
        if !state.tasks.get(&task_id)?.status.is_terminal() {
            return None;
        }
        state.waiters.remove(&task_id);
        state.tasks.remove(&task_id)
    }

    /// Number of tasks the pool still tracks.
    #[must_use]
    pub fn tracked_tasks(&self) -> usize {
        self.state.lock().tasks.len()
    }

    /// Suspends until work may be available for the class, or `max_wait` elapses.
    pub async fn wait_for_work(&self, queue_class: QueueClass, max_wait: Duration) {
        let _ = tokio::time::timeout(max_wait, self.notifier(queue_class).notified()).await;
    }

    /// Returns a task snapshot.
    #[must_use]
    pub fn get_task(&self, task_id: Uuid) -> Option<Task> {
        self.state.lock().tasks.get(&task_id).cloned()
    }

    /// Returns a worker snapshot.
    #[must_use]
    pub fn get_worker(&self, worker_id: &str) -> Option<Worker> {
        self.state.lock().workers.get(worker_id).cloned()
    }

    /// Returns true if a live worker serves the class.
    #[must_use]
    pub fn has_live_worker(&self, queue_class: QueueClass) -> bool {
        self.state.lock().class_worker_count(queue_class) > 0
    }

    /// Snapshot of the queues.
    #[must_use]
    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut stats = QueueStats {
            completed: state.completed,
            failed: state.failed,
            requeued: state.requeued,
            ..QueueStats::default()
        };

        for queue_class in QueueClass::ALL {
            let pending = state
                .pending
                .get(&queue_class)
                .map_or(0, |q| {
                    q.iter()
                        .filter(|id| state.tasks.get(id).is_some_and(|t| t.status == TaskStatus::Pending))
                        .count()
                });
            let running = state
                .tasks
                .values()
                .filter(|t| t.queue_class == queue_class && t.status == TaskStatus::Running)
                .count();
            let workers = state.class_worker_count(queue_class);
            let available_workers = state
                .workers
                .values()
                .filter(|w| w.queue_class == queue_class && w.is_available())
                .count();

            stats.total_pending += pending;
            stats.total_running += running;
            stats.classes.insert(
                queue_class,
                ClassQueueStats {
                    pending,
                    running,
                    workers,
                    available_workers,
                    capacity: self.config.capacity(queue_class),
                },
            );
        }

        stats
    }

    /// Snapshot of the workers.
    #[must_use]
    pub fn get_worker_stats(&self) -> WorkerStats {
        let state = self.state.lock();
        let mut stats = WorkerStats {
            total: state.workers.len(),
            max_workers: self.config.max_workers,
            ..WorkerStats::default()
        };

        for worker in state.workers.values() {
            match worker.status {
                WorkerStatus::Idle => stats.idle += 1,
                WorkerStatus::Busy => stats.busy += 1,
                WorkerStatus::Draining => stats.draining += 1,
                WorkerStatus::Dead => stats.dead += 1,
            }
            if worker.is_available() {
                stats.available += 1;
            }
            stats.tasks_processed += worker.tasks_processed;
        }

        let live = stats.total - stats.dead;
        stats.utilization_rate = if live == 0 {
            0.0
        } else {
            stats.busy as f64 / live as f64
        };
        stats
    }
}
