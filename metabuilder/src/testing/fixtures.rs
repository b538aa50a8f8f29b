//! Ready-made wiring for orchestration tests.

use std::sync::Arc;
use std::time::Duration;

use super::EchoAgent;
use crate::agents::{Agent, AgentRegistry, AgentRole};
use crate::canary::{CanaryConfig, CanaryManager};
use crate::events::CollectingEventSink;
use crate::executor::{DistributedExecutor, PoolConfig, QueueClass, WorkerPool};
use crate::orchestrator::{JitterStrategy, OrchestratorConfig, RetryConfig, RunOrchestrator};

/// A registry with an [`EchoAgent`] for every role.
#[must_use]
pub fn echo_registry() -> AgentRegistry {
    AgentRole::ALL
        .into_iter()
        .fold(AgentRegistry::new(), |registry, role| {
            registry.with(Arc::new(EchoAgent::new(role)))
        })
}

/// Pool settings with millisecond leases and polling.
#[must_use]
pub fn fast_pool_config() -> PoolConfig {
    PoolConfig::default()
        .with_lease_ttl(Duration::from_millis(200))
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_reap_interval(Duration::from_millis(20))
        .with_idle_poll(Duration::from_millis(50))
}

fn fast_retry() -> RetryConfig {
    RetryConfig::default()
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(JitterStrategy::None)
}

/// A fully wired orchestrator over in-process workers.
///
/// ```rust,ignore
/// let harness = TestHarness::builder()
///     .with_agent(FailingAgent::new(AgentRole::QaEvaluator, "boom", "AssertionError"))
///     .build();
/// let run_id = harness.orchestrator.submit_run(RunRequest::new("acme", "app"));
/// ```
#[derive(Debug)]
pub struct TestHarness {
    /// The shared pool.
    pub pool: Arc<WorkerPool>,
    /// Worker loops and reaper.
    pub executor: Arc<DistributedExecutor>,
    /// Cohort assignment and metrics.
    pub canary: Arc<CanaryManager>,
    /// The run driver.
    pub orchestrator: Arc<RunOrchestrator>,
    /// Every event emitted by the orchestrator and executor.
    pub events: Arc<CollectingEventSink>,
}

impl TestHarness {
    /// Starts configuring a harness.
    #[must_use]
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::default()
    }

    /// A harness with echo agents and default settings.
    #[must_use]
    pub fn echo() -> Self {
        Self::builder().build()
    }

    /// Stops every worker.
    pub async fn shutdown(&self) {
        self.executor.shutdown().await;
    }
}

/// Configures a [`TestHarness`].
#[derive(Debug)]
pub struct TestHarnessBuilder {
    agents: AgentRegistry,
    pool: PoolConfig,
    canary: CanaryConfig,
    orchestrator: OrchestratorConfig,
    retry: RetryConfig,
    cpu_workers: usize,
    io_workers: usize,
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self {
            agents: echo_registry(),
            pool: fast_pool_config(),
            canary: CanaryConfig::default().with_canary_percent(0.0),
            orchestrator: OrchestratorConfig::default(),
            retry: fast_retry(),
            cpu_workers: 2,
            io_workers: 2,
        }
    }
}

impl TestHarnessBuilder {
    /// Replaces the agent for the agent's role.
    #[must_use]
    pub fn with_agent(self, agent: impl Agent + 'static) -> Self {
        self.with_shared_agent(Arc::new(agent))
    }

    /// Replaces the agent for the agent's role, keeping a handle for
    /// inspection.
    #[must_use]
    pub fn with_shared_agent(self, agent: Arc<dyn Agent>) -> Self {
        self.agents.register(agent);
        self
    }

    /// Sets the pool configuration.
    #[must_use]
    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool = config;
        self
    }

    /// Sets the canary configuration.
    #[must_use]
    pub fn with_canary_config(mut self, config: CanaryConfig) -> Self {
        self.canary = config;
        self
    }

    /// Sets the orchestrator configuration.
    #[must_use]
    pub fn with_orchestrator_config(mut self, config: OrchestratorConfig) -> Self {
        self.orchestrator = config;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how many workers serve each class.
    #[must_use]
    pub fn with_workers(mut self, cpu: usize, io: usize) -> Self {
        self.cpu_workers = cpu;
        self.io_workers = io;
        self
    }

    /// Wires everything and starts workers and the reaper. Must run inside a
    /// Tokio runtime.
    #[must_use]
    pub fn build(self) -> TestHarness {
        let events = Arc::new(CollectingEventSink::new());
        let pool = Arc::new(WorkerPool::new(self.pool));
        let executor = Arc::new(
            DistributedExecutor::new(Arc::clone(&pool), Arc::new(self.agents))
                .with_event_sink(events.clone()),
        );
        executor.spawn_workers(QueueClass::Cpu, self.cpu_workers);
        executor.spawn_workers(QueueClass::Io, self.io_workers);
        executor.start_reaper();

        let canary = Arc::new(CanaryManager::new(self.canary));
        let orchestrator = Arc::new(
            RunOrchestrator::new(Arc::clone(&executor), Arc::clone(&canary))
                .with_config(self.orchestrator)
                .with_retry(self.retry)
                .with_event_sink(events.clone()),
        );

        TestHarness {
            pool,
            executor,
            canary,
            orchestrator,
            events,
        }
    }
}
