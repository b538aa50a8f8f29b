//! Run orchestration.
//!
//! A run moves `pending -> planning -> generating -> evaluating` and ends
//! `succeeded`, `failed` or `rolled_back`, possibly pausing in
//! `awaiting_approval`. Each phase submits one task per pipeline step to the
//! [`crate::executor::WorkerPool`] and awaits it. A failed step is
//! classified and [`decide`] picks the recovery: retry in place, restart an
//! iteration, or pause for a human.

mod decision;
mod engine;
mod outcome;
mod pipeline;
mod retry;
mod run;
mod span;

#[cfg(test)]
mod integration_tests;

pub use decision::{decide, Decision};
pub use engine::RunOrchestrator;
pub use outcome::{EvaluationReport, RunOutcome};
pub use pipeline::{Phase, PipelineDefinition, PipelineSet, StageStep};
pub use retry::{BackoffStrategy, JitterStrategy, RetryConfig, RetryState};
pub use run::{ApprovalRecord, PauseReason, ReviewConfig, Run, RunLimits, RunRequest, RunStatus};
pub use span::{AgentSpan, SpanKind};

use serde::{Deserialize, Serialize};

/// The pipeline version a run executes; the run's canary cohort.
pub type PipelineVersion = crate::canary::Cohort;

/// Orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Iterations a run may start before it fails.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Limits applied to runs that bring none.
    #[serde(default)]
    pub default_limits: RunLimits,
}

fn default_max_iterations() -> u32 {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            default_limits: RunLimits::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Sets the iteration budget.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the default run limits.
    #[must_use]
    pub fn with_default_limits(mut self, limits: RunLimits) -> Self {
        self.default_limits = limits;
        self
    }
}
