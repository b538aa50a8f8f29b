//! The run record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use super::{AgentSpan, Phase, PipelineVersion, RunOutcome};
use crate::classifier::FailureSignal;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Accepted, not started.
    #[default]
    Pending,
    /// Planning phase.
    Planning,
    /// Generation phase.
    Generating,
    /// Evaluation phase.
    Evaluating,
    /// Paused for a human decision.
    AwaitingApproval,
    /// Finished successfully.
    Succeeded,
    /// Gave up.
    Failed,
    /// Rejected at review.
    RolledBack,
}

impl RunStatus {
    /// Returns true for succeeded, failed and rolled back.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::RolledBack)
    }

    /// Returns true when the run no longer progresses on its own.
    #[must_use]
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == Self::AwaitingApproval
    }

    /// Whether the state machine allows moving to `next`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use RunStatus::{AwaitingApproval, Evaluating, Failed, Generating, Pending, Planning, RolledBack, Succeeded};

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Pending, Planning) => true,
            (Planning, Planning | Generating | AwaitingApproval) => true,
            (Generating, Planning | Generating | Evaluating | AwaitingApproval) => true,
            (Evaluating, Planning | Generating | AwaitingApproval | Succeeded) => true,
            (AwaitingApproval, Planning | Succeeded | RolledBack) => true,
            _ => false,
        }
    }
}

impl From<Phase> for RunStatus {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Planning => Self::Planning,
            Phase::Generating => Self::Generating,
            Phase::Evaluating => Self::Evaluating,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Evaluating => "evaluating",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(s)
    }
}

/// Per-run resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    /// Spend ceiling in USD.
    #[serde(default = "default_max_cost_usd")]
    pub max_cost_usd: f64,
    /// Token ceiling.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Wall-clock ceiling in seconds.
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Timeout for one step attempt in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

fn default_max_cost_usd() -> f64 {
    10.0
}

fn default_max_tokens() -> u64 {
    2_000_000
}

fn default_max_duration_secs() -> u64 {
    3600
}

fn default_task_timeout_secs() -> u64 {
    600
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_cost_usd: default_max_cost_usd(),
            max_tokens: default_max_tokens(),
            max_duration_secs: default_max_duration_secs(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

impl RunLimits {
    /// Sets the cost ceiling.
    #[must_use]
    pub fn with_max_cost(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = max_cost_usd;
        self
    }

    /// Sets the token ceiling.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Sets the wall-clock ceiling.
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration_secs = max_duration.as_secs();
        self
    }

    /// Sets the step timeout.
    #[must_use]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_secs = timeout.as_secs();
        self
    }

    /// Wall-clock ceiling.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    /// Step timeout.
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// When a run pauses for a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Pause for sign-off after a successful evaluation.
    #[serde(default)]
    pub require_approval: bool,
    /// Pause on security findings instead of re-planning.
    #[serde(default = "default_pause_on_security")]
    pub pause_on_security: bool,
}

fn default_pause_on_security() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            require_approval: false,
            pause_on_security: default_pause_on_security(),
        }
    }
}

impl ReviewConfig {
    /// Requires final sign-off.
    #[must_use]
    pub fn with_approval(mut self) -> Self {
        self.require_approval = true;
        self
    }

    /// Sets the security pause policy.
    #[must_use]
    pub fn with_pause_on_security(mut self, pause: bool) -> Self {
        self.pause_on_security = pause;
        self
    }
}

/// Why a run is awaiting approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Evaluation passed; waiting for sign-off.
    FinalReview,
    /// A security finding needs a human decision.
    Security,
}

/// A recorded approval decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// What was decided on.
    pub reason: PauseReason,
    /// The decision.
    pub approved: bool,
    /// Reviewer comments.
    pub comments: Option<String>,
    /// Decision time.
    pub decided_at: DateTime<Utc>,
}

/// Parameters for a new run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    /// Tenant submitting the run.
    pub tenant_id: String,
    /// Build goal.
    pub goal: String,
    /// Limits; orchestrator defaults when `None`.
    pub limits: Option<RunLimits>,
    /// Review policy.
    pub review: ReviewConfig,
}

impl RunRequest {
    /// Creates a request with default limits and review policy.
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            goal: goal.into(),
            limits: None,
            review: ReviewConfig::default(),
        }
    }

    /// Sets limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Sets the review policy.
    #[must_use]
    pub fn with_review(mut self, review: ReviewConfig) -> Self {
        self.review = review;
        self
    }
}

/// A run and everything it accumulated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Run id.
    pub id: Uuid,
    /// Tenant.
    pub tenant_id: String,
    /// Build goal.
    pub goal: String,
    /// Iterations started; 0 while pending.
    pub iteration: u32,
    /// Current status.
    pub status: RunStatus,
    /// Resource limits.
    pub limits: RunLimits,
    /// Review policy.
    pub review: ReviewConfig,
    /// Pipeline version, pinned at submission.
    pub pipeline_version: PipelineVersion,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Cache hits reported by agents.
    pub cache_hits: u64,
    /// Cost in USD.
    pub cost_usd: f64,
    /// In-place step retries.
    pub retry_count: u32,
    /// Iterations restarted by a failure.
    pub replan_count: u32,
    /// Rejections at final review.
    pub rollback_count: u32,
    /// Latest output per step id.
    pub outputs: HashMap<String, serde_json::Value>,
    /// Every classified failure, oldest first.
    pub failure_signals: Vec<FailureSignal>,
    /// Audit trail.
    pub spans: Vec<AgentSpan>,
    /// Current pause, while awaiting approval.
    pub pause: Option<PauseReason>,
    /// Approval decisions.
    pub approvals: Vec<ApprovalRecord>,
    /// Final result, once terminal.
    pub outcome: Option<RunOutcome>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// When planning first started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached a terminal status.
    pub ended_at: Option<DateTime<Utc>>,
}

impl Run {
    pub(crate) fn new(id: Uuid, request: RunRequest, limits: RunLimits, pipeline_version: PipelineVersion) -> Self {
        Self {
            id,
            tenant_id: request.tenant_id,
            goal: request.goal,
            iteration: 0,
            status: RunStatus::Pending,
            limits,
            review: request.review,
            pipeline_version,
            tokens_used: 0,
            cache_hits: 0,
            cost_usd: 0.0,
            retry_count: 0,
            replan_count: 0,
            rollback_count: 0,
            outputs: HashMap::new(),
            failure_signals: Vec::new(),
            spans: Vec::new(),
            pause: None,
            approvals: Vec::new(),
            outcome: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Wall-clock time since planning started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at
            .and_then(|start| (self.ended_at.unwrap_or_else(Utc::now) - start).to_std().ok())
            .unwrap_or_default()
    }

    /// Step spans only.
    #[must_use]
    pub fn step_spans(&self) -> Vec<&AgentSpan> {
        self.spans.iter().filter(|s| s.is_step()).collect()
    }

    /// Statuses visited, in order, starting from pending.
    #[must_use]
    pub fn status_history(&self) -> Vec<RunStatus> {
        let mut history = vec![RunStatus::Pending];
        history.extend(self.spans.iter().filter_map(|s| match s.kind {
            super::SpanKind::Transition { to, .. } => Some(to),
            super::SpanKind::Step { .. } => None,
        }));
        history
    }
}
