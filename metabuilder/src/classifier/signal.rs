//! Failure signal types and the per-type recovery policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// The classified cause of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    /// A test assertion failed.
    TestAssert,
    /// A linter or formatter rejected the code.
    Lint,
    /// An upstream service throttled the request.
    RateLimit,
    /// A security scanner or policy flagged the output.
    Security,
    /// A network or infrastructure hiccup.
    Transient,
    /// A module or package could not be resolved.
    Dependency,
    /// No pattern explained the failure.
    Unknown,
}

impl FailureType {
    /// All classifiable types in tie-break priority order, highest first.
    pub const PRIORITY_ORDER: [Self; 6] = [
        Self::Security,
        Self::TestAssert,
        Self::Lint,
        Self::Dependency,
        Self::RateLimit,
        Self::Transient,
    ];

    /// Tie-break rank; lower wins.
    #[must_use]
    pub fn priority(self) -> usize {
        Self::PRIORITY_ORDER
            .iter()
            .position(|t| *t == self)
            .unwrap_or(Self::PRIORITY_ORDER.len())
    }

    /// Default severity for the type.
    #[must_use]
    pub fn default_severity(self) -> Severity {
        match self {
            Self::Security => Severity::High,
            Self::TestAssert | Self::Dependency | Self::Unknown => Severity::Medium,
            Self::Lint | Self::RateLimit | Self::Transient => Severity::Low,
        }
    }

    /// Whether the same step may simply be re-run.
    #[must_use]
    pub fn can_retry(self) -> bool {
        matches!(self, Self::RateLimit | Self::Transient | Self::Unknown)
    }

    /// Whether the failure invalidates the plan.
    #[must_use]
    pub fn requires_replan(self) -> bool {
        matches!(self, Self::Dependency)
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TestAssert => write!(f, "test_assert"),
            Self::Lint => write!(f, "lint"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Security => write!(f, "security"),
            Self::Transient => write!(f, "transient"),
            Self::Dependency => write!(f, "dependency"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// How serious a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic or self-healing.
    Low,
    /// Needs a code or plan change.
    Medium,
    /// Needs human attention.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// What matched in the logs and how strongly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// The pattern source that matched.
    pub pattern: String,
    /// The matched text.
    pub matched: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A server-specified delay extracted from the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffInfo {
    /// Seconds to wait before retrying.
    pub retry_after_seconds: u64,
    /// The raw marker text.
    pub raw: String,
}

impl BackoffInfo {
    /// Returns the delay as a duration.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.retry_after_seconds)
    }
}

/// The classified verdict on why a step failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    /// Signal id.
    pub id: Uuid,
    /// The failure type.
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    /// The severity.
    pub severity: Severity,
    /// The step that failed.
    pub source: String,
    /// Human readable message.
    pub message: String,
    /// Matched pattern, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    /// Whether the step may be re-run as is.
    pub can_retry: bool,
    /// Whether the plan must be redone.
    pub requires_replan: bool,
    /// Server-specified backoff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_info: Option<BackoffInfo>,
    /// True when produced by a rule overlay rather than a pattern.
    #[serde(default)]
    pub synthetic: bool,
    /// When the signal was produced.
    pub created_at: DateTime<Utc>,
}

impl FailureSignal {
    /// Creates a signal carrying the default policy for its type.
    #[must_use]
    pub fn new(
        failure_type: FailureType,
        source: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            failure_type,
            severity: failure_type.default_severity(),
            source: source.into(),
            message: message.into(),
            evidence: None,
            can_retry: failure_type.can_retry(),
            requires_replan: failure_type.requires_replan(),
            backoff_info: None,
            synthetic: false,
            created_at: Utc::now(),
        }
    }

    /// Attaches evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: Evidence) -> Self {
        self.evidence = Some(evidence);
        self
    }

    /// Attaches backoff info.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Option<BackoffInfo>) -> Self {
        self.backoff_info = backoff;
        self
    }

    /// Returns the evidence confidence, or 0 when unmatched.
    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.evidence.as_ref().map_or(0.0, |e| e.confidence)
    }

    /// Returns the server-specified retry delay, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.backoff_info.as_ref().map(BackoffInfo::delay)
    }

    /// Returns true for unknown signals.
    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.failure_type == FailureType::Unknown
    }
}
