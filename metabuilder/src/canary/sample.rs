//! Per-run canary samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::Cohort;

/// Outcome figures reported when a run finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Whether the run succeeded.
    pub success: bool,
    /// Free-form run metrics.
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    /// Total cost in USD.
    pub cost_usd: f64,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
    /// In-place retries.
    pub retry_count: u32,
    /// Re-plans.
    pub replan_count: u32,
    /// Rollbacks.
    pub rollback_count: u32,
}

impl CompletionRecord {
    /// A successful completion.
    #[must_use]
    pub fn succeeded(cost_usd: f64, duration_seconds: f64) -> Self {
        Self {
            success: true,
            cost_usd,
            duration_seconds,
            ..Self::default()
        }
    }

    /// A failed completion.
    #[must_use]
    pub fn failed(cost_usd: f64, duration_seconds: f64) -> Self {
        Self {
            success: false,
            cost_usd,
            duration_seconds,
            ..Self::default()
        }
    }

    /// Sets the retry, replan and rollback counters.
    #[must_use]
    pub fn with_counts(mut self, retries: u32, replans: u32, rollbacks: u32) -> Self {
        self.retry_count = retries;
        self.replan_count = replans;
        self.rollback_count = rollbacks;
        self
    }

    /// Adds a metric.
    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }
}

/// A run's canary record: created at assignment, finalized once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanarySample {
    /// Sample id.
    pub id: Uuid,
    /// The run.
    pub run_id: Uuid,
    /// The tenant.
    pub tenant_id: String,
    /// Assigned cohort.
    pub cohort: Cohort,
    /// Assignment time.
    pub assigned_at: DateTime<Utc>,
    /// Completion time; `None` while the run is in flight.
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome, once completed.
    pub outcome: Option<CompletionRecord>,
}

impl CanarySample {
    pub(crate) fn new(run_id: Uuid, tenant_id: impl Into<String>, cohort: Cohort, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            tenant_id: tenant_id.into(),
            cohort,
            assigned_at: now,
            completed_at: None,
            outcome: None,
        }
    }

    /// Returns true once finalized.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome.is_some()
    }

    /// Finalizes the sample. Returns false if it was already finalized.
    pub(crate) fn complete(&mut self, record: CompletionRecord, now: DateTime<Utc>) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(record);
        self.completed_at = Some(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_once() {
        let now = Utc::now();
        let mut sample = CanarySample::new(Uuid::new_v4(), "t", Cohort::Control, now);
        assert!(!sample.is_completed());

        assert!(sample.complete(CompletionRecord::succeeded(1.0, 30.0), now));
        assert!(!sample.complete(CompletionRecord::failed(9.0, 90.0), now));

        let outcome = sample.outcome.unwrap();
        assert!(outcome.success);
        assert!((outcome.cost_usd - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_record_builder() {
        let record = CompletionRecord::failed(0.5, 12.0)
            .with_counts(2, 1, 0)
            .with_metric("iterations", serde_json::json!(3));
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.replan_count, 1);
        assert_eq!(record.metrics["iterations"], 3);
    }
}
