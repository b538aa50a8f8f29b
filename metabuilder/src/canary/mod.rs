//! Canary rollout of the experimental pipeline.
//!
//! Each run is bucketed by a stable hash of `(run_id, tenant_id)` into the
//! control or experimental [`Cohort`]. When the run finishes its outcome is
//! recorded once, and [`CanaryManager::evaluate_canary_performance`]
//! compares the cohorts over a trailing window before recommending whether
//! to promote, hold or roll back.

mod cohort;
mod manager;
mod metrics;
mod sample;

pub use cohort::{cohort_bucket, cohort_for, cohort_key, Cohort};
pub use manager::{CanaryConfig, CanaryEvaluation, CanaryManager, Recommendation};
pub use metrics::{CanaryMetrics, CohortComparison};
pub use sample::{CanarySample, CompletionRecord};
