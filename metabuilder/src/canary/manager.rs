//! Cohort assignment, outcome recording and rollout evaluation.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{cohort_bucket, cohort_for, cohort_key, CanarySample, Cohort, CohortComparison, CompletionRecord};
use crate::errors::CanaryError;

/// Canary rollout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanaryConfig {
    /// Share of runs assigned to the experimental pipeline.
    #[serde(default = "default_canary_percent")]
    pub canary_percent: f64,
    /// Completed runs each cohort needs before a recommendation.
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: usize,
    /// Trailing window evaluated, in hours.
    #[serde(default = "default_evaluation_window_hours")]
    pub evaluation_window_hours: u32,
    /// Success-rate drop tolerated before holding or rolling back.
    #[serde(default = "default_success_rate_tolerance")]
    pub success_rate_tolerance: f64,
    /// Relative cost increase tolerated.
    #[serde(default = "default_cost_increase_tolerance")]
    pub cost_increase_tolerance: f64,
    /// Relative duration increase tolerated.
    #[serde(default = "default_duration_increase_tolerance")]
    pub duration_increase_tolerance: f64,
    /// z threshold for a significant success-rate difference.
    #[serde(default = "default_significance_z")]
    pub significance_z: f64,
}

fn default_canary_percent() -> f64 {
    0.1
}

fn default_min_sample_size() -> usize {
    30
}

fn default_evaluation_window_hours() -> u32 {
    24
}

fn default_success_rate_tolerance() -> f64 {
    0.05
}

fn default_cost_increase_tolerance() -> f64 {
    0.2
}

fn default_duration_increase_tolerance() -> f64 {
    0.25
}

fn default_significance_z() -> f64 {
    1.96
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            canary_percent: default_canary_percent(),
            min_sample_size: default_min_sample_size(),
            evaluation_window_hours: default_evaluation_window_hours(),
            success_rate_tolerance: default_success_rate_tolerance(),
            cost_increase_tolerance: default_cost_increase_tolerance(),
            duration_increase_tolerance: default_duration_increase_tolerance(),
            significance_z: default_significance_z(),
        }
    }
}

impl CanaryConfig {
    /// Sets the experimental share.
    #[must_use]
    pub fn with_canary_percent(mut self, canary_percent: f64) -> Self {
        self.canary_percent = canary_percent;
        self
    }

    /// Sets the per-cohort sample floor.
    #[must_use]
    pub fn with_min_sample_size(mut self, min_sample_size: usize) -> Self {
        self.min_sample_size = min_sample_size;
        self
    }
}

/// Rollout decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Experimental is at least as good; widen the rollout.
    Promote,
    /// Inconclusive or a soft regression; keep the current split.
    Hold,
    /// Experimental is significantly worse; stop the canary.
    Rollback,
}

/// Result of [`CanaryManager::evaluate_canary_performance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryEvaluation {
    /// False until both cohorts reach the sample floor.
    pub evaluation_ready: bool,
    /// The decision, when ready.
    pub recommendation: Option<Recommendation>,
    /// Why.
    pub reason: String,
    /// Supporting metrics.
    pub metrics: CohortComparison,
    /// z statistic of the success-rate difference.
    pub success_z_score: f64,
}

/// Assigns runs to cohorts and compares their outcomes.
#[derive(Debug)]
pub struct CanaryManager {
    config: RwLock<CanaryConfig>,
    samples: RwLock<HashMap<Uuid, CanarySample>>,
}

impl Default for CanaryManager {
    fn default() -> Self {
        Self::new(CanaryConfig::default())
    }
}

impl CanaryManager {
    /// Creates a manager.
    #[must_use]
    pub fn new(config: CanaryConfig) -> Self {
        Self {
            config: RwLock::new(config),
            samples: RwLock::new(HashMap::new()),
        }
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> CanaryConfig {
        self.config.read().clone()
    }

    /// Changes the experimental share for future assignments.
    pub fn set_canary_percent(&self, canary_percent: f64) -> Result<(), CanaryError> {
        if !(0.0..=1.0).contains(&canary_percent) {
            return Err(CanaryError::InvalidPercent { value: canary_percent });
        }
        self.config.write().canary_percent = canary_percent;
        info!(canary_percent, "Canary percent updated");
        Ok(())
    }

    /// Returns true if the run executes the experimental pipeline.
    ///
    /// The first call for a run creates its sample; later calls return the
    /// stored cohort.
    pub fn should_use_v4(&self, run_id: Uuid, tenant_id: &str) -> bool {
        self.assign(run_id, tenant_id).is_experimental()
    }

    /// Assigns (or returns) the cohort for a run.
    pub fn assign(&self, run_id: Uuid, tenant_id: &str) -> Cohort {
        self.assign_at(run_id, tenant_id, Utc::now())
    }

    /// Like [`Self::assign`] with an explicit clock.
    ///
    /// A run keeps the cohort and tenant of its first assignment. A later
    /// call naming another tenant is logged and gets the stored cohort.
    pub fn assign_at(&self, run_id: Uuid, tenant_id: &str, now: DateTime<Utc>) -> Cohort {
        if let Some(sample) = self.samples.read().get(&run_id) {
            return stored_cohort(sample, tenant_id);
        }

        let canary_percent = self.config.read().canary_percent;
        let mut samples = self.samples.write();
        let sample = samples.entry(run_id).or_insert_with(|| {
            let cohort = cohort_for(cohort_bucket(run_id, tenant_id), canary_percent);
            debug!(%run_id, tenant_id, %cohort, key = %cohort_key(run_id, tenant_id), "Run assigned to cohort");
            CanarySample::new(run_id, tenant_id, cohort, now)
        });
        stored_cohort(sample, tenant_id)
    }

    /// The cohort a run was assigned, if any.
    #[must_use]
    pub fn cohort_of(&self, run_id: Uuid) -> Option<Cohort> {
        self.samples.read().get(&run_id).map(|s| s.cohort)
    }

    /// A sample snapshot.
    #[must_use]
    pub fn sample(&self, run_id: Uuid) -> Option<CanarySample> {
        self.samples.read().get(&run_id).cloned()
    }

    /// Number of samples, completed or not.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.read().len()
    }

    /// Finalizes a run's sample.
    ///
    /// Returns `Ok(false)` if it was already finalized; nothing changes.
    pub fn record_completion(&self, run_id: Uuid, record: CompletionRecord) -> Result<bool, CanaryError> {
        let mut samples = self.samples.write();
        let sample = samples.get_mut(&run_id).ok_or(CanaryError::UnknownRun { run_id })?;

        let success = record.success;
        if !sample.complete(record, Utc::now()) {
            warn!(%run_id, "Completion already recorded, ignoring");
            return Ok(false);
        }
        info!(%run_id, cohort = %sample.cohort, success, "Canary completion recorded");
        Ok(true)
    }

    /// Metrics over completed samples assigned in the last `hours`.
    #[must_use]
    pub fn get_canary_metrics(&self, hours: u32) -> CohortComparison {
        self.get_canary_metrics_at(hours, Utc::now())
    }

    /// Like [`Self::get_canary_metrics`] with an explicit clock.
    #[must_use]
    pub fn get_canary_metrics_at(&self, hours: u32, now: DateTime<Utc>) -> CohortComparison {
        let since = now - Duration::hours(i64::from(hours));
        let samples = self.samples.read();
        let window: Vec<&CanarySample> = samples
            .values()
            .filter(|s| s.assigned_at >= since && s.assigned_at <= now)
            .collect();
        CohortComparison::from_samples(&window)
    }

    /// Compares the cohorts over the configured window.
    #[must_use]
    pub fn evaluate_canary_performance(&self) -> CanaryEvaluation {
        self.evaluate_canary_performance_at(Utc::now())
    }

    /// Like [`Self::evaluate_canary_performance`] with an explicit clock.
    #[must_use]
    pub fn evaluate_canary_performance_at(&self, now: DateTime<Utc>) -> CanaryEvaluation {
        let config = self.config();
        let metrics = self.get_canary_metrics_at(config.evaluation_window_hours, now);
        let z = metrics.success_z_score();

        let control_n = metrics.control.sample_size;
        let experimental_n = metrics.experimental.sample_size;
        if control_n < config.min_sample_size || experimental_n < config.min_sample_size {
            return CanaryEvaluation {
                evaluation_ready: false,
                recommendation: None,
                reason: format!(
                    "Insufficient samples: control {control_n}/{min}, experimental {experimental_n}/{min}",
                    min = config.min_sample_size
                ),
                metrics,
                success_z_score: z,
            };
        }

        let (recommendation, reason) = decide(&config, &metrics, z);
        info!(?recommendation, z, control_n, experimental_n, "Canary evaluated");
        CanaryEvaluation {
            evaluation_ready: true,
            recommendation: Some(recommendation),
            reason,
            metrics,
            success_z_score: z,
        }
    }
}

fn decide(config: &CanaryConfig, metrics: &CohortComparison, z: f64) -> (Recommendation, String) {
    let delta = metrics.success_delta();

    if delta < -config.success_rate_tolerance {
        if z <= -config.significance_z {
            return (
                Recommendation::Rollback,
                format!("Experimental success rate is significantly lower ({delta:+.3}, z={z:.2})"),
            );
        }
        return (
            Recommendation::Hold,
            format!("Experimental success rate is lower but not significant ({delta:+.3}, z={z:.2})"),
        );
    }

    let cost = metrics.cost_increase();
    if cost > config.cost_increase_tolerance {
        return (
            Recommendation::Hold,
            format!("Experimental cost increased by {:.1}%", cost * 100.0),
        );
    }
    let duration = metrics.duration_increase();
    if duration > config.duration_increase_tolerance {
        return (
            Recommendation::Hold,
            format!("Experimental duration increased by {:.1}%", duration * 100.0),
        );
    }

    (
        Recommendation::Promote,
        format!("Experimental performs within tolerance ({delta:+.3} success rate)"),
    )
}

fn stored_cohort(sample: &CanarySample, tenant_id: &str) -> Cohort {
    if sample.tenant_id != tenant_id {
        warn!(
            run_id = %sample.run_id,
            assigned_tenant = %sample.tenant_id,
            tenant_id,
            "Run already assigned under another tenant, keeping its cohort"
        );
    }
    sample.cohort
}
