//! Deterministic cohort bucketing.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Pipeline version group a run belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    /// The current pipeline.
    #[default]
    Control,
    /// The candidate pipeline.
    Experimental,
}

impl Cohort {
    /// Both cohorts.
    pub const ALL: [Self; 2] = [Self::Control, Self::Experimental];

    /// Returns true for the experimental cohort.
    #[must_use]
    pub fn is_experimental(self) -> bool {
        self == Self::Experimental
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => write!(f, "control"),
            Self::Experimental => write!(f, "experimental"),
        }
    }
}

fn digest_prefix(run_id: Uuid, tenant_id: &str) -> [u8; 8] {
    let digest = Sha256::digest(format!("{run_id}:{tenant_id}").as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    prefix
}

/// Hex form of the hash prefix a run is bucketed by, for logs.
#[must_use]
pub fn cohort_key(run_id: Uuid, tenant_id: &str) -> String {
    hex::encode(digest_prefix(run_id, tenant_id))
}

/// Maps a run to a stable point in `[0, 1)`.
///
/// Uses the first 8 bytes of `SHA-256("{run_id}:{tenant_id}")` read as a
/// big-endian integer.
#[must_use]
pub fn cohort_bucket(run_id: Uuid, tenant_id: &str) -> f64 {
    let prefix = digest_prefix(run_id, tenant_id);
    // 53 high bits keep the value exactly representable and strictly below 1.
    let bits = u64::from_be_bytes(prefix) >> 11;
    bits as f64 / (1u64 << 53) as f64
}

/// Cohort for a bucket value under the given experimental share.
#[must_use]
pub fn cohort_for(bucket: f64, canary_percent: f64) -> Cohort {
    if bucket < canary_percent {
        Cohort::Experimental
    } else {
        Cohort::Control
    }
}
