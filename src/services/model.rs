//! Learned-pattern scoring model
//!
//! The learned detector scores a fixed 10-feature vector behind the
//! `RiskModel` trait, so the shipped logistic combinator can be swapped for
//! a trained classifier without touching the detection engine. Model
//! unavailability is non-fatal: the detector is skipped and the rule-based
//! detectors still run.

use crate::domain::types::{TouristState, TouristStatus};
use serde::Deserialize;

pub const FEATURE_COUNT: usize = 10;

/// Names in vector order, included in the anomaly details payload
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "risk_score",
    "inactive_hours",
    "history_fill",
    "heart_rate",
    "battery_pct",
    "latitude",
    "longitude",
    "account_age_days",
    "family_tracking",
    "emergency_status",
];

/// Fixed feature vector contract for the learned detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Extract features from a tourist snapshot at `now_ms`
    pub fn from_state(state: &TouristState, now_ms: u64) -> Self {
        let inactive_hours =
            now_ms.saturating_sub(state.last_activity_ms) as f64 / 3_600_000.0;
        let history_fill = state.history.len() as f64 / 100.0;
        let heart_rate = state.vitals.and_then(|v| v.heart_rate).unwrap_or(70.0);
        let battery_pct = state.vitals.and_then(|v| v.battery_pct).unwrap_or(100.0);
        let (latitude, longitude) = state
            .current_position
            .map(|p| (p.latitude, p.longitude))
            .unwrap_or((0.0, 0.0));
        let account_age_days =
            now_ms.saturating_sub(state.registered_at_ms) as f64 / 86_400_000.0;

        Self([
            state.risk_score,
            inactive_hours,
            history_fill,
            heart_rate,
            battery_pct,
            latitude,
            longitude,
            account_age_days,
            if state.family_tracking { 1.0 } else { 0.0 },
            if state.status == TouristStatus::Emergency { 1.0 } else { 0.0 },
        ])
    }
}

/// Replaceable scoring function over the fixed feature vector
pub trait RiskModel: Send + Sync {
    /// Distress confidence in [0,1]
    fn score(&self, features: &FeatureVector) -> f64;

    fn version(&self) -> &str {
        "unversioned"
    }
}

/// Logistic-weighted combinator over the feature vector.
///
/// Weights and bias are TOML-tunable; the defaults emphasize accumulated
/// risk, inactivity, and the emergency flag while down-weighting battery and
/// account age.
#[derive(Debug, Clone, Deserialize)]
pub struct LogisticModel {
    pub weights: [f64; FEATURE_COUNT],
    pub bias: f64,
}

impl Default for LogisticModel {
    fn default() -> Self {
        Self {
            weights: [1.5, 0.8, -0.3, 0.0, -0.01, 0.0, 0.0, -0.02, -0.1, 2.5],
            bias: -2.0,
        }
    }
}

impl RiskModel for LogisticModel {
    fn score(&self, features: &FeatureVector) -> f64 {
        let z: f64 = self
            .weights
            .iter()
            .zip(features.0.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.bias;
        1.0 / (1.0 + (-z).exp())
    }

    fn version(&self) -> &str {
        "logistic-1"
    }
}
