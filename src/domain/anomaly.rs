//! Anomaly records produced by the detection engine
//!
//! Records are created fresh each evaluation cycle and carry no persistent
//! identity; consumers deduplicate or time-window them.

use crate::domain::types::TouristId;
use serde::Serialize;

/// Detector families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    RouteDeviation,
    Inactivity,
    SpeedAnomaly,
    VitalsAnomaly,
    DeviceConnectivity,
    BehaviorPattern,
    LearnedPattern,
}

/// All kinds, in metrics/reporting order
pub const ANOMALY_KINDS: [AnomalyKind; 7] = [
    AnomalyKind::RouteDeviation,
    AnomalyKind::Inactivity,
    AnomalyKind::SpeedAnomaly,
    AnomalyKind::VitalsAnomaly,
    AnomalyKind::DeviceConnectivity,
    AnomalyKind::BehaviorPattern,
    AnomalyKind::LearnedPattern,
];

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::RouteDeviation => "route_deviation",
            AnomalyKind::Inactivity => "inactivity",
            AnomalyKind::SpeedAnomaly => "speed_anomaly",
            AnomalyKind::VitalsAnomaly => "vitals_anomaly",
            AnomalyKind::DeviceConnectivity => "device_connectivity",
            AnomalyKind::BehaviorPattern => "behavior_pattern",
            AnomalyKind::LearnedPattern => "learned_pattern",
        }
    }

    /// Stable index for metrics arrays
    #[inline]
    pub fn index(&self) -> usize {
        match self {
            AnomalyKind::RouteDeviation => 0,
            AnomalyKind::Inactivity => 1,
            AnomalyKind::SpeedAnomaly => 2,
            AnomalyKind::VitalsAnomaly => 3,
            AnomalyKind::DeviceConnectivity => 4,
            AnomalyKind::BehaviorPattern => 5,
            AnomalyKind::LearnedPattern => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// One detector's finding for one tourist in one cycle
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub tourist_id: TouristId,
    pub kind: AnomalyKind,
    pub severity: Severity,
    /// Normalized [0,1] confidence that the tourist is in danger
    pub risk_score: f64,
    /// Detector-specific structured payload
    pub details: serde_json::Value,
    pub timestamp_ms: u64,
    pub description: String,
}

impl AnomalyRecord {
    pub fn new(
        tourist_id: TouristId,
        kind: AnomalyKind,
        severity: Severity,
        risk_score: f64,
        details: serde_json::Value,
        timestamp_ms: u64,
        description: String,
    ) -> Self {
        Self {
            tourist_id,
            kind,
            severity,
            risk_score: risk_score.clamp(0.0, 1.0),
            details,
            timestamp_ms,
            description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_clamped() {
        let record = AnomalyRecord::new(
            TouristId::new("t1"),
            AnomalyKind::VitalsAnomaly,
            Severity::High,
            1.67,
            serde_json::json!({"heart_rate": 400.0}),
            1000,
            "Abnormal heart rate detected: 400 BPM".to_string(),
        );
        assert_eq!(record.risk_score, 1.0);
    }

    #[test]
    fn test_kind_index_matches_order() {
        for (i, kind) in ANOMALY_KINDS.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_serializes_snake_case() {
        let record = AnomalyRecord::new(
            TouristId::new("t1"),
            AnomalyKind::RouteDeviation,
            Severity::Medium,
            0.5,
            serde_json::json!({"deviation_m": 750}),
            1000,
            "Tourist deviated 750m from expected route".to_string(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "route_deviation");
        assert_eq!(json["severity"], "medium");
        assert_eq!(json["details"]["deviation_m"], 750);
    }
}
