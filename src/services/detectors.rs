//! Multi-signal anomaly detection engine
//!
//! Runs an independent detector set against a consistent snapshot of a
//! tourist's state. Each detector yields at most one record per cycle; no
//! detector suppresses another, and a detector failure (e.g. a malformed
//! itinerary) is isolated as a structured diagnostic so the remaining
//! detectors still run. Every threshold lives in `DetectorThresholds`,
//! carried by the engine rather than ambient global state.

use crate::domain::anomaly::{AnomalyKind, AnomalyRecord, Severity};
use crate::domain::geo::{bearing_degrees, distance_meters};
use crate::domain::types::{Position, TouristId, TouristState};
use crate::services::model::{FeatureVector, RiskModel, FEATURE_NAMES};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

/// Externally tunable detector thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorThresholds {
    /// Route deviation trigger distance (meters)
    pub route_deviation_m: f64,
    /// Inactivity trigger (milliseconds)
    pub inactivity_ms: u64,
    /// Speed anomaly trigger (km/h)
    pub speed_kmh: f64,
    /// Normal heart rate band (bpm)
    pub heart_rate_min: f64,
    pub heart_rate_max: f64,
    /// Critical heart rate band: readings beyond it are high severity
    pub heart_rate_critical_min: f64,
    pub heart_rate_critical_max: f64,
    /// Device sync staleness trigger (milliseconds)
    pub sync_stale_ms: u64,
    /// Staleness beyond which connectivity loss is high severity
    pub sync_critical_ms: u64,
    /// 24h incident count that marks a behavior pattern
    pub incident_threshold: u32,
    /// Learned-model confidence trigger and high-severity cut
    pub model_confidence: f64,
    pub model_high_confidence: f64,
}

impl Default for DetectorThresholds {
    fn default() -> Self {
        Self {
            route_deviation_m: 500.0,
            inactivity_ms: 30 * 60 * 1000,
            speed_kmh: 50.0,
            heart_rate_min: 50.0,
            heart_rate_max: 150.0,
            heart_rate_critical_min: 40.0,
            heart_rate_critical_max: 180.0,
            sync_stale_ms: 60 * 60 * 1000,
            sync_critical_ms: 180 * 60 * 1000,
            incident_threshold: 3,
            model_confidence: 0.7,
            model_high_confidence: 0.85,
        }
    }
}

/// A detector that could not run for one tourist. Surfaced to the caller so
/// a failed check is never mistaken for "safe".
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorFailure {
    pub kind: AnomalyKind,
    pub tourist_id: TouristId,
    pub reason: String,
}

/// One evaluation cycle's output
#[derive(Debug, Default)]
pub struct DetectionReport {
    pub anomalies: Vec<AnomalyRecord>,
    pub failures: Vec<DetectorFailure>,
}

impl DetectionReport {
    pub fn merge(&mut self, other: DetectionReport) {
        self.anomalies.extend(other.anomalies);
        self.failures.extend(other.failures);
    }
}

/// Expected-route point as stored in the itinerary JSON
#[derive(Debug, Deserialize)]
struct RoutePoint {
    latitude: f64,
    longitude: f64,
}

/// Detection engine: thresholds plus an optional learned model
pub struct AnomalyEngine {
    thresholds: DetectorThresholds,
    model: Option<Box<dyn RiskModel>>,
}

impl AnomalyEngine {
    pub fn new(thresholds: DetectorThresholds, model: Option<Box<dyn RiskModel>>) -> Self {
        Self { thresholds, model }
    }

    pub fn thresholds(&self) -> &DetectorThresholds {
        &self.thresholds
    }

    /// Run every detector against one tourist snapshot.
    ///
    /// Detectors are order-insensitive and isolated: a failing detector is
    /// reported and skipped, the rest still run.
    pub fn evaluate_tourist(&self, state: &TouristState, now_ms: u64) -> DetectionReport {
        let mut report = DetectionReport::default();

        let checks: [(AnomalyKind, Result<Option<AnomalyRecord>, String>); 7] = [
            (AnomalyKind::RouteDeviation, self.detect_route_deviation(state, now_ms)),
            (AnomalyKind::Inactivity, self.detect_inactivity(state, now_ms)),
            (AnomalyKind::SpeedAnomaly, self.detect_speed_anomaly(state, now_ms)),
            (AnomalyKind::VitalsAnomaly, self.detect_vitals_anomaly(state, now_ms)),
            (AnomalyKind::DeviceConnectivity, self.detect_device_connectivity(state, now_ms)),
            (AnomalyKind::BehaviorPattern, self.detect_behavior_pattern(state, now_ms)),
            (AnomalyKind::LearnedPattern, self.detect_learned_pattern(state, now_ms)),
        ];

        for (kind, result) in checks {
            match result {
                Ok(Some(record)) => {
                    debug!(
                        tourist_id = %record.tourist_id,
                        kind = %kind.as_str(),
                        severity = %record.severity.as_str(),
                        risk_score = %record.risk_score,
                        "anomaly_detected"
                    );
                    report.anomalies.push(record);
                }
                Ok(None) => {}
                Err(reason) => {
                    warn!(
                        tourist_id = %state.id,
                        kind = %kind.as_str(),
                        reason = %reason,
                        "detector_failed"
                    );
                    report.failures.push(DetectorFailure {
                        kind,
                        tourist_id: state.id.clone(),
                        reason,
                    });
                }
            }
        }

        report
    }

    /// Batch contract: evaluate a snapshot of all active tourists
    pub fn detect_all<'a, I>(&self, tourists: I, now_ms: u64) -> DetectionReport
    where
        I: IntoIterator<Item = &'a TouristState>,
    {
        let mut report = DetectionReport::default();
        for state in tourists {
            report.merge(self.evaluate_tourist(state, now_ms));
        }
        report
    }

    fn detect_route_deviation(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        let Some(route_json) = state.expected_route.as_deref() else {
            return Ok(None);
        };
        let Some(current) = state.current_position else {
            return Ok(None);
        };

        let route: Vec<RoutePoint> = serde_json::from_str(route_json)
            .map_err(|e| format!("malformed expected route: {e}"))?;
        if route.is_empty() {
            return Ok(None);
        }

        // Linear scan, first-encountered minimum wins
        let mut nearest = &route[0];
        let mut min_distance = point_distance(&current, nearest);
        for point in &route[1..] {
            let d = point_distance(&current, point);
            if d < min_distance {
                min_distance = d;
                nearest = point;
            }
        }

        let threshold = self.thresholds.route_deviation_m;
        if min_distance <= threshold {
            return Ok(None);
        }

        let severity =
            if min_distance > threshold * 2.0 { Severity::High } else { Severity::Medium };
        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::RouteDeviation,
            severity,
            (min_distance / threshold).min(1.0),
            json!({
                "deviation_m": min_distance.round(),
                "expected": {"latitude": nearest.latitude, "longitude": nearest.longitude},
                "current": {"latitude": current.latitude, "longitude": current.longitude},
            }),
            now_ms,
            format!("Tourist deviated {}m from expected route", min_distance.round()),
        )))
    }

    fn detect_inactivity(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        let inactive_ms = now_ms.saturating_sub(state.last_activity_ms);
        let threshold = self.thresholds.inactivity_ms;
        if inactive_ms <= threshold {
            return Ok(None);
        }

        let score = (inactive_ms as f64 / (threshold as f64 * 2.0)).min(1.0);
        let severity = if score > 0.7 { Severity::High } else { Severity::Medium };
        let inactive_minutes = inactive_ms / 60_000;
        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::Inactivity,
            severity,
            score,
            json!({
                "inactive_minutes": inactive_minutes,
                "last_activity_ms": state.last_activity_ms,
                "last_position": state.current_position,
            }),
            now_ms,
            format!("Tourist inactive for {inactive_minutes} minutes"),
        )))
    }

    fn detect_speed_anomaly(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        let Some((prev, current)) = state.last_segment() else {
            return Ok(None);
        };
        let elapsed_ms = current.timestamp_ms.saturating_sub(prev.timestamp_ms);
        if elapsed_ms == 0 {
            // No implied speed without a time delta
            return Ok(None);
        }

        let distance_m = distance_meters(prev, current);
        let speed_kmh = distance_m / (elapsed_ms as f64 / 1000.0) * 3.6;
        let threshold = self.thresholds.speed_kmh;
        if speed_kmh <= threshold {
            return Ok(None);
        }

        let severity =
            if speed_kmh > threshold * 2.0 { Severity::High } else { Severity::Medium };
        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::SpeedAnomaly,
            severity,
            (speed_kmh / (threshold * 2.0)).min(1.0),
            json!({
                "speed_kmh": speed_kmh.round(),
                "distance_m": distance_m.round(),
                "time_secs": elapsed_ms / 1000,
                "bearing_deg": bearing_degrees(prev, current).round(),
            }),
            now_ms,
            format!("Unusual speed detected: {} km/h", speed_kmh.round()),
        )))
    }

    fn detect_vitals_anomaly(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        let Some(heart_rate) = state.vitals.and_then(|v| v.heart_rate) else {
            return Ok(None);
        };

        let t = &self.thresholds;
        if (t.heart_rate_min..=t.heart_rate_max).contains(&heart_rate) {
            return Ok(None);
        }

        let score = if heart_rate < t.heart_rate_min {
            (t.heart_rate_min - heart_rate) / t.heart_rate_min
        } else {
            (heart_rate - t.heart_rate_max) / t.heart_rate_max
        };
        let severity = if heart_rate < t.heart_rate_critical_min
            || heart_rate > t.heart_rate_critical_max
        {
            Severity::High
        } else {
            Severity::Medium
        };

        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::VitalsAnomaly,
            severity,
            score,
            json!({
                "heart_rate": heart_rate,
                "normal_range": {"min": t.heart_rate_min, "max": t.heart_rate_max},
            }),
            now_ms,
            format!("Abnormal heart rate detected: {heart_rate} BPM"),
        )))
    }

    fn detect_device_connectivity(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        let Some(vitals) = state.vitals else {
            return Ok(None);
        };

        let staleness_ms = now_ms.saturating_sub(vitals.last_sync_ms);
        if staleness_ms <= self.thresholds.sync_stale_ms {
            return Ok(None);
        }

        let critical = self.thresholds.sync_critical_ms;
        let severity = if staleness_ms > critical { Severity::High } else { Severity::Medium };
        let sync_age_minutes = staleness_ms / 60_000;
        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::DeviceConnectivity,
            severity,
            (staleness_ms as f64 / critical as f64).min(1.0),
            json!({
                "sync_age_minutes": sync_age_minutes,
                "last_sync_ms": vitals.last_sync_ms,
                "battery_pct": vitals.battery_pct,
            }),
            now_ms,
            format!("Device not synced for {sync_age_minutes} minutes"),
        )))
    }

    fn detect_behavior_pattern(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        if state.incident_count_24h < self.thresholds.incident_threshold {
            return Ok(None);
        }

        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::BehaviorPattern,
            Severity::High,
            0.8,
            json!({
                "incident_count": state.incident_count_24h,
                "timeframe": "24 hours",
            }),
            now_ms,
            format!(
                "Multiple incidents ({}) reported in 24 hours",
                state.incident_count_24h
            ),
        )))
    }

    fn detect_learned_pattern(
        &self,
        state: &TouristState,
        now_ms: u64,
    ) -> Result<Option<AnomalyRecord>, String> {
        // Model not loaded is non-fatal: skip, rule-based detectors still ran
        let Some(model) = self.model.as_deref() else {
            return Ok(None);
        };

        let features = FeatureVector::from_state(state, now_ms);
        let confidence = model.score(&features);
        if !(0.0..=1.0).contains(&confidence) {
            return Err(format!("model returned out-of-range confidence {confidence}"));
        }
        if confidence <= self.thresholds.model_confidence {
            return Ok(None);
        }

        let severity = if confidence > self.thresholds.model_high_confidence {
            Severity::High
        } else {
            Severity::Medium
        };
        Ok(Some(AnomalyRecord::new(
            state.id.clone(),
            AnomalyKind::LearnedPattern,
            severity,
            confidence,
            json!({
                "features": FEATURE_NAMES,
                "confidence": confidence,
                "model": model.version(),
            }),
            now_ms,
            format!("Distress pattern detected (confidence: {}%)", (confidence * 100.0).round()),
        )))
    }
}

fn point_distance(current: &Position, point: &RoutePoint) -> f64 {
    let route_pos = Position::new(point.latitude, point.longitude, 0);
    distance_meters(current, &route_pos)
}
