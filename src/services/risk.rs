//! Risk aggregation and dispatch policy
//!
//! Merges a cycle's anomaly records into the tourist's risk state. The
//! aggregate is the maximum of the individual detector scores, not a sum:
//! several independent weak signals must not compound into a false
//! high-confidence alert. Status escalates automatically and only
//! de-escalates on explicit external acknowledgment, so one quiet cycle
//! never flaps an at-risk tourist back to safe.

use crate::domain::anomaly::{AnomalyKind, AnomalyRecord, Severity};
use crate::domain::types::{TouristId, TouristState, TouristStatus};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::{info, warn};
use uuid::Uuid;

/// Generate a new UUIDv7 (time-sortable)
pub fn new_uuid_v7() -> String {
    Uuid::now_v7().to_string()
}

/// Emitted exactly once per transition into `Emergency`, consumed by the
/// incident-management collaborator
#[derive(Debug, Clone, Serialize)]
pub struct DispatchEvent {
    pub incident_id: String,
    pub tourist_id: TouristId,
    pub previous_status: TouristStatus,
    pub risk_score: f64,
    /// Detector kinds behind the escalation; empty for a pure panic signal
    pub triggered_by: Vec<AnomalyKind>,
    pub panic: bool,
    pub timestamp_ms: u64,
    pub position: Option<crate::domain::types::Position>,
}

/// Outcome of folding one cycle into a tourist's state
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Set when the status escalated this cycle
    pub transition: Option<(TouristStatus, TouristStatus)>,
    pub dispatch: Option<DispatchEvent>,
}

/// Merge a cycle's records into `state` and apply the status machine.
///
/// `panic` marks an explicit distress signal, which forces an emergency
/// proposal regardless of detector output.
pub fn aggregate_cycle(
    state: &mut TouristState,
    records: &[AnomalyRecord],
    panic: bool,
    now_ms: u64,
) -> CycleOutcome {
    let max_score = records.iter().map(|r| r.risk_score).fold(0.0f64, f64::max);
    state.risk_score = if panic { 1.0 } else { max_score };

    let proposed = if panic || records.iter().any(|r| r.severity == Severity::High) {
        Some(TouristStatus::Emergency)
    } else if records.iter().any(|r| r.severity == Severity::Medium) {
        Some(TouristStatus::AtRisk)
    } else {
        None
    };

    let mut outcome = CycleOutcome::default();
    let Some(proposed) = proposed else {
        return outcome;
    };

    // Monotonic escalation only; de-escalation is `acknowledge`'s job
    if proposed <= state.status {
        return outcome;
    }

    let previous = state.status;
    state.status = proposed;
    outcome.transition = Some((previous, proposed));
    info!(
        tourist_id = %state.id,
        from = %previous.as_str(),
        to = %proposed.as_str(),
        risk_score = %state.risk_score,
        panic = %panic,
        "status_escalated"
    );

    if proposed == TouristStatus::Emergency {
        let triggered_by: SmallVec<[AnomalyKind; 4]> = records
            .iter()
            .filter(|r| r.severity == Severity::High)
            .map(|r| r.kind)
            .collect();
        outcome.dispatch = Some(DispatchEvent {
            incident_id: new_uuid_v7(),
            tourist_id: state.id.clone(),
            previous_status: previous,
            risk_score: state.risk_score,
            triggered_by: triggered_by.into_vec(),
            panic,
            timestamp_ms: now_ms,
            position: state.current_position,
        });
    }

    outcome
}

/// External acknowledgment: the only path that lowers a status.
///
/// Returns the previous status when the acknowledgment changed anything.
pub fn acknowledge(state: &mut TouristState, status: TouristStatus) -> Option<TouristStatus> {
    if state.status == status {
        return None;
    }
    let previous = state.status;
    state.status = status;
    if status < previous {
        state.risk_score = 0.0;
    }
    warn!(
        tourist_id = %state.id,
        from = %previous.as_str(),
        to = %status.as_str(),
        "status_acknowledged"
    );
    Some(previous)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: AnomalyKind, severity: Severity, score: f64) -> AnomalyRecord {
        AnomalyRecord::new(
            TouristId::new("t1"),
            kind,
            severity,
            score,
            serde_json::json!({}),
            1000,
            "test".to_string(),
        )
    }

    fn fresh_state() -> TouristState {
        TouristState::new(TouristId::new("t1"), 100, 0)
    }

    #[test]
    fn test_risk_score_is_max_not_sum() {
        let mut state = fresh_state();
        let records = vec![
            record(AnomalyKind::Inactivity, Severity::Medium, 0.6),
            record(AnomalyKind::SpeedAnomaly, Severity::Medium, 0.4),
            record(AnomalyKind::DeviceConnectivity, Severity::Medium, 0.5),
        ];

        aggregate_cycle(&mut state, &records, false, 1000);
        assert_eq!(state.risk_score, 0.6);
        assert_eq!(state.status, TouristStatus::AtRisk);
    }

    #[test]
    fn test_high_severity_escalates_to_emergency_with_dispatch() {
        let mut state = fresh_state();
        let records = vec![record(AnomalyKind::VitalsAnomaly, Severity::High, 0.9)];

        let outcome = aggregate_cycle(&mut state, &records, false, 1000);
        assert_eq!(state.status, TouristStatus::Emergency);
        assert_eq!(outcome.transition, Some((TouristStatus::Safe, TouristStatus::Emergency)));

        let dispatch = outcome.dispatch.unwrap();
        assert_eq!(dispatch.tourist_id, TouristId::new("t1"));
        assert_eq!(dispatch.triggered_by, vec![AnomalyKind::VitalsAnomaly]);
        assert!(!dispatch.panic);
        assert!(!dispatch.incident_id.is_empty());
    }

    #[test]
    fn test_dispatch_only_once_per_transition() {
        let mut state = fresh_state();
        let records = vec![record(AnomalyKind::VitalsAnomaly, Severity::High, 0.9)];

        let first = aggregate_cycle(&mut state, &records, false, 1000);
        assert!(first.dispatch.is_some());

        // Same anomaly next cycle: still emergency, no second dispatch
        let second = aggregate_cycle(&mut state, &records, false, 2000);
        assert!(second.dispatch.is_none());
        assert!(second.transition.is_none());
    }

    #[test]
    fn test_status_persists_through_quiet_cycle() {
        let mut state = fresh_state();
        aggregate_cycle(
            &mut state,
            &[record(AnomalyKind::Inactivity, Severity::Medium, 0.5)],
            false,
            1000,
        );
        assert_eq!(state.status, TouristStatus::AtRisk);

        // No anomalies in cycle 2: status must not decay
        aggregate_cycle(&mut state, &[], false, 2000);
        assert_eq!(state.status, TouristStatus::AtRisk);
    }

    #[test]
    fn test_panic_forces_emergency() {
        let mut state = fresh_state();
        let outcome = aggregate_cycle(&mut state, &[], true, 1000);

        assert_eq!(state.status, TouristStatus::Emergency);
        assert_eq!(state.risk_score, 1.0);
        let dispatch = outcome.dispatch.unwrap();
        assert!(dispatch.panic);
        assert!(dispatch.triggered_by.is_empty());
    }

    #[test]
    fn test_panic_while_emergency_does_not_redispatch() {
        let mut state = fresh_state();
        assert!(aggregate_cycle(&mut state, &[], true, 1000).dispatch.is_some());
        assert!(aggregate_cycle(&mut state, &[], true, 2000).dispatch.is_none());
    }

    #[test]
    fn test_medium_never_downgrades_emergency() {
        let mut state = fresh_state();
        aggregate_cycle(&mut state, &[], true, 1000);

        aggregate_cycle(
            &mut state,
            &[record(AnomalyKind::Inactivity, Severity::Medium, 0.5)],
            false,
            2000,
        );
        assert_eq!(state.status, TouristStatus::Emergency);
    }

    #[test]
    fn test_acknowledge_de_escalates_and_resets_score() {
        let mut state = fresh_state();
        aggregate_cycle(&mut state, &[], true, 1000);
        assert_eq!(state.status, TouristStatus::Emergency);

        let previous = acknowledge(&mut state, TouristStatus::Safe);
        assert_eq!(previous, Some(TouristStatus::Emergency));
        assert_eq!(state.status, TouristStatus::Safe);
        assert_eq!(state.risk_score, 0.0);

        // Re-escalation after ack dispatches again
        let outcome = aggregate_cycle(&mut state, &[], true, 3000);
        assert!(outcome.dispatch.is_some());
    }

    #[test]
    fn test_acknowledge_same_status_is_noop() {
        let mut state = fresh_state();
        assert!(acknowledge(&mut state, TouristStatus::Safe).is_none());
    }
}
