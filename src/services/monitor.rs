//! Tourist state tracking and update orchestration
//!
//! The Monitor is the central update processor that coordinates:
//! - Tourist state management (positions, history, vitals)
//! - Geofence evaluation and zone alert surfacing
//! - Anomaly detection (per update, plus a periodic batch sweep)
//! - Risk aggregation and incident dispatch
//!
//! All per-tourist mutation happens inside this single consumer task, which
//! serializes writers per tourist by construction. The periodic sweep also
//! rebuilds zone occupancy from the live position set and refreshes the
//! dashboard snapshot read by the HTTP query endpoints.

use crate::domain::types::{
    epoch_ms, ParsedUpdate, Position, TouristId, TouristState, TouristStatus, UpdateKind, Vitals,
};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::alerts::AlertEgress;
use crate::services::detectors::{AnomalyEngine, DetectionReport};
use crate::services::geofence::GeofenceEngine;
use crate::services::risk;
use crate::services::spatial::ClusterEntry;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

/// One tourist's row in the dashboard snapshot
#[derive(Debug, Clone)]
pub struct DashboardEntry {
    pub id: TouristId,
    pub position: Position,
    pub status: TouristStatus,
    pub risk_score: f64,
}

/// Point-in-time view of the tracked population, shared with the HTTP layer.
/// The monitor replaces it on every sweep; readers never block ingestion.
#[derive(Default)]
pub struct DashboardState {
    entries: RwLock<Arc<Vec<DashboardEntry>>>,
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, entries: Vec<DashboardEntry>) {
        *self.entries.write() = Arc::new(entries);
    }

    pub fn entries(&self) -> Arc<Vec<DashboardEntry>> {
        self.entries.read().clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.entries.read().iter().map(|e| e.position).collect()
    }

    pub fn cluster_entries(&self) -> Vec<ClusterEntry> {
        self.entries
            .read()
            .iter()
            .map(|e| ClusterEntry {
                id: e.id.clone(),
                latitude: e.position.latitude,
                longitude: e.position.longitude,
                status: e.status,
            })
            .collect()
    }
}

/// Central update processor for tourist safety monitoring
pub struct Monitor {
    /// Tracked tourists by id
    pub(crate) tourists: FxHashMap<TouristId, TouristState>,
    /// Containment engine over the active zone snapshot
    pub(crate) geofence: Arc<GeofenceEngine>,
    /// Detector set plus learned model
    pub(crate) anomaly: AnomalyEngine,
    /// Application configuration
    pub(crate) config: Config,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    /// Alert feed and incident egress
    pub(crate) egress: AlertEgress,
    /// Shared dashboard snapshot
    pub(crate) dashboard: Arc<DashboardState>,
}

impl Monitor {
    pub fn new(
        config: Config,
        geofence: Arc<GeofenceEngine>,
        anomaly: AnomalyEngine,
        metrics: Arc<Metrics>,
        dashboard: Arc<DashboardState>,
    ) -> Self {
        let egress =
            AlertEgress::new(config.site_id(), config.alerts_file(), config.incidents_file());
        Self {
            tourists: FxHashMap::default(),
            geofence,
            anomaly,
            config,
            metrics,
            egress,
            dashboard,
        }
    }

    /// Start the monitor, consuming updates from the channel
    pub async fn run(&mut self, mut update_rx: mpsc::Receiver<ParsedUpdate>) {
        let mut sweep_interval =
            interval(Duration::from_secs(self.config.sweep_interval_secs().max(1)));
        // First tick fires immediately; skip it so a fresh start is quiet
        sweep_interval.tick().await;

        loop {
            tokio::select! {
                update = update_rx.recv() => {
                    match update {
                        Some(u) => self.process_update(u),
                        None => break, // Channel closed
                    }
                }
                _ = sweep_interval.tick() => {
                    self.sweep(epoch_ms());
                }
            }
        }
    }

    /// Process a single update, dispatching on its kind
    pub fn process_update(&mut self, update: ParsedUpdate) {
        let received_at = update.received_at;
        let now_ms = epoch_ms();

        match update.kind {
            UpdateKind::Location { position, vitals } => {
                self.handle_location(&update.tourist_id, position, vitals, now_ms);
            }
            UpdateKind::Panic => {
                self.handle_panic(&update.tourist_id, now_ms);
            }
            UpdateKind::Acknowledge(status) => {
                self.handle_acknowledge(&update.tourist_id, status);
            }
            UpdateKind::IncidentCount(count) => {
                let state = self.state_mut(&update.tourist_id, now_ms);
                state.incident_count_24h = count;
            }
            UpdateKind::Route(route) => {
                let state = self.state_mut(&update.tourist_id, now_ms);
                state.expected_route = route;
            }
            UpdateKind::Unknown(kind) => {
                debug!(
                    tourist_id = %update.tourist_id,
                    kind = %kind,
                    event_time_ms = %update.event_time_ms,
                    "unknown_update_ignored"
                );
            }
        }

        // Receipt-to-processed latency, including queue wait
        let latency_us = received_at.elapsed().as_micros() as u64;
        self.metrics.record_update_processed(latency_us);
    }

    fn state_mut(&mut self, tourist_id: &TouristId, now_ms: u64) -> &mut TouristState {
        let retention = self.config.history_retention();
        self.tourists
            .entry(tourist_id.clone())
            .or_insert_with(|| TouristState::new(tourist_id.clone(), retention, now_ms))
    }

    /// Handle a location ping: fold the fix into state, evaluate geofences,
    /// run the detector set, and merge the cycle into the risk state.
    fn handle_location(
        &mut self,
        tourist_id: &TouristId,
        position: Position,
        vitals: Option<Vitals>,
        now_ms: u64,
    ) {
        // Geofence evaluation validates coordinates; an invalid fix is
        // rejected before it can pollute history
        let matches = match self.geofence.evaluate(&position, now_ms) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(tourist_id = %tourist_id, error = %e, "invalid_position_rejected");
                self.metrics.record_invalid_update();
                return;
            }
        };

        let alerting = matches.iter().filter(|m| m.triggers_alert).count() as u64;
        self.metrics.record_zone_matches(matches.len() as u64, alerting);

        for zone in matches.iter().filter(|m| m.triggers_alert) {
            info!(
                tourist_id = %tourist_id,
                zone_id = %zone.zone_id,
                zone = %zone.name,
                risk_level = %zone.risk_level.as_str(),
                capacity_exceeded = %zone.capacity_exceeded,
                "zone_alert"
            );
            self.egress.write_zone_alert(tourist_id, zone, now_ms);
        }

        let retention = self.config.history_retention();
        let state = self
            .tourists
            .entry(tourist_id.clone())
            .or_insert_with(|| TouristState::new(tourist_id.clone(), retention, now_ms));
        state.record_position(position);
        if let Some(v) = vitals {
            state.vitals = Some(v);
            state.last_activity_ms = state.last_activity_ms.max(v.last_sync_ms);
        }

        // Detectors run on the freshly updated snapshot of this tourist only;
        // the periodic sweep covers tourists that have gone silent
        let report = self.anomaly.evaluate_tourist(state, now_ms);
        self.apply_report(tourist_id, report, false, now_ms);
    }

    fn handle_panic(&mut self, tourist_id: &TouristId, now_ms: u64) {
        warn!(tourist_id = %tourist_id, "panic_received");
        self.metrics.record_panic();

        let state = self.state_mut(tourist_id, now_ms);
        state.last_activity_ms = state.last_activity_ms.max(now_ms);
        let outcome = risk::aggregate_cycle(state, &[], true, now_ms);
        if let Some(dispatch) = outcome.dispatch {
            self.metrics.record_dispatch();
            self.egress.write_incident(&dispatch);
        }
    }

    fn handle_acknowledge(&mut self, tourist_id: &TouristId, status: TouristStatus) {
        self.metrics.record_ack();
        let Some(state) = self.tourists.get_mut(tourist_id) else {
            debug!(tourist_id = %tourist_id, "ack_for_unknown_tourist");
            return;
        };
        risk::acknowledge(state, status);
    }

    /// Fold one detection report into the tourist's risk state
    fn apply_report(
        &mut self,
        tourist_id: &TouristId,
        report: DetectionReport,
        panic: bool,
        now_ms: u64,
    ) {
        for record in &report.anomalies {
            self.metrics.record_anomaly(record.kind);
            self.egress.write_anomaly(record);
        }
        for failure in &report.failures {
            self.metrics.record_detector_failure();
            self.egress.write_detector_failure(failure, now_ms);
        }

        let Some(state) = self.tourists.get_mut(tourist_id) else {
            return;
        };
        let outcome = risk::aggregate_cycle(state, &report.anomalies, panic, now_ms);
        if let Some(dispatch) = outcome.dispatch {
            self.metrics.record_dispatch();
            self.egress.write_incident(&dispatch);
        }
    }

    /// Periodic batch pass over every tracked tourist.
    ///
    /// Detectors must fire for tourists that stopped sending updates (that is
    /// the whole point of the inactivity and connectivity checks), so the
    /// sweep runs the batch contract over a snapshot of all states, then
    /// rebuilds zone occupancy and refreshes the dashboard view.
    pub fn sweep(&mut self, now_ms: u64) {
        let report = self.anomaly.detect_all(self.tourists.values(), now_ms);

        // Group the batch output per tourist before folding it into state
        let mut by_tourist: FxHashMap<TouristId, DetectionReport> = FxHashMap::default();
        for record in report.anomalies {
            by_tourist.entry(record.tourist_id.clone()).or_default().anomalies.push(record);
        }
        for failure in report.failures {
            by_tourist.entry(failure.tourist_id.clone()).or_default().failures.push(failure);
        }
        let touched = by_tourist.len();
        for (tourist_id, tourist_report) in by_tourist {
            self.apply_report(&tourist_id, tourist_report, false, now_ms);
        }

        // Occupancy rebuild from the live position snapshot bounds counter
        // drift to one sweep interval
        let positions: Vec<Position> =
            self.tourists.values().filter_map(|t| t.current_position).collect();
        self.geofence.rebuild_occupancy(&positions);

        let entries: Vec<DashboardEntry> = self
            .tourists
            .values()
            .filter_map(|t| {
                t.current_position.map(|position| DashboardEntry {
                    id: t.id.clone(),
                    position,
                    status: t.status,
                    risk_score: t.risk_score,
                })
            })
            .collect();
        self.dashboard.replace(entries);

        let (mut safe, mut at_risk, mut emergency) = (0u64, 0u64, 0u64);
        for state in self.tourists.values() {
            match state.status {
                TouristStatus::Safe => safe += 1,
                TouristStatus::AtRisk => at_risk += 1,
                TouristStatus::Emergency => emergency += 1,
            }
        }
        self.metrics.set_population(self.tourists.len() as u64, safe, at_risk, emergency);
        self.metrics.record_sweep();

        debug!(
            tourists = %self.tourists.len(),
            flagged = %touched,
            "sweep_completed"
        );
    }

    /// Get current tracked tourist count
    pub fn active_tourists(&self) -> usize {
        self.tourists.len()
    }
}
