//! End-to-end pipeline tests: update ingestion through dispatch egress

use std::fs;
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;
use tourguard::domain::types::{epoch_ms, ParsedUpdate, TouristStatus, UpdateMessage};
use tourguard::infra::{Config, Metrics};
use tourguard::services::{AnomalyEngine, DashboardState, GeofenceEngine, Monitor};

fn parsed(json: &str) -> ParsedUpdate {
    let msg: UpdateMessage = serde_json::from_str(json).unwrap();
    msg.into_parsed(epoch_ms()).unwrap()
}

struct Pipeline {
    monitor: Monitor,
    dashboard: Arc<DashboardState>,
    geofence: Arc<GeofenceEngine>,
    metrics: Arc<Metrics>,
    alerts_path: std::path::PathBuf,
    incidents_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

fn pipeline() -> Pipeline {
    let dir = tempdir().unwrap();
    let alerts_path = dir.path().join("alerts.jsonl");
    let incidents_path = dir.path().join("incidents.jsonl");
    let zones_path = dir.path().join("zones.json");

    fs::write(
        &zones_path,
        r#"[{
            "id": "TSQ",
            "name": "Times Square",
            "risk_level": "high",
            "boundary": {
                "type": "circle",
                "center_lat": 40.7580,
                "center_lon": -73.9855,
                "radius_m": 100.0
            },
            "alert_config": {"trigger_on_entry": true}
        }]"#,
    )
    .unwrap();

    let config_path = dir.path().join("config.toml");
    let mut config_file = fs::File::create(&config_path).unwrap();
    write!(
        config_file,
        r#"
[site]
id = "pipeline-test"

[egress]
alerts_file = "{}"
incidents_file = "{}"
"#,
        alerts_path.display(),
        incidents_path.display()
    )
    .unwrap();

    let config = Config::from_file(&config_path).unwrap();
    let geofence = Arc::new(GeofenceEngine::new());
    let zones: Vec<tourguard::domain::zone::GeofenceZone> =
        serde_json::from_str(&fs::read_to_string(&zones_path).unwrap()).unwrap();
    geofence.replace_snapshot(zones).unwrap();

    let anomaly = AnomalyEngine::new(config.thresholds(), None);
    let metrics = Arc::new(Metrics::new());
    let dashboard = Arc::new(DashboardState::new());
    let monitor =
        Monitor::new(config, geofence.clone(), anomaly, metrics.clone(), dashboard.clone());

    Pipeline { monitor, dashboard, geofence, metrics, alerts_path, incidents_path, _dir: dir }
}

#[test]
fn test_zone_alert_written_for_entry_alert_zone() {
    let mut p = pipeline();
    p.monitor.process_update(parsed(
        r#"{"id":"t1","type":"location","lat":40.7580,"lon":-73.9855,"ts":1000}"#,
    ));

    let content = fs::read_to_string(&p.alerts_path).unwrap();
    let entry: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(entry["event"], "zone_alert");
    assert_eq!(entry["site"], "pipeline-test");
    assert_eq!(entry["zone_id"], "TSQ");
    assert_eq!(entry["occupancy"], 1);

    // The matched zone's occupancy incremented
    assert_eq!(p.geofence.occupancy_snapshot()[0].2, 1);
}

#[test]
fn test_panic_writes_incident_exactly_once() {
    let mut p = pipeline();
    p.monitor.process_update(parsed(
        r#"{"id":"t1","type":"location","lat":40.0,"lon":-73.0,"ts":1000}"#,
    ));
    p.monitor.process_update(parsed(r#"{"id":"t1","type":"panic"}"#));
    p.monitor.process_update(parsed(r#"{"id":"t1","type":"panic"}"#));

    let content = fs::read_to_string(&p.incidents_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 1);

    let incident: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(incident["tourist_id"], "t1");
    assert_eq!(incident["panic"], true);
    assert_eq!(incident["risk_score"], 1.0);
    assert!(incident["incident_id"].as_str().unwrap().len() == 36);
}

#[test]
fn test_silent_tourist_escalates_via_sweep() {
    let mut p = pipeline();
    let now = epoch_ms();
    p.monitor.process_update(parsed(&format!(
        r#"{{"id":"t1","type":"location","lat":40.0,"lon":-73.0,"ts":{now}}}"#
    )));

    // 50 minutes of silence, then a sweep
    p.monitor.sweep(now + 50 * 60_000);

    let entries = p.dashboard.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, TouristStatus::Emergency);

    // The inactivity record landed in the alert feed and an incident was cut
    let alerts = fs::read_to_string(&p.alerts_path).unwrap();
    assert!(alerts.contains("\"inactivity\""));
    let incidents = fs::read_to_string(&p.incidents_path).unwrap();
    assert_eq!(incidents.lines().count(), 1);

    let summary = p.metrics.report();
    assert_eq!(summary.sweeps, 1);
    assert_eq!(summary.dispatches, 1);
    assert_eq!(summary.emergency_tourists, 1);
}

#[test]
fn test_ack_after_emergency_restores_safe() {
    let mut p = pipeline();
    p.monitor.process_update(parsed(r#"{"id":"t1","type":"panic"}"#));
    p.monitor.process_update(parsed(r#"{"id":"t1","type":"ack","status":"safe"}"#));
    p.monitor.sweep(epoch_ms());

    let summary = p.metrics.report();
    assert_eq!(summary.emergency_tourists, 0);
    assert_eq!(summary.acks, 1);
}

#[test]
fn test_malformed_route_surfaces_detector_failure() {
    let mut p = pipeline();
    let now = epoch_ms();
    p.monitor.process_update(parsed(&format!(
        r#"{{"id":"t1","type":"location","lat":40.0,"lon":-73.0,"ts":{now}}}"#
    )));
    // Route arrives as a bare string instead of a position array
    p.monitor.process_update(parsed(r#"{"id":"t1","type":"route","route":"oops"}"#));
    p.monitor.process_update(parsed(&format!(
        r#"{{"id":"t1","type":"location","lat":40.0001,"lon":-73.0,"ts":{}}}"#,
        now + 60_000
    )));

    let alerts = fs::read_to_string(&p.alerts_path).unwrap();
    assert!(alerts.contains("detector_failed"));
    assert!(alerts.contains("route_deviation"));
    assert_eq!(p.metrics.report().detector_failures, 1);
}
