//! Integration tests for configuration loading

use std::io::Write;
use tempfile::NamedTempFile;
use tourguard::infra::Config;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "test-site"

[ingest]
listener_port = 28700

[zones]
file = "config/test-zones.json"
reload_secs = 30

[detection]
route_deviation_m = 750.0
inactivity_secs = 1200
speed_kmh = 60.0
heart_rate_min = 45.0
heart_rate_max = 160.0
incident_threshold = 5
sweep_interval_secs = 15
history_retention = 50

[model]
enabled = false

[spatial]
grid_size = 30
cluster_radius_deg = 0.002

[metrics]
interval_secs = 15
http_port = 9991

[egress]
alerts_file = "out/alerts.jsonl"
incidents_file = "out/incidents.jsonl"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "test-site");
    assert_eq!(config.listener_port(), 28700);
    assert_eq!(config.zones_file(), "config/test-zones.json");
    assert_eq!(config.zones_reload_secs(), 30);
    assert_eq!(config.history_retention(), 50);
    assert_eq!(config.sweep_interval_secs(), 15);
    assert_eq!(config.grid_size(), 30);
    assert_eq!(config.http_port(), 9991);
    assert_eq!(config.alerts_file(), "out/alerts.jsonl");
    assert_eq!(config.incidents_file(), "out/incidents.jsonl");

    let thresholds = config.thresholds();
    assert_eq!(thresholds.route_deviation_m, 750.0);
    assert_eq!(thresholds.inactivity_ms, 1200 * 1000);
    assert_eq!(thresholds.speed_kmh, 60.0);
    assert_eq!(thresholds.heart_rate_min, 45.0);
    assert_eq!(thresholds.heart_rate_max, 160.0);
    assert_eq!(thresholds.incident_threshold, 5);

    assert!(config.risk_model().is_none());

    let spatial = config.spatial_params();
    assert_eq!(spatial.cluster_radius_deg, 0.002);
}

#[test]
fn test_partial_config_uses_section_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[site]
id = "partial"
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.site_id(), "partial");
    assert_eq!(config.listener_port(), 27600);
    assert_eq!(config.history_retention(), 100);
    assert_eq!(config.thresholds().route_deviation_m, 500.0);
    assert!(config.risk_model().is_some());
}

#[test]
fn test_load_from_path_fallback() {
    // Nonexistent file falls back to defaults rather than failing
    let config = Config::load_from_path("/nonexistent/path/config.toml");
    assert_eq!(config.site_id(), "tourguard");
    assert_eq!(config.listener_port(), 27600);
}

#[test]
fn test_model_weights_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file
        .write_all(
            br#"
[model]
enabled = true
weights = [1.0, 0.5, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 3.0]
bias = -1.5
"#,
        )
        .unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    let model = config.risk_model().unwrap();
    assert_eq!(model.weights[0], 1.0);
    assert_eq!(model.weights[9], 3.0);
    assert_eq!(model.bias, -1.5);
}
