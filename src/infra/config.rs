//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::detectors::DetectorThresholds;
use crate::services::model::LogisticModel;
use crate::services::spatial::SpatialParams;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique deployment identifier (e.g. "shillong", "kaziranga")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "tourguard".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Enable the NDJSON TCP listener
    #[serde(default = "default_ingest_enabled")]
    pub listener_enabled: bool,
    /// TCP listener port for client pings
    #[serde(default = "default_ingest_port")]
    pub listener_port: u16,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { listener_enabled: default_ingest_enabled(), listener_port: default_ingest_port() }
    }
}

fn default_ingest_enabled() -> bool {
    true
}

fn default_ingest_port() -> u16 {
    27600
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZonesConfig {
    /// JSON file holding the geofence zone snapshot
    #[serde(default = "default_zones_file")]
    pub file: String,
    /// How often to re-read the snapshot file (0 to disable reloads)
    #[serde(default = "default_zones_reload_secs")]
    pub reload_secs: u64,
}

impl Default for ZonesConfig {
    fn default() -> Self {
        Self { file: default_zones_file(), reload_secs: default_zones_reload_secs() }
    }
}

fn default_zones_file() -> String {
    "config/zones.json".to_string()
}

fn default_zones_reload_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_route_deviation_m")]
    pub route_deviation_m: f64,
    #[serde(default = "default_inactivity_secs")]
    pub inactivity_secs: u64,
    #[serde(default = "default_speed_kmh")]
    pub speed_kmh: f64,
    #[serde(default = "default_heart_rate_min")]
    pub heart_rate_min: f64,
    #[serde(default = "default_heart_rate_max")]
    pub heart_rate_max: f64,
    #[serde(default = "default_heart_rate_critical_min")]
    pub heart_rate_critical_min: f64,
    #[serde(default = "default_heart_rate_critical_max")]
    pub heart_rate_critical_max: f64,
    #[serde(default = "default_sync_stale_secs")]
    pub sync_stale_secs: u64,
    #[serde(default = "default_sync_critical_secs")]
    pub sync_critical_secs: u64,
    #[serde(default = "default_incident_threshold")]
    pub incident_threshold: u32,
    #[serde(default = "default_model_confidence")]
    pub model_confidence: f64,
    #[serde(default = "default_model_high_confidence")]
    pub model_high_confidence: f64,
    /// Interval for the batch sweep over all tracked tourists
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How many location fixes to retain per tourist
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            route_deviation_m: default_route_deviation_m(),
            inactivity_secs: default_inactivity_secs(),
            speed_kmh: default_speed_kmh(),
            heart_rate_min: default_heart_rate_min(),
            heart_rate_max: default_heart_rate_max(),
            heart_rate_critical_min: default_heart_rate_critical_min(),
            heart_rate_critical_max: default_heart_rate_critical_max(),
            sync_stale_secs: default_sync_stale_secs(),
            sync_critical_secs: default_sync_critical_secs(),
            incident_threshold: default_incident_threshold(),
            model_confidence: default_model_confidence(),
            model_high_confidence: default_model_high_confidence(),
            sweep_interval_secs: default_sweep_interval_secs(),
            history_retention: default_history_retention(),
        }
    }
}

fn default_route_deviation_m() -> f64 {
    500.0
}

fn default_inactivity_secs() -> u64 {
    30 * 60
}

fn default_speed_kmh() -> f64 {
    50.0
}

fn default_heart_rate_min() -> f64 {
    50.0
}

fn default_heart_rate_max() -> f64 {
    150.0
}

fn default_heart_rate_critical_min() -> f64 {
    40.0
}

fn default_heart_rate_critical_max() -> f64 {
    180.0
}

fn default_sync_stale_secs() -> u64 {
    60 * 60
}

fn default_sync_critical_secs() -> u64 {
    180 * 60
}

fn default_incident_threshold() -> u32 {
    3
}

fn default_model_confidence() -> f64 {
    0.7
}

fn default_model_high_confidence() -> f64 {
    0.85
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_history_retention() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_enabled")]
    pub enabled: bool,
    /// Logistic combinator weights over the fixed feature vector
    #[serde(default)]
    pub weights: Option<[f64; 10]>,
    #[serde(default)]
    pub bias: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { enabled: default_model_enabled(), weights: None, bias: None }
    }
}

fn default_model_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpatialConfig {
    /// Default heatmap grid resolution
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default = "default_heatmap_radius_deg")]
    pub heatmap_radius_deg: f64,
    #[serde(default = "default_heatmap_epsilon")]
    pub heatmap_epsilon: f64,
    #[serde(default = "default_cluster_radius_deg")]
    pub cluster_radius_deg: f64,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            heatmap_radius_deg: default_heatmap_radius_deg(),
            heatmap_epsilon: default_heatmap_epsilon(),
            cluster_radius_deg: default_cluster_radius_deg(),
        }
    }
}

fn default_grid_size() -> usize {
    20
}

fn default_heatmap_radius_deg() -> f64 {
    0.01
}

fn default_heatmap_epsilon() -> f64 {
    0.001
}

fn default_cluster_radius_deg() -> f64 {
    0.001
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// HTTP port for Prometheus metrics and dashboard queries (0 to disable)
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), http_port: default_http_port() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_http_port() -> u16 {
    9641
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Alert feed (anomalies, zone alerts, detector failures), JSONL
    #[serde(default = "default_alerts_file")]
    pub alerts_file: String,
    /// Incident dispatch events, JSONL
    #[serde(default = "default_incidents_file")]
    pub incidents_file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { alerts_file: default_alerts_file(), incidents_file: default_incidents_file() }
    }
}

fn default_alerts_file() -> String {
    "alerts.jsonl".to_string()
}

fn default_incidents_file() -> String {
    "incidents.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub zones: ZonesConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub spatial: SpatialConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    listener_enabled: bool,
    listener_port: u16,
    zones_file: String,
    zones_reload_secs: u64,
    detection: DetectionConfig,
    model: ModelConfig,
    spatial: SpatialConfig,
    metrics_interval_secs: u64,
    http_port: u16,
    alerts_file: String,
    incidents_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            listener_enabled: toml_config.ingest.listener_enabled,
            listener_port: toml_config.ingest.listener_port,
            zones_file: toml_config.zones.file,
            zones_reload_secs: toml_config.zones.reload_secs,
            detection: toml_config.detection,
            model: toml_config.model,
            spatial: toml_config.spatial,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            http_port: toml_config.metrics.http_port,
            alerts_file: toml_config.egress.alerts_file,
            incidents_file: toml_config.egress.incidents_file,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {e:#}. Using defaults.");
                Self::default()
            }
        }
    }

    /// Detector thresholds derived from the detection section
    pub fn thresholds(&self) -> DetectorThresholds {
        let d = &self.detection;
        DetectorThresholds {
            route_deviation_m: d.route_deviation_m,
            inactivity_ms: d.inactivity_secs * 1000,
            speed_kmh: d.speed_kmh,
            heart_rate_min: d.heart_rate_min,
            heart_rate_max: d.heart_rate_max,
            heart_rate_critical_min: d.heart_rate_critical_min,
            heart_rate_critical_max: d.heart_rate_critical_max,
            sync_stale_ms: d.sync_stale_secs * 1000,
            sync_critical_ms: d.sync_critical_secs * 1000,
            incident_threshold: d.incident_threshold,
            model_confidence: d.model_confidence,
            model_high_confidence: d.model_high_confidence,
        }
    }

    /// Learned model instance, when enabled
    pub fn risk_model(&self) -> Option<LogisticModel> {
        if !self.model.enabled {
            return None;
        }
        let mut model = LogisticModel::default();
        if let Some(weights) = self.model.weights {
            model.weights = weights;
        }
        if let Some(bias) = self.model.bias {
            model.bias = bias;
        }
        Some(model)
    }

    pub fn spatial_params(&self) -> SpatialParams {
        SpatialParams {
            heatmap_radius_deg: self.spatial.heatmap_radius_deg,
            heatmap_epsilon: self.spatial.heatmap_epsilon,
            cluster_radius_deg: self.spatial.cluster_radius_deg,
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn listener_enabled(&self) -> bool {
        self.listener_enabled
    }

    pub fn listener_port(&self) -> u16 {
        self.listener_port
    }

    pub fn zones_file(&self) -> &str {
        &self.zones_file
    }

    pub fn zones_reload_secs(&self) -> u64 {
        self.zones_reload_secs
    }

    pub fn history_retention(&self) -> usize {
        self.detection.history_retention
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.detection.sweep_interval_secs
    }

    pub fn grid_size(&self) -> usize {
        self.spatial.grid_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn alerts_file(&self) -> &str {
        &self.alerts_file
    }

    pub fn incidents_file(&self) -> &str {
        &self.incidents_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the history retention
    #[cfg(test)]
    pub fn with_history_retention(mut self, retention: usize) -> Self {
        self.detection.history_retention = retention;
        self
    }
}
