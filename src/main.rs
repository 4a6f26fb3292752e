//! Tourguard - tourist safety monitoring core
//!
//! Ingests periodic location and wearable-sensor updates, evaluates geofence
//! containment, maintains live density views for the operator dashboard, and
//! scores each tourist for abnormal behavior that may indicate distress.
//!
//! Module structure:
//! - `domain/` - Core types (Position, TouristState, Zones, Anomalies)
//! - `io/` - External interfaces (update listener, alert egress, HTTP)
//! - `services/` - Business logic (Monitor, Geofence, Detectors, Risk)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::fs;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tourguard::domain::zone::GeofenceZone;
use tourguard::infra::{Config, Metrics};
use tourguard::io::{start_http_server, start_update_listener, HttpContext, UpdateListenerConfig};
use tourguard::services::{AnomalyEngine, DashboardState, GeofenceEngine, Monitor};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Tourguard - tourist safety monitoring core
#[derive(Parser, Debug)]
#[command(name = "tourguard", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/dev.toml")]
    config: String,
}

/// Load the zone snapshot file and swap it into the engine.
/// A missing or invalid snapshot is not fatal: the previous set stays active.
fn load_zones(geofence: &GeofenceEngine, path: &str) {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(file = %path, error = %e, "zones_file_unreadable");
            return;
        }
    };

    let zones: Vec<GeofenceZone> = match serde_json::from_str(&content) {
        Ok(zones) => zones,
        Err(e) => {
            warn!(file = %path, error = %e, "zones_file_invalid");
            return;
        }
    };

    if let Err(e) = geofence.replace_snapshot(zones) {
        warn!(file = %path, error = %e, "zone_snapshot_rejected");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full event visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git = env!("GIT_HASH"),
        "tourguard starting"
    );

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        listener_port = %config.listener_port(),
        zones_file = %config.zones_file(),
        history_retention = %config.history_retention(),
        sweep_interval_secs = %config.sweep_interval_secs(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let geofence = Arc::new(GeofenceEngine::new());
    let dashboard = Arc::new(DashboardState::new());

    // Initial zone snapshot, then periodic refresh (the authority-management
    // collaborator owns the file)
    load_zones(&geofence, config.zones_file());
    if config.zones_reload_secs() > 0 {
        let reload_geofence = geofence.clone();
        let zones_file = config.zones_file().to_string();
        let reload_secs = config.zones_reload_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(reload_secs));
            interval.tick().await; // initial load already happened
            loop {
                interval.tick().await;
                load_zones(&reload_geofence, &zones_file);
            }
        });
    }

    // Create update channel (bounded for backpressure)
    let (update_tx, update_rx) = mpsc::channel(1000);

    // Start update TCP listener
    let listener_config = UpdateListenerConfig {
        port: config.listener_port(),
        enabled: config.listener_enabled(),
    };
    let listener_metrics = metrics.clone();
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            start_update_listener(listener_config, update_tx, listener_metrics, listener_shutdown)
                .await
        {
            tracing::error!(error = %e, "update listener error");
        }
    });

    // Start HTTP server for metrics and dashboard queries (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let ctx = HttpContext {
            metrics: metrics.clone(),
            geofence: geofence.clone(),
            dashboard: dashboard.clone(),
            site_id: config.site_id().to_string(),
            spatial_params: config.spatial_params(),
            default_grid_size: config.grid_size(),
        };
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, ctx, http_shutdown).await {
                tracing::error!(error = %e, "http server error");
            }
        });
    }

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Start monitor (main update processing loop)
    let anomaly = AnomalyEngine::new(
        config.thresholds(),
        config.risk_model().map(|m| Box::new(m) as _),
    );
    let mut monitor = Monitor::new(config, geofence, anomaly, metrics, dashboard);
    info!("monitor_started");

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run monitor - consumes updates until channel closes
    monitor.run(update_rx).await;

    info!("tourguard shutdown complete");
    Ok(())
}
