//! HTTP endpoint for metrics and dashboard queries
//!
//! Exposes Prometheus text metrics at /metrics plus read-only JSON views for
//! the dashboard rendering collaborator: /heatmap, /clusters, /zones. All
//! dashboard queries read point-in-time snapshots and never touch the
//! ingestion path. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::geofence::GeofenceEngine;
use crate::services::monitor::DashboardState;
use crate::services::spatial::{self, BoundingBox, SpatialParams};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Shared context for request handling
pub struct HttpContext {
    pub metrics: Arc<Metrics>,
    pub geofence: Arc<GeofenceEngine>,
    pub dashboard: Arc<DashboardState>,
    pub site_id: String,
    pub spatial_params: SpatialParams,
    pub default_grid_size: usize,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(ctx: &HttpContext) -> String {
    let summary = ctx.metrics.report();
    let site = ctx.site_id.as_str();
    let mut output = String::with_capacity(8192);

    write_core_metrics(&mut output, site, &summary);
    write_detection_metrics(&mut output, site, &summary);
    write_population_metrics(&mut output, site, &summary);
    write_zone_metrics(&mut output, site, &summary, ctx);
    write_ingest_metrics(&mut output, site, &summary);

    output
}

fn write_core_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "tourguard_updates_total",
        "Total updates processed",
        MetricType::Counter,
        site,
        summary.updates_total,
    );
    write_gauge_f64(
        output,
        "tourguard_updates_per_sec",
        "Updates processed per second",
        site,
        summary.updates_per_sec,
    );

    write_histogram(
        output,
        "tourguard_update_latency_us",
        "Update processing latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );
    write_metric(
        output,
        "tourguard_update_latency_p50_us",
        "50th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p50_us,
    );
    write_metric(
        output,
        "tourguard_update_latency_p95_us",
        "95th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p95_us,
    );
    write_metric(
        output,
        "tourguard_update_latency_p99_us",
        "99th percentile update latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_detection_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let _ = writeln!(output, "# HELP tourguard_anomalies_total Anomaly records by detector kind");
    let _ = writeln!(output, "# TYPE tourguard_anomalies_total counter");
    for (kind, count) in summary.anomalies_by_kind() {
        let _ = writeln!(
            output,
            "tourguard_anomalies_total{{site=\"{site}\",kind=\"{}\"}} {count}",
            kind.as_str()
        );
    }

    write_metric(
        output,
        "tourguard_detector_failures_total",
        "Detector failures (isolated per detector)",
        MetricType::Counter,
        site,
        summary.detector_failures,
    );
    write_metric(
        output,
        "tourguard_dispatches_total",
        "Incident dispatch events emitted",
        MetricType::Counter,
        site,
        summary.dispatches,
    );
    write_metric(
        output,
        "tourguard_panics_total",
        "Explicit panic signals received",
        MetricType::Counter,
        site,
        summary.panics,
    );
    write_metric(
        output,
        "tourguard_acks_total",
        "External status acknowledgments",
        MetricType::Counter,
        site,
        summary.acks,
    );
    write_metric(
        output,
        "tourguard_sweeps_total",
        "Batch detection sweeps completed",
        MetricType::Counter,
        site,
        summary.sweeps,
    );
}

fn write_population_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "tourguard_active_tourists",
        "Currently tracked tourists",
        MetricType::Gauge,
        site,
        summary.active_tourists,
    );

    let _ = writeln!(output, "# HELP tourguard_tourists_by_status Tourists per safety status");
    let _ = writeln!(output, "# TYPE tourguard_tourists_by_status gauge");
    for (status, count) in [
        ("safe", summary.safe_tourists),
        ("at_risk", summary.at_risk_tourists),
        ("emergency", summary.emergency_tourists),
    ] {
        let _ = writeln!(
            output,
            "tourguard_tourists_by_status{{site=\"{site}\",status=\"{status}\"}} {count}"
        );
    }
}

fn write_zone_metrics(
    output: &mut String,
    site: &str,
    summary: &MetricsSummary,
    ctx: &HttpContext,
) {
    write_metric(
        output,
        "tourguard_zone_matches_total",
        "Zone containment matches",
        MetricType::Counter,
        site,
        summary.zone_matches,
    );
    write_metric(
        output,
        "tourguard_zone_alerts_total",
        "Alert-triggering zone matches",
        MetricType::Counter,
        site,
        summary.zone_alerts,
    );

    let _ = writeln!(output, "# HELP tourguard_zone_occupancy Live occupancy per zone");
    let _ = writeln!(output, "# TYPE tourguard_zone_occupancy gauge");
    for (zone_id, _, count, _) in ctx.geofence.occupancy_snapshot() {
        let _ = writeln!(
            output,
            "tourguard_zone_occupancy{{site=\"{site}\",zone_id=\"{zone_id}\"}} {count}"
        );
    }
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "tourguard_ingest_received_total",
        "Updates received by the listener (before try_send)",
        MetricType::Counter,
        site,
        summary.ingest_received,
    );
    write_metric(
        output,
        "tourguard_ingest_dropped_total",
        "Updates dropped due to channel full",
        MetricType::Counter,
        site,
        summary.ingest_dropped,
    );
    write_gauge_f64(
        output,
        "tourguard_ingest_drop_ratio",
        "Ingest drop ratio (dropped / received)",
        site,
        summary.ingest_drop_ratio,
    );
    write_metric(
        output,
        "tourguard_invalid_updates_total",
        "Updates rejected for invalid geometry",
        MetricType::Counter,
        site,
        summary.invalid_updates,
    );
}

/// Parse a query string into key/value pairs (no percent decoding needed for
/// the numeric parameters these endpoints accept)
fn query_params(query: &str) -> Vec<(&str, &str)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .collect()
}

fn query_f64(params: &[(&str, &str)], key: &str) -> Option<f64> {
    params.iter().find(|(k, _)| *k == key).and_then(|(_, v)| v.parse().ok())
}

fn query_usize(params: &[(&str, &str)], key: &str) -> Option<usize> {
    params.iter().find(|(k, _)| *k == key).and_then(|(_, v)| v.parse().ok())
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn handle_heatmap(ctx: &HttpContext, query: &str) -> Response<Full<Bytes>> {
    let params = query_params(query);
    let (Some(north), Some(south), Some(east), Some(west)) = (
        query_f64(&params, "north"),
        query_f64(&params, "south"),
        query_f64(&params, "east"),
        query_f64(&params, "west"),
    ) else {
        return json_response(
            StatusCode::BAD_REQUEST,
            r#"{"error":"bounds required (north,south,east,west)"}"#.to_string(),
        );
    };

    let bounds = BoundingBox { north, south, east, west };
    let grid_size = query_usize(&params, "grid").unwrap_or(ctx.default_grid_size);
    let positions = ctx.dashboard.positions();
    let cells = spatial::heatmap(&positions, &bounds, grid_size, &ctx.spatial_params);

    let body = serde_json::json!({
        "bounds": {"north": north, "south": south, "east": east, "west": west},
        "grid_size": grid_size,
        "total_tourists": positions.len(),
        "cells": cells,
    });
    json_response(StatusCode::OK, body.to_string())
}

fn handle_clusters(ctx: &HttpContext) -> Response<Full<Bytes>> {
    let entries = ctx.dashboard.cluster_entries();
    let clusters = spatial::clusters(&entries, &ctx.spatial_params);

    let body = serde_json::json!({
        "total_tourists": entries.len(),
        "clusters": clusters,
    });
    json_response(StatusCode::OK, body.to_string())
}

fn handle_zones(ctx: &HttpContext) -> Response<Full<Bytes>> {
    let zones: Vec<serde_json::Value> = ctx
        .geofence
        .occupancy_snapshot()
        .into_iter()
        .map(|(id, name, occupancy, last_updated_ms)| {
            serde_json::json!({
                "zone_id": id,
                "name": name,
                "occupancy": occupancy,
                "last_updated_ms": last_updated_ms,
            })
        })
        .collect();

    json_response(StatusCode::OK, serde_json::json!({ "zones": zones }).to_string())
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    ctx: Arc<HttpContext>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let query = req.uri().query().unwrap_or("").to_string();
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&ctx);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        (&Method::GET, "/heatmap") => Ok(handle_heatmap(&ctx, &query)),
        (&Method::GET, "/clusters") => Ok(handle_clusters(&ctx)),
        (&Method::GET, "/zones") => Ok(handle_zones(&ctx)),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the HTTP server
pub async fn start_http_server(
    port: u16,
    ctx: HttpContext,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let ctx = Arc::new(ctx);

    info!(port = %port, site = %ctx.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let ctx = ctx.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let ctx = ctx.clone();
                                async move { handle_request(req, ctx).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::anomaly::AnomalyKind;
    use crate::domain::types::{Position, TouristId, TouristStatus, ZoneId};
    use crate::domain::zone::{AlertConfig, Boundary, GeofenceZone, RiskLevel};
    use crate::services::monitor::DashboardEntry;

    fn context() -> HttpContext {
        let geofence = Arc::new(GeofenceEngine::new());
        geofence
            .replace_snapshot(vec![GeofenceZone::new(
                ZoneId("Z1".to_string()),
                "Times Square",
                RiskLevel::High,
                Boundary::Circle { center_lat: 40.7580, center_lon: -73.9855, radius_m: 100.0 },
                AlertConfig::default(),
            )
            .unwrap()])
            .unwrap();

        let dashboard = Arc::new(DashboardState::new());
        dashboard.replace(vec![
            DashboardEntry {
                id: TouristId::new("t1"),
                position: Position::new(40.7500, -73.9500, 0),
                status: TouristStatus::Safe,
                risk_score: 0.0,
            },
            DashboardEntry {
                id: TouristId::new("t2"),
                position: Position::new(40.7504, -73.9500, 0),
                status: TouristStatus::AtRisk,
                risk_score: 0.5,
            },
        ]);

        HttpContext {
            metrics: Arc::new(Metrics::new()),
            geofence,
            dashboard,
            site_id: "test-site".to_string(),
            spatial_params: SpatialParams::default(),
            default_grid_size: 20,
        }
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let ctx = context();
        ctx.metrics.record_update_processed(150);
        ctx.metrics.record_update_processed(250);
        ctx.metrics.record_anomaly(AnomalyKind::Inactivity);
        ctx.metrics.record_zone_matches(2, 1);

        let output = format_prometheus_metrics(&ctx);

        assert!(output.contains("tourguard_updates_total{site=\"test-site\"} 2"));
        assert!(output.contains("tourguard_update_latency_us_bucket{site=\"test-site\""));
        assert!(output
            .contains("tourguard_anomalies_total{site=\"test-site\",kind=\"inactivity\"} 1"));
        assert!(output.contains("tourguard_zone_matches_total{site=\"test-site\"} 2"));
        assert!(output.contains("tourguard_zone_occupancy{site=\"test-site\",zone_id=\"Z1\"} 0"));
    }

    #[test]
    fn test_heatmap_requires_bounds() {
        let ctx = context();
        let response = handle_heatmap(&ctx, "north=40.8");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_heatmap_returns_cells() {
        let ctx = context();
        let response = handle_heatmap(&ctx, "north=40.8&south=40.7&east=-73.9&west=-74.0&grid=10");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_clusters_endpoint_groups_dashboard_entries() {
        let ctx = context();
        let response = handle_clusters(&ctx);
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_query_param_parsing() {
        let params = query_params("north=40.8&south=40.7&grid=15");
        assert_eq!(query_f64(&params, "north"), Some(40.8));
        assert_eq!(query_usize(&params, "grid"), Some(15));
        assert_eq!(query_f64(&params, "missing"), None);
    }
}
