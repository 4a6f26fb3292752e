//! Alert and incident egress - JSONL output files
//!
//! Two streams, one JSON object per line:
//! - alert feed: anomaly records, alert-triggering zone matches, and
//!   detector-failure diagnostics, consumed by the operator dashboard
//! - incidents: dispatch events emitted on emergency transitions, consumed
//!   by the incident-management collaborator

use crate::domain::anomaly::AnomalyRecord;
use crate::domain::types::TouristId;
use crate::domain::zone::ZoneMatch;
use crate::services::detectors::DetectorFailure;
use crate::services::risk::DispatchEvent;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Envelope for the alert feed
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum AlertFeedEntry<'a> {
    Anomaly {
        site: &'a str,
        #[serde(flatten)]
        record: &'a AnomalyRecord,
    },
    ZoneAlert {
        site: &'a str,
        tourist_id: &'a TouristId,
        #[serde(flatten)]
        zone: &'a ZoneMatch,
        timestamp_ms: u64,
    },
    DetectorFailed {
        site: &'a str,
        tourist_id: &'a TouristId,
        detector: &'a str,
        reason: &'a str,
        timestamp_ms: u64,
    },
}

/// Egress writer for the alert feed and incident stream
pub struct AlertEgress {
    site_id: String,
    alerts_path: String,
    incidents_path: String,
}

impl AlertEgress {
    pub fn new(site_id: &str, alerts_path: &str, incidents_path: &str) -> Self {
        info!(
            alerts_file = %alerts_path,
            incidents_file = %incidents_path,
            "alert_egress_initialized"
        );
        Self {
            site_id: site_id.to_string(),
            alerts_path: alerts_path.to_string(),
            incidents_path: incidents_path.to_string(),
        }
    }

    /// Write one anomaly record to the alert feed
    pub fn write_anomaly(&self, record: &AnomalyRecord) -> bool {
        self.write_feed_entry(&AlertFeedEntry::Anomaly { site: &self.site_id, record })
    }

    /// Write one alert-triggering zone match to the alert feed
    pub fn write_zone_alert(
        &self,
        tourist_id: &TouristId,
        zone: &ZoneMatch,
        timestamp_ms: u64,
    ) -> bool {
        self.write_feed_entry(&AlertFeedEntry::ZoneAlert {
            site: &self.site_id,
            tourist_id,
            zone,
            timestamp_ms,
        })
    }

    /// Write a detector-failure diagnostic to the alert feed
    pub fn write_detector_failure(&self, failure: &DetectorFailure, timestamp_ms: u64) -> bool {
        self.write_feed_entry(&AlertFeedEntry::DetectorFailed {
            site: &self.site_id,
            tourist_id: &failure.tourist_id,
            detector: failure.kind.as_str(),
            reason: &failure.reason,
            timestamp_ms,
        })
    }

    /// Write a dispatch event to the incident stream
    pub fn write_incident(&self, dispatch: &DispatchEvent) -> bool {
        let json = match serde_json::to_string(dispatch) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "incident_serialize_failed");
                return false;
            }
        };

        match append_line(&self.incidents_path, &json) {
            Ok(()) => {
                info!(
                    incident_id = %dispatch.incident_id,
                    tourist_id = %dispatch.tourist_id,
                    risk_score = %dispatch.risk_score,
                    panic = %dispatch.panic,
                    "incident_egressed"
                );
                true
            }
            Err(e) => {
                error!(incident_id = %dispatch.incident_id, error = %e, "incident_egress_failed");
                false
            }
        }
    }

    fn write_feed_entry(&self, entry: &AlertFeedEntry<'_>) -> bool {
        let json = match serde_json::to_string(entry) {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "alert_serialize_failed");
                return false;
            }
        };

        match append_line(&self.alerts_path, &json) {
            Ok(()) => {
                debug!(file = %self.alerts_path, bytes = %json.len(), "alert_written");
                true
            }
            Err(e) => {
                error!(error = %e, "alert_egress_failed");
                false
            }
        }
    }
}

/// Append a line, creating parent directories as needed
fn append_line(path_str: &str, line: &str) -> std::io::Result<()> {
    let path = Path::new(path_str);

    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}
