//! Geofence zone definitions
//!
//! Zones are created and mutated by the authority-management collaborator;
//! the core receives them as read snapshots and only tracks live occupancy.
//! Geometry is validated at construction so the containment engine never
//! sees a degenerate or self-intersecting boundary.

use crate::domain::geo::{self, GeoError};
use crate::domain::types::{Position, ZoneId};
use serde::{Deserialize, Serialize};

/// Risk classification for a zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Moderate => "moderate",
            RiskLevel::High => "high",
            RiskLevel::VeryHigh => "very_high",
        }
    }

    /// High and very-high zones always surface alerts on containment
    #[inline]
    pub fn is_alerting(&self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::VeryHigh)
    }
}

/// Zone boundary variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Boundary {
    Circle {
        center_lat: f64,
        center_lon: f64,
        radius_m: f64,
    },
    Polygon {
        /// Ordered (lat, lon) ring, implicitly closed
        vertices: Vec<(f64, f64)>,
    },
}

impl Boundary {
    /// Validate boundary geometry
    pub fn validate(&self) -> Result<(), GeoError> {
        match self {
            Boundary::Circle { center_lat, center_lon, .. } => {
                geo::validate_coords(*center_lat, *center_lon)
            }
            Boundary::Polygon { vertices } => geo::validate_ring(vertices),
        }
    }

    /// Containment test; the caller has already validated `p`
    pub fn contains(&self, p: &Position) -> bool {
        match self {
            Boundary::Circle { center_lat, center_lon, radius_m } => {
                let center = Position::new(*center_lat, *center_lon, 0);
                geo::point_in_circle(p, &center, *radius_m)
            }
            Boundary::Polygon { vertices } => geo::point_in_polygon(p, vertices),
        }
    }
}

/// Alerting behavior for a zone
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub trigger_on_entry: bool,
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

/// A named geographic safety zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeofenceZone {
    pub id: ZoneId,
    pub name: String,
    pub risk_level: RiskLevel,
    pub boundary: Boundary,
    #[serde(default)]
    pub alert_config: AlertConfig,
}

impl GeofenceZone {
    /// Build a zone, rejecting invalid geometry at the call site
    pub fn new(
        id: ZoneId,
        name: impl Into<String>,
        risk_level: RiskLevel,
        boundary: Boundary,
        alert_config: AlertConfig,
    ) -> Result<Self, GeoError> {
        boundary.validate()?;
        Ok(Self { id, name: name.into(), risk_level, boundary, alert_config })
    }
}

/// A containment result for one zone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneMatch {
    pub zone_id: ZoneId,
    pub name: String,
    pub risk_level: RiskLevel,
    pub alert_config: AlertConfig,
    /// Entry-alert zones and high/very-high risk zones
    pub triggers_alert: bool,
    /// Occupancy passed the configured capacity after this match
    pub capacity_exceeded: bool,
    /// Zone occupancy after counting this match
    pub occupancy: u32,
}
