//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `monitor` - Central update orchestrator and tourist state management
//! - `geofence` - Zone containment engine and live occupancy
//! - `spatial` - Heatmap density grid and proximity clustering
//! - `detectors` - Multi-signal anomaly detection engine
//! - `model` - Learned-pattern scoring behind the `RiskModel` trait
//! - `risk` - Risk aggregation, status machine, incident dispatch

pub mod detectors;
pub mod geofence;
pub mod model;
pub mod monitor;
pub mod risk;
pub mod spatial;

// Re-export commonly used types
pub use detectors::{AnomalyEngine, DetectorThresholds};
pub use geofence::GeofenceEngine;
pub use monitor::{DashboardState, Monitor};
