//! Geofence containment engine
//!
//! Evaluates positions against a consistent snapshot of the active zone set
//! and maintains per-zone live occupancy. Occupancy counters are an
//! approximation: they are incremented on every containment match and
//! rebuilt from scratch from the live position set on each sweep, so drift
//! is bounded by one sweep interval.
//!
//! The zone set is owned by the authority-management collaborator; zones may
//! be added or removed between evaluations. Each evaluation runs against the
//! `Arc` snapshot taken at entry, so a concurrent swap never yields a
//! half-updated zone list.

use crate::domain::geo::{validate_coords, GeoError};
use crate::domain::types::{epoch_ms, Position, ZoneId};
use crate::domain::zone::{GeofenceZone, ZoneMatch};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Live occupancy for one zone. Counters are statistical; Relaxed ordering
/// is intentional.
#[derive(Debug, Default)]
pub struct ZoneOccupancy {
    count: AtomicU32,
    last_updated_ms: AtomicU64,
}

impl ZoneOccupancy {
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn last_updated_ms(&self) -> u64 {
        self.last_updated_ms.load(Ordering::Relaxed)
    }

    fn record_entry(&self, now_ms: u64) -> u32 {
        let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_updated_ms.store(now_ms, Ordering::Relaxed);
        count
    }

    fn reset(&self, count: u32, now_ms: u64) {
        self.count.store(count, Ordering::Relaxed);
        self.last_updated_ms.store(now_ms, Ordering::Relaxed);
    }
}

/// Containment engine over a swappable zone snapshot
pub struct GeofenceEngine {
    zones: RwLock<Arc<Vec<GeofenceZone>>>,
    occupancy: RwLock<FxHashMap<ZoneId, Arc<ZoneOccupancy>>>,
}

impl GeofenceEngine {
    pub fn new() -> Self {
        Self {
            zones: RwLock::new(Arc::new(Vec::new())),
            occupancy: RwLock::new(FxHashMap::default()),
        }
    }

    /// Replace the active zone snapshot. Every boundary is validated; one
    /// invalid zone rejects the whole snapshot so the previous set stays
    /// active. Occupancy entries for removed zones are dropped.
    pub fn replace_snapshot(&self, zones: Vec<GeofenceZone>) -> Result<(), GeoError> {
        for zone in &zones {
            zone.boundary.validate()?;
        }

        let mut occupancy = self.occupancy.write();
        let mut next: FxHashMap<ZoneId, Arc<ZoneOccupancy>> = FxHashMap::default();
        for zone in &zones {
            let entry = occupancy.remove(&zone.id).unwrap_or_default();
            next.insert(zone.id.clone(), entry);
        }
        *occupancy = next;

        info!(zones = zones.len(), "zone_snapshot_replaced");
        *self.zones.write() = Arc::new(zones);
        Ok(())
    }

    /// Current zone snapshot
    pub fn snapshot(&self) -> Arc<Vec<GeofenceZone>> {
        self.zones.read().clone()
    }

    /// Evaluate a position against all active zones.
    ///
    /// A point may match zero, one, or many zones. Each match increments that
    /// zone's occupancy counter. Invalid coordinates fail loudly rather than
    /// reading as "no match".
    pub fn evaluate(&self, position: &Position, now_ms: u64) -> Result<Vec<ZoneMatch>, GeoError> {
        validate_coords(position.latitude, position.longitude)?;

        let snapshot = self.snapshot();
        let mut matches = Vec::new();

        for zone in snapshot.iter() {
            if !zone.boundary.contains(position) {
                continue;
            }

            // Zone removed between snapshot and occupancy lookup: count it
            // as a match with no live counter to bump
            let occupancy = {
                let occ = self.occupancy.read();
                occ.get(&zone.id).cloned()
            };
            let count = match occupancy {
                Some(occ) => occ.record_entry(now_ms),
                None => 0,
            };

            let capacity_exceeded =
                zone.alert_config.max_capacity.is_some_and(|max| count > max);
            let triggers_alert =
                zone.alert_config.trigger_on_entry || zone.risk_level.is_alerting();

            debug!(
                zone_id = %zone.id,
                risk_level = %zone.risk_level.as_str(),
                occupancy = %count,
                "zone_matched"
            );

            matches.push(ZoneMatch {
                zone_id: zone.id.clone(),
                name: zone.name.clone(),
                risk_level: zone.risk_level,
                alert_config: zone.alert_config,
                triggers_alert,
                capacity_exceeded,
                occupancy: count,
            });
        }

        Ok(matches)
    }

    /// Recompute every zone's occupancy from a point-in-time snapshot of
    /// tourist positions. Invalid positions are skipped.
    pub fn rebuild_occupancy(&self, positions: &[Position]) {
        let snapshot = self.snapshot();
        let now_ms = epoch_ms();
        let occupancy = self.occupancy.read();

        for zone in snapshot.iter() {
            let count = positions
                .iter()
                .filter(|&p| {
                    validate_coords(p.latitude, p.longitude).is_ok() && zone.boundary.contains(p)
                })
                .count() as u32;
            if let Some(occ) = occupancy.get(&zone.id) {
                occ.reset(count, now_ms);
            }
        }
    }

    /// Occupancy snapshot for all active zones: (id, name, count, last_updated)
    pub fn occupancy_snapshot(&self) -> Vec<(ZoneId, String, u32, u64)> {
        let snapshot = self.snapshot();
        let occupancy = self.occupancy.read();
        snapshot
            .iter()
            .map(|zone| {
                let (count, updated) = occupancy
                    .get(&zone.id)
                    .map(|occ| (occ.count(), occ.last_updated_ms()))
                    .unwrap_or((0, 0));
                (zone.id.clone(), zone.name.clone(), count, updated)
            })
            .collect()
    }
}

impl Default for GeofenceEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::zone::{AlertConfig, Boundary, RiskLevel};

    fn times_square_zone(id: &str, risk_level: RiskLevel, alert_config: AlertConfig) -> GeofenceZone {
        GeofenceZone::new(
            ZoneId(id.to_string()),
            format!("zone-{id}"),
            risk_level,
            Boundary::Circle { center_lat: 40.7580, center_lon: -73.9855, radius_m: 100.0 },
            alert_config,
        )
        .unwrap()
    }

    fn engine_with(zones: Vec<GeofenceZone>) -> GeofenceEngine {
        let engine = GeofenceEngine::new();
        engine.replace_snapshot(zones).unwrap();
        engine
    }

    #[test]
    fn test_match_increments_occupancy() {
        let engine =
            engine_with(vec![times_square_zone("Z1", RiskLevel::Moderate, AlertConfig::default())]);
        let p = Position::new(40.7580, -73.9855, 0);

        let matches = engine.evaluate(&p, 1000).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].zone_id, ZoneId("Z1".to_string()));
        assert_eq!(matches[0].occupancy, 1);
        assert!(!matches[0].triggers_alert);

        let occ = engine.occupancy_snapshot();
        assert_eq!(occ[0].2, 1);
        assert_eq!(occ[0].3, 1000);
    }

    #[test]
    fn test_no_match_outside_zone() {
        let engine =
            engine_with(vec![times_square_zone("Z1", RiskLevel::Moderate, AlertConfig::default())]);
        let far = Position::new(41.0, -73.9855, 0);

        let matches = engine.evaluate(&far, 1000).unwrap();
        assert!(matches.is_empty());
        assert_eq!(engine.occupancy_snapshot()[0].2, 0);
    }

    #[test]
    fn test_overlapping_zones_all_match() {
        let engine = engine_with(vec![
            times_square_zone("Z1", RiskLevel::Low, AlertConfig::default()),
            times_square_zone("Z2", RiskLevel::High, AlertConfig::default()),
        ]);
        let p = Position::new(40.7580, -73.9855, 0);

        let matches = engine.evaluate(&p, 1000).unwrap();
        assert_eq!(matches.len(), 2);
        // High risk alerts even without trigger_on_entry
        assert!(!matches[0].triggers_alert);
        assert!(matches[1].triggers_alert);
    }

    #[test]
    fn test_trigger_on_entry_alerts_low_risk_zone() {
        let engine = engine_with(vec![times_square_zone(
            "Z1",
            RiskLevel::Low,
            AlertConfig { trigger_on_entry: true, max_capacity: None },
        )]);
        let p = Position::new(40.7580, -73.9855, 0);
        assert!(engine.evaluate(&p, 0).unwrap()[0].triggers_alert);
    }

    #[test]
    fn test_capacity_exceeded() {
        let engine = engine_with(vec![times_square_zone(
            "Z1",
            RiskLevel::Low,
            AlertConfig { trigger_on_entry: false, max_capacity: Some(2) },
        )]);
        let p = Position::new(40.7580, -73.9855, 0);

        assert!(!engine.evaluate(&p, 0).unwrap()[0].capacity_exceeded);
        assert!(!engine.evaluate(&p, 0).unwrap()[0].capacity_exceeded);
        assert!(engine.evaluate(&p, 0).unwrap()[0].capacity_exceeded);
    }

    #[test]
    fn test_invalid_position_is_an_error_not_no_match() {
        let engine =
            engine_with(vec![times_square_zone("Z1", RiskLevel::Low, AlertConfig::default())]);
        let bad = Position::new(95.0, 0.0, 0);
        assert!(engine.evaluate(&bad, 0).is_err());
    }

    #[test]
    fn test_rebuild_occupancy_replaces_drifted_counts() {
        let engine =
            engine_with(vec![times_square_zone("Z1", RiskLevel::Low, AlertConfig::default())]);
        let inside = Position::new(40.7580, -73.9855, 0);

        // Three evaluations drift the counter up
        for _ in 0..3 {
            engine.evaluate(&inside, 0).unwrap();
        }
        assert_eq!(engine.occupancy_snapshot()[0].2, 3);

        // Rebuild from a snapshot with one tourist inside, one far away
        engine.rebuild_occupancy(&[inside, Position::new(10.0, 10.0, 0)]);
        assert_eq!(engine.occupancy_snapshot()[0].2, 1);
    }

    #[test]
    fn test_snapshot_swap_keeps_surviving_zone_occupancy() {
        let z1 = times_square_zone("Z1", RiskLevel::Low, AlertConfig::default());
        let z2 = times_square_zone("Z2", RiskLevel::Low, AlertConfig::default());
        let engine = engine_with(vec![z1.clone(), z2]);
        let p = Position::new(40.7580, -73.9855, 0);
        engine.evaluate(&p, 0).unwrap();

        // Z2 removed by the authority collaborator; Z1's counter survives
        engine.replace_snapshot(vec![z1]).unwrap();
        let occ = engine.occupancy_snapshot();
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].2, 1);
    }

    #[test]
    fn test_invalid_zone_rejects_whole_snapshot() {
        let engine =
            engine_with(vec![times_square_zone("Z1", RiskLevel::Low, AlertConfig::default())]);

        let bad = GeofenceZone {
            id: ZoneId("BAD".to_string()),
            name: "bad".to_string(),
            risk_level: RiskLevel::Low,
            boundary: Boundary::Polygon { vertices: vec![(0.0, 0.0), (1.0, 1.0)] },
            alert_config: AlertConfig::default(),
        };
        assert!(engine.replace_snapshot(vec![bad]).is_err());

        // Previous snapshot still active
        assert_eq!(engine.snapshot().len(), 1);
    }
}
