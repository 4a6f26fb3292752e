//! Spatial aggregation for the operator map view
//!
//! Two independent, read-only views over a point-in-time snapshot of tourist
//! positions: an inverse-distance-weighted density grid and greedy proximity
//! clustering. Both work in raw degree units (a known approximation carried
//! over from the dashboard contract) and never touch live ingestion state.

use crate::domain::types::{Position, TouristId, TouristStatus};
use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

/// Caller-supplied bounding box for the heatmap view
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Degenerate boxes produce empty views
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.north > self.south && self.east > self.west
    }

    #[inline]
    fn contains(&self, p: &Position) -> bool {
        p.latitude >= self.south
            && p.latitude <= self.north
            && p.longitude >= self.west
            && p.longitude <= self.east
    }
}

/// Tuning for both aggregation views
#[derive(Debug, Clone, Copy)]
pub struct SpatialParams {
    /// Heatmap proximity radius in degree units (~1 km at 0.01)
    pub heatmap_radius_deg: f64,
    /// Inverse-distance smoothing term
    pub heatmap_epsilon: f64,
    /// Cluster absorption radius in degree units (~100 m at 0.001)
    pub cluster_radius_deg: f64,
}

impl Default for SpatialParams {
    fn default() -> Self {
        Self { heatmap_radius_deg: 0.01, heatmap_epsilon: 0.001, cluster_radius_deg: 0.001 }
    }
}

/// One nonzero-density lattice point
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeatmapCell {
    pub lat: f64,
    pub lon: f64,
    pub weight: f64,
}

/// Build a `(grid_size + 1)²` density lattice over `bounds`.
///
/// Each in-bounds position adds `1 / (d + ε)` to every lattice point within
/// the proximity radius. Only cells with nonzero weight are returned.
pub fn heatmap(
    positions: &[Position],
    bounds: &BoundingBox,
    grid_size: usize,
    params: &SpatialParams,
) -> Vec<HeatmapCell> {
    if !bounds.is_valid() || grid_size == 0 {
        return Vec::new();
    }

    let lat_step = (bounds.north - bounds.south) / grid_size as f64;
    let lon_step = (bounds.east - bounds.west) / grid_size as f64;
    let side = grid_size + 1;
    let mut weights = vec![0.0f64; side * side];

    for position in positions.iter().filter(|&p| bounds.contains(p)) {
        for i in 0..side {
            let cell_lat = bounds.south + i as f64 * lat_step;
            for j in 0..side {
                let cell_lon = bounds.west + j as f64 * lon_step;
                let d_lat = position.latitude - cell_lat;
                let d_lon = position.longitude - cell_lon;
                let distance = (d_lat * d_lat + d_lon * d_lon).sqrt();

                if distance < params.heatmap_radius_deg {
                    weights[i * side + j] += 1.0 / (distance + params.heatmap_epsilon);
                }
            }
        }
    }

    let mut cells = Vec::new();
    for i in 0..side {
        for j in 0..side {
            let weight = weights[i * side + j];
            if weight > 0.0 {
                cells.push(HeatmapCell {
                    lat: bounds.south + i as f64 * lat_step,
                    lon: bounds.west + j as f64 * lon_step,
                    weight,
                });
            }
        }
    }
    cells
}

/// One tourist fed into the clustering view
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterEntry {
    pub id: TouristId,
    pub latitude: f64,
    pub longitude: f64,
    pub status: TouristStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterMember {
    pub id: TouristId,
    pub status: TouristStatus,
}

/// A group of spatially-proximate tourists reported as one map marker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub center_lat: f64,
    pub center_lon: f64,
    pub count: usize,
    pub members: Vec<ClusterMember>,
}

/// Greedy proximity clustering.
///
/// Semantics follow the single-pass greedy sweep: entries are visited in
/// input order, each unvisited entry seeds a cluster and absorbs every
/// remaining unvisited entry within the radius of the seed. Only clusters of
/// size ≥ 2 are reported, with an arithmetic-mean centroid.
///
/// Candidate lookup is bucketed on a uniform grid with bucket side equal to
/// the radius, so each seed only sweeps its 3×3 neighborhood instead of the
/// whole set. Results are idempotent for identical input but remain
/// order-dependent under permutation.
pub fn clusters(entries: &[ClusterEntry], params: &SpatialParams) -> Vec<Cluster> {
    let radius = params.cluster_radius_deg;
    if radius <= 0.0 || entries.len() < 2 {
        return Vec::new();
    }

    #[inline]
    fn bucket_of(lat: f64, lon: f64, radius: f64) -> (i64, i64) {
        ((lat / radius).floor() as i64, (lon / radius).floor() as i64)
    }

    let mut buckets: FxHashMap<(i64, i64), SmallVec<[usize; 4]>> = FxHashMap::default();
    for (idx, entry) in entries.iter().enumerate() {
        buckets.entry(bucket_of(entry.latitude, entry.longitude, radius)).or_default().push(idx);
    }

    let mut visited = vec![false; entries.len()];
    let mut result = Vec::new();

    for seed_idx in 0..entries.len() {
        if visited[seed_idx] {
            continue;
        }
        visited[seed_idx] = true;
        let seed = &entries[seed_idx];

        // Sweep the 3×3 bucket neighborhood in input order to preserve the
        // greedy absorption semantics of a full scan
        let (bx, by) = bucket_of(seed.latitude, seed.longitude, radius);
        let mut candidates: SmallVec<[usize; 16]> = SmallVec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                if let Some(indices) = buckets.get(&(bx + dx, by + dy)) {
                    candidates.extend(indices.iter().copied());
                }
            }
        }
        candidates.sort_unstable();

        let mut member_indices: SmallVec<[usize; 8]> = SmallVec::new();
        member_indices.push(seed_idx);

        for &other_idx in &candidates {
            if visited[other_idx] {
                continue;
            }
            let other = &entries[other_idx];
            let d_lat = seed.latitude - other.latitude;
            let d_lon = seed.longitude - other.longitude;
            if (d_lat * d_lat + d_lon * d_lon).sqrt() < radius {
                visited[other_idx] = true;
                member_indices.push(other_idx);
            }
        }

        if member_indices.len() < 2 {
            continue;
        }

        let count = member_indices.len();
        let center_lat =
            member_indices.iter().map(|&i| entries[i].latitude).sum::<f64>() / count as f64;
        let center_lon =
            member_indices.iter().map(|&i| entries[i].longitude).sum::<f64>() / count as f64;
        let members = member_indices
            .iter()
            .map(|&i| ClusterMember { id: entries[i].id.clone(), status: entries[i].status })
            .collect();

        result.push(Cluster { center_lat, center_lon, count, members });
    }

    result
}
