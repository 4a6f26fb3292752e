//! Geometry primitives over WGS84 coordinates
//!
//! Distances use the haversine formula (meters). Containment tests operate
//! on validated input only: out-of-range coordinates and degenerate or
//! self-intersecting rings are rejected with `GeoError` rather than being
//! silently treated as "no match".

use crate::domain::types::Position;
use thiserror::Error;

/// Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("coordinate out of range: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },
    #[error("polygon needs at least 3 vertices, got {0}")]
    DegeneratePolygon(usize),
    #[error("polygon ring is self-intersecting")]
    SelfIntersecting,
}

/// Validate a single lat/lon pair
pub fn validate_coords(lat: f64, lon: f64) -> Result<(), GeoError> {
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) || lat.is_nan() || lon.is_nan()
    {
        return Err(GeoError::InvalidCoordinate { lat, lon });
    }
    Ok(())
}

/// Validate a polygon ring: ≥3 vertices, in-range coordinates, simple
pub fn validate_ring(ring: &[(f64, f64)]) -> Result<(), GeoError> {
    if ring.len() < 3 {
        return Err(GeoError::DegeneratePolygon(ring.len()));
    }
    for &(lat, lon) in ring {
        validate_coords(lat, lon)?;
    }
    if ring_self_intersects(ring) {
        return Err(GeoError::SelfIntersecting);
    }
    Ok(())
}

/// Great-circle distance in meters between two fixes
pub fn distance_meters(a: &Position, b: &Position) -> f64 {
    haversine_m(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Haversine distance from raw lat/lon pairs, in meters
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Initial bearing from `a` to `b`, normalized to [0, 360)
pub fn bearing_degrees(a: &Position, b: &Position) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let d_lambda = (b.longitude - a.longitude).to_radians();

    let y = d_lambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * d_lambda.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// True iff `p` lies within `radius_m` of `center` (boundary inclusive)
pub fn point_in_circle(p: &Position, center: &Position, radius_m: f64) -> bool {
    distance_meters(p, center) <= radius_m
}

/// Ray-casting parity test over an implicitly closed (lat, lon) ring.
///
/// Well-defined for simple polygons only; callers validate with
/// `validate_ring` before storing the ring.
pub fn point_in_polygon(p: &Position, ring: &[(f64, f64)]) -> bool {
    let (lat, lon) = (p.latitude, p.longitude);
    let mut inside = false;
    let mut j = ring.len() - 1;

    for i in 0..ring.len() {
        let (lat_i, lon_i) = ring[i];
        let (lat_j, lon_j) = ring[j];

        if ((lat_i > lat) != (lat_j > lat))
            && (lon < (lon_j - lon_i) * (lat - lat_i) / (lat_j - lat_i) + lon_i)
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

/// Orientation of the ordered triple (a, b, c): >0 counter-clockwise,
/// <0 clockwise, 0 collinear
fn orient(a: (f64, f64), b: (f64, f64), c: (f64, f64)) -> f64 {
    (b.0 - a.0) * (c.1 - a.1) - (b.1 - a.1) * (c.0 - a.0)
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

/// Whether segments (p1,p2) and (p3,p4) intersect, including collinear overlap
fn segments_intersect(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64), p4: (f64, f64)) -> bool {
    let d1 = orient(p3, p4, p1);
    let d2 = orient(p3, p4, p2);
    let d3 = orient(p1, p2, p3);
    let d4 = orient(p1, p2, p4);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(p3, p4, p1))
        || (d2 == 0.0 && on_segment(p3, p4, p2))
        || (d3 == 0.0 && on_segment(p1, p2, p3))
        || (d4 == 0.0 && on_segment(p1, p2, p4))
}

/// Check a closed ring for self-intersection between non-adjacent edges
fn ring_self_intersects(ring: &[(f64, f64)]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let a1 = ring[i];
        let a2 = ring[(i + 1) % n];
        for j in (i + 1)..n {
            // Skip adjacent edges (they share a vertex by construction)
            if j == i || (j + 1) % n == i || (i + 1) % n == j {
                continue;
            }
            let b1 = ring[j];
            let b2 = ring[(j + 1) % n];
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(lat: f64, lon: f64) -> Position {
        Position::new(lat, lon, 0)
    }

    #[test]
    fn test_distance_zero_for_same_point() {
        let p = pos(40.7580, -73.9855);
        assert_eq!(distance_meters(&p, &p), 0.0);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = pos(40.7580, -73.9855);
        let b = pos(40.7484, -73.9857);
        let d_ab = distance_meters(&a, &b);
        let d_ba = distance_meters(&b, &a);
        assert!((d_ab - d_ba).abs() < 1e-9);
        // Times Square to Empire State Building is roughly 1.07 km
        assert!(d_ab > 1000.0 && d_ab < 1150.0, "got {d_ab}");
    }

    #[test]
    fn test_bearing_cardinal_directions() {
        let origin = pos(0.0, 0.0);
        assert!((bearing_degrees(&origin, &pos(1.0, 0.0)) - 0.0).abs() < 1e-6);
        assert!((bearing_degrees(&origin, &pos(0.0, 1.0)) - 90.0).abs() < 1e-6);
        assert!((bearing_degrees(&origin, &pos(-1.0, 0.0)) - 180.0).abs() < 1e-6);
        assert!((bearing_degrees(&origin, &pos(0.0, -1.0)) - 270.0).abs() < 1e-6);
    }

    #[test]
    fn test_point_in_circle_matches_distance() {
        let center = pos(40.7580, -73.9855);
        let near = pos(40.7585, -73.9855); // ~55m north
        let far = pos(40.7680, -73.9855); // ~1.1km north

        assert!(point_in_circle(&near, &center, 100.0));
        assert!(!point_in_circle(&far, &center, 100.0));
        assert_eq!(
            point_in_circle(&near, &center, 100.0),
            distance_meters(&near, &center) <= 100.0
        );
    }

    #[test]
    fn test_point_in_circle_boundary_inclusive() {
        let center = pos(0.0, 0.0);
        let p = pos(0.0, 0.001);
        let d = distance_meters(&p, &center);
        assert!(point_in_circle(&p, &center, d));
    }

    #[test]
    fn test_point_in_polygon_square() {
        let ring = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        assert!(point_in_polygon(&pos(5.0, 5.0), &ring));
        assert!(!point_in_polygon(&pos(15.0, 5.0), &ring));
        assert!(!point_in_polygon(&pos(-1.0, 5.0), &ring));
    }

    #[test]
    fn test_point_in_polygon_rotation_invariant() {
        let ring = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        let inside = pos(3.0, 7.0);
        let outside = pos(11.0, 7.0);

        for rot in 0..ring.len() {
            let mut rotated = ring.clone();
            rotated.rotate_left(rot);
            assert!(point_in_polygon(&inside, &rotated), "rotation {rot}");
            assert!(!point_in_polygon(&outside, &rotated), "rotation {rot}");
        }
    }

    #[test]
    fn test_validate_coords_rejects_out_of_range() {
        assert!(validate_coords(40.0, -73.0).is_ok());
        assert_eq!(
            validate_coords(91.0, 0.0),
            Err(GeoError::InvalidCoordinate { lat: 91.0, lon: 0.0 })
        );
        assert!(validate_coords(0.0, 181.0).is_err());
        assert!(validate_coords(0.0, -180.5).is_err());
    }

    #[test]
    fn test_validate_ring_rejects_degenerate() {
        assert_eq!(validate_ring(&[(0.0, 0.0), (1.0, 1.0)]), Err(GeoError::DegeneratePolygon(2)));
    }

    #[test]
    fn test_validate_ring_rejects_bowtie() {
        // Classic self-intersecting "bowtie" ring
        let bowtie = vec![(0.0, 0.0), (10.0, 10.0), (0.0, 10.0), (10.0, 0.0)];
        assert_eq!(validate_ring(&bowtie), Err(GeoError::SelfIntersecting));
    }

    #[test]
    fn test_validate_ring_accepts_convex() {
        let square = vec![(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)];
        assert!(validate_ring(&square).is_ok());
    }
}
