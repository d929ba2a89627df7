//! Spherical area and distance approximations.

use geo::{LineString, MultiPolygon, Polygon};
use wikimatch_match_models::Coordinate;
use wikimatch_place_models::BoundingBox;

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Great-circle distance in metres.
#[must_use]
pub fn haversine_distance(a: Coordinate, b: Coordinate) -> f64 {
    let (phi1, phi2) = (a.lat.to_radians(), b.lat.to_radians());
    let (d_phi, d_lambda) = ((b.lat - a.lat).to_radians(), (b.lon - a.lon).to_radians());
    let h = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().atan2((1.0 - h).sqrt())
}

/// Signed area of a ring in square metres on a sphere (Chamberlain and
/// Duquette). Counter-clockwise rings are positive.
fn ring_area(ring: &LineString<f64>) -> f64 {
    let total: f64 = ring
        .lines()
        .map(|line| {
            let (p1, p2) = (line.start, line.end);
            (p2.x - p1.x).to_radians()
                * (2.0 + p1.y.to_radians().sin() + p2.y.to_radians().sin())
        })
        .sum();
    total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0
}

/// Area of a polygon in square metres, holes subtracted.
#[must_use]
pub fn polygon_area_m2(polygon: &Polygon<f64>) -> f64 {
    let outer = ring_area(polygon.exterior()).abs();
    let holes: f64 = polygon.interiors().iter().map(|r| ring_area(r).abs()).sum();
    (outer - holes).max(0.0)
}

#[must_use]
pub fn multipolygon_area_sq_km(mp: &MultiPolygon<f64>) -> f64 {
    mp.0.iter().map(polygon_area_m2).sum::<f64>() / 1_000_000.0
}

/// Area enclosed by a bounding box, in square kilometres.
#[must_use]
pub fn bbox_area_sq_km(bbox: &BoundingBox) -> f64 {
    let d_lambda = (bbox.east - bbox.west).to_radians().abs();
    let band = (bbox.north.to_radians().sin() - bbox.south.to_radians().sin()).abs();
    EARTH_RADIUS_M * EARTH_RADIUS_M * d_lambda * band / 1_000_000.0
}

/// Degrees of latitude and longitude spanned by `metres` at `lat`.
#[must_use]
pub fn metres_to_degrees(metres: f64, lat: f64) -> (f64, f64) {
    let dlat = (metres / EARTH_RADIUS_M).to_degrees();
    let cos = lat.to_radians().cos().abs().max(1e-6);
    (dlat, (dlat / cos).min(180.0))
}

#[cfg(test)]
mod tests {
    use geo::polygon;

    use super::*;

    #[test]
    fn one_degree_of_latitude() {
        let d = haversine_distance(Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0));
        assert!((d - 111_195.0).abs() < 100.0, "{d}");
    }

    #[test]
    fn polygon_matches_bbox_area() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let poly = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let a = multipolygon_area_sq_km(&MultiPolygon(vec![poly]));
        let b = bbox_area_sq_km(&bbox);
        assert!((a - b).abs() / b < 0.01, "{a} vs {b}");
        assert!((b - 12_364.0).abs() < 50.0, "{b}");
    }

    #[test]
    fn hole_is_subtracted() {
        let poly = polygon!(
            exterior: [(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)],
            interiors: [[(x: 0.25, y: 0.25), (x: 0.75, y: 0.25), (x: 0.75, y: 0.75), (x: 0.25, y: 0.75)]],
        );
        let full = bbox_area_sq_km(&BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let a = polygon_area_m2(&poly) / 1_000_000.0;
        assert!((a / full - 0.75).abs() < 0.01);
    }
}
