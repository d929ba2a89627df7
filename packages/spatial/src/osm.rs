//! Map-extract JSON payloads.
//!
//! Payloads are the JSON form of an `out geom` query: an `elements` array
//! of nodes with `lat`/`lon`, ways with an inline `geometry` and
//! relations whose `members` carry their own geometry.

use std::collections::BTreeSet;

use geo::{
    BoundingRect, Centroid, Coord, Geometry, LineString, MultiLineString,
    MultiPolygon, Point, Polygon, coord,
};
use serde::Deserialize;
use serde_json::Value;
use wikimatch_match_models::{Coordinate, GeometryKind, MapFeature, OsmType, TagMap};

use crate::area::polygon_area_m2;

#[derive(Debug, Clone, Copy, Deserialize)]
struct LatLon {
    lat: f64,
    lon: f64,
}

impl From<LatLon> for Coord<f64> {
    fn from(p: LatLon) -> Self {
        coord! { x: p.lon, y: p.lat }
    }
}

#[derive(Debug, Deserialize)]
struct Member {
    #[serde(default)]
    role: String,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    osm_type: OsmType,
    id: i64,
    lat: Option<f64>,
    lon: Option<f64>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
    #[serde(default)]
    members: Vec<Member>,
    #[serde(default)]
    tags: TagMap,
}

/// Extracts the server remark, which carries runtime errors.
#[must_use]
pub fn payload_remark(payload: &Value) -> Option<&str> {
    payload.get("remark").and_then(Value::as_str)
}

/// Merges several payloads into one, keeping the first copy of each
/// element. Elements keep their original JSON.
#[must_use]
pub fn merge_payloads<I: IntoIterator<Item = Value>>(payloads: I) -> Value {
    let mut seen: BTreeSet<(String, i64)> = BTreeSet::new();
    let mut elements = Vec::new();

    for payload in payloads {
        let Value::Object(mut obj) = payload else {
            continue;
        };
        let Some(Value::Array(items)) = obj.remove("elements") else {
            continue;
        };
        for element in items {
            let key = (
                element
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                element.get("id").and_then(Value::as_i64).unwrap_or_default(),
            );
            if seen.insert(key) {
                elements.push(element);
            }
        }
    }

    serde_json::json!({ "version": 0.6, "elements": elements })
}

fn line(points: &[Option<LatLon>]) -> Vec<Coord<f64>> {
    points.iter().flatten().copied().map(Coord::from).collect()
}

fn is_closed(ring: &[Coord<f64>]) -> bool {
    ring.len() >= 4 && ring.first() == ring.last()
}

/// Closed ways are areas unless their tags describe a linear feature.
fn closed_way_is_area(tags: &TagMap) -> bool {
    if tags.get("area") == Some("yes") {
        return true;
    }
    !(tags.contains_key("highway") || tags.contains_key("barrier"))
}

/// Joins open way segments end to end into closed rings; segments that
/// never close are dropped.
fn assemble_rings(mut segments: Vec<Vec<Coord<f64>>>) -> Vec<Vec<Coord<f64>>> {
    let mut rings = Vec::new();

    while let Some(mut ring) = segments.pop() {
        loop {
            if is_closed(&ring) {
                rings.push(ring);
                break;
            }
            let (Some(&first), Some(&last)) = (ring.first(), ring.last()) else {
                break;
            };
            let next = segments.iter().position(|s| {
                s.first() == Some(&last)
                    || s.last() == Some(&last)
                    || s.first() == Some(&first)
                    || s.last() == Some(&first)
            });
            let Some(pos) = next else {
                break;
            };
            let mut seg = segments.swap_remove(pos);
            if seg.first() == Some(&last) {
                ring.extend(seg.into_iter().skip(1));
            } else if seg.last() == Some(&last) {
                seg.reverse();
                ring.extend(seg.into_iter().skip(1));
            } else if seg.last() == Some(&first) {
                seg.extend(ring.into_iter().skip(1));
                ring = seg;
            } else {
                seg.reverse();
                seg.extend(ring.into_iter().skip(1));
                ring = seg;
            }
        }
    }
    rings
}

fn multipolygon_from_members(members: &[Member]) -> Option<MultiPolygon<f64>> {
    use geo::Contains;

    let segments = |role: &str| {
        members
            .iter()
            .filter(|m| m.role == role || (role == "outer" && m.role.is_empty()))
            .map(|m| line(&m.geometry))
            .filter(|l| l.len() >= 2)
            .collect::<Vec<_>>()
    };

    let outers = assemble_rings(segments("outer"));
    if outers.is_empty() {
        return None;
    }
    let inners = assemble_rings(segments("inner"));

    let mut polygons: Vec<(LineString<f64>, Vec<LineString<f64>>)> = outers
        .into_iter()
        .map(|r| (LineString::from(r), Vec::new()))
        .collect();

    for inner in inners {
        let Some(&start) = inner.first() else {
            continue;
        };
        let holder = polygons
            .iter_mut()
            .find(|(outer, _)| Polygon::new(outer.clone(), vec![]).contains(&Point::from(start)));
        if let Some((_, holes)) = holder {
            holes.push(LineString::from(inner));
        }
    }

    Some(MultiPolygon(
        polygons
            .into_iter()
            .map(|(outer, holes)| Polygon::new(outer, holes))
            .collect(),
    ))
}

fn element_geometry(el: &Element) -> Option<(GeometryKind, Geometry<f64>)> {
    match el.osm_type {
        OsmType::Node => {
            let point = Point::new(el.lon?, el.lat?);
            Some((GeometryKind::Point, Geometry::Point(point)))
        }
        OsmType::Way => {
            let coords = line(&el.geometry);
            if coords.len() < 2 {
                return None;
            }
            if is_closed(&coords) && closed_way_is_area(&el.tags) {
                let polygon = Polygon::new(LineString::from(coords), vec![]);
                Some((GeometryKind::Polygon, Geometry::Polygon(polygon)))
            } else {
                Some((GeometryKind::Line, Geometry::LineString(LineString::from(coords))))
            }
        }
        OsmType::Relation => {
            let multi = matches!(el.tags.get("type"), Some("multipolygon" | "boundary"));
            if multi && let Some(mp) = multipolygon_from_members(&el.members) {
                return Some((GeometryKind::Polygon, Geometry::MultiPolygon(mp)));
            }
            let lines: Vec<LineString<f64>> = el
                .members
                .iter()
                .map(|m| line(&m.geometry))
                .filter(|l| !l.is_empty())
                .map(LineString::from)
                .collect();
            if lines.is_empty() {
                return None;
            }
            Some((
                GeometryKind::Line,
                Geometry::MultiLineString(MultiLineString::new(lines)),
            ))
        }
    }
}

fn geometry_area_m2(geometry: &Geometry<f64>) -> f64 {
    match geometry {
        Geometry::Polygon(p) => polygon_area_m2(p),
        Geometry::MultiPolygon(mp) => mp.0.iter().map(polygon_area_m2).sum(),
        _ => 0.0,
    }
}

fn representative_point(geometry: &Geometry<f64>) -> Option<Coordinate> {
    geometry
        .centroid()
        .or_else(|| geometry.bounding_rect().map(|r| Point::from(r.center())))
        .map(|p| Coordinate::new(p.y(), p.x()))
}

/// Converts the tagged elements of a payload into map features.
///
/// Untagged elements (way nodes and relation members pulled in by
/// recursion) are skipped, as are elements without usable geometry.
///
/// # Errors
///
/// Returns an error if the payload does not have the expected shape.
pub fn features_from_payload(payload: &Value) -> Result<Vec<MapFeature>, serde_json::Error> {
    let elements = match payload.get("elements") {
        Some(v) => Vec::<Element>::deserialize(v)?,
        None => Vec::new(),
    };

    let mut features = Vec::new();
    for el in elements {
        if el.tags.is_empty() {
            continue;
        }
        let Some((kind, geometry)) = element_geometry(&el) else {
            log::debug!("no geometry for {}/{}", el.osm_type, el.id);
            continue;
        };
        let Some(coordinate) = representative_point(&geometry) else {
            continue;
        };
        features.push(MapFeature {
            osm_type: el.osm_type,
            osm_id: el.id,
            kind,
            tags: el.tags,
            coordinate,
            distance: 0.0,
            area: geometry_area_m2(&geometry),
            geometry: Some(geometry),
        });
    }
    Ok(features)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample() -> Value {
        json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 51.5, "lon": -0.1, "tags": {"name": "Pub"}},
                {"type": "node", "id": 2, "lat": 51.5, "lon": -0.1},
                {"type": "way", "id": 10, "tags": {"building": "yes", "name": "Hall"},
                 "geometry": [
                    {"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 0.01},
                    {"lat": 0.01, "lon": 0.01}, {"lat": 0.01, "lon": 0.0},
                    {"lat": 0.0, "lon": 0.0}
                 ]},
                {"type": "way", "id": 11, "tags": {"highway": "primary", "name": "Ring Road"},
                 "geometry": [
                    {"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 0.01},
                    {"lat": 0.01, "lon": 0.01}, {"lat": 0.0, "lon": 0.0}
                 ]},
                {"type": "relation", "id": 20, "tags": {"type": "multipolygon", "name": "Park"},
                 "members": [
                    {"type": "way", "ref": 1, "role": "outer",
                     "geometry": [{"lat": 1.0, "lon": 1.0}, {"lat": 1.0, "lon": 2.0}, {"lat": 2.0, "lon": 2.0}]},
                    {"type": "way", "ref": 2, "role": "outer",
                     "geometry": [{"lat": 2.0, "lon": 2.0}, {"lat": 2.0, "lon": 1.0}, {"lat": 1.0, "lon": 1.0}]}
                 ]}
            ]
        })
    }

    #[test]
    fn parses_tagged_elements() {
        let features = features_from_payload(&sample()).unwrap();
        let kinds: Vec<(i64, GeometryKind)> = features.iter().map(|f| (f.osm_id, f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                (1, GeometryKind::Point),
                (10, GeometryKind::Polygon),
                (11, GeometryKind::Line),
                (20, GeometryKind::Polygon),
            ]
        );
        let park = &features[3];
        assert!((park.coordinate.lat - 1.5).abs() < 1e-6);
        assert!(park.area > 1.0e10);
    }

    #[test]
    fn merge_dedupes_by_type_and_id() {
        let a = json!({"elements": [{"type": "node", "id": 1}, {"type": "way", "id": 1}]});
        let b = json!({"elements": [{"type": "node", "id": 1}, {"type": "node", "id": 2}]});
        let merged = merge_payloads([a, b]);
        assert_eq!(merged["elements"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn remark_is_exposed() {
        let p = json!({"elements": [], "remark": "runtime error: Query timed out"});
        assert_eq!(payload_remark(&p), Some("runtime error: Query timed out"));
    }
}
