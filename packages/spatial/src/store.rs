//! In-memory feature store with an R-tree index.
//!
//! Stands in for a spatial database: a merged payload is loaded once per
//! area and queried for features near each entity.

use std::collections::BTreeMap;
use std::path::Path;

use geo::{Closest, ClosestPoint, Contains, Point};
use rstar::{AABB, RTree, RTreeObject};
use serde_json::Value;
use wikimatch_match_models::{Coordinate, MapFeature, OsmType};

use crate::area::{haversine_distance, metres_to_degrees};
use crate::osm::{features_from_payload, payload_remark};
use crate::{LoadError, compute_envelope};

/// A feature's position in the store and its bounding envelope.
struct FeatureEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Map features of one area, indexed for proximity queries.
pub struct FeatureStore {
    features: Vec<MapFeature>,
    tree: RTree<FeatureEntry>,
}

impl FeatureStore {
    #[must_use]
    pub fn new(features: Vec<MapFeature>) -> Self {
        let entries = features
            .iter()
            .enumerate()
            .map(|(index, f)| FeatureEntry {
                index,
                envelope: f.geometry.as_ref().map_or_else(
                    || AABB::from_point([f.coordinate.lon, f.coordinate.lat]),
                    compute_envelope,
                ),
            })
            .collect();

        Self {
            features,
            tree: RTree::bulk_load(entries),
        }
    }

    /// Builds a store from a parsed payload.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Remark`] when the payload carries a server
    /// error remark, or [`LoadError::Json`] when it is malformed.
    pub fn from_payload(payload: &Value) -> Result<Self, LoadError> {
        if let Some(remark) = payload_remark(payload)
            && remark.contains("runtime error")
        {
            return Err(LoadError::Remark {
                message: remark.to_string(),
            });
        }
        Ok(Self::new(features_from_payload(payload)?))
    }

    /// Loads a merged payload file.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Empty`] for a missing or empty file,
    /// [`LoadError::OutOfMemory`] when it exceeds `max_bytes`, and I/O or
    /// parse errors otherwise.
    pub fn load_file(path: &Path, max_bytes: u64) -> Result<Self, LoadError> {
        let size = match std::fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(LoadError::Empty),
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            return Err(LoadError::Empty);
        }
        if size > max_bytes {
            return Err(LoadError::OutOfMemory {
                size,
                limit: max_bytes,
            });
        }

        let bytes = std::fs::read(path)?;
        let payload: Value = serde_json::from_slice(&bytes)?;
        let store = Self::from_payload(&payload)?;
        log::info!("loaded {} features from {}", store.len(), path.display());
        Ok(store)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> impl Iterator<Item = &MapFeature> {
        self.features.iter()
    }

    #[must_use]
    pub fn get(&self, osm_type: OsmType, osm_id: i64) -> Option<&MapFeature> {
        self.features
            .iter()
            .find(|f| f.osm_type == osm_type && f.osm_id == osm_id)
    }

    /// Features already tagged with a knowledge-base item, by item id.
    #[must_use]
    pub fn existing_links(&self) -> BTreeMap<String, Vec<(OsmType, i64)>> {
        let mut out: BTreeMap<String, Vec<(OsmType, i64)>> = BTreeMap::new();
        for f in &self.features {
            let Some(qid) = f.tags.get("wikidata").map(str::trim) else {
                continue;
            };
            let valid = qid
                .strip_prefix('Q')
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            if valid {
                out.entry(qid.to_string()).or_default().push(f.key());
            }
        }
        out
    }

    /// Metres from `point` to the nearest part of a feature; zero inside
    /// polygons.
    fn distance_to(feature: &MapFeature, point: Coordinate) -> f64 {
        let p = Point::new(point.lon, point.lat);
        let Some(geometry) = &feature.geometry else {
            return haversine_distance(point, feature.coordinate);
        };
        if geometry.contains(&p) {
            return 0.0;
        }
        match geometry.closest_point(&p) {
            Closest::Intersection(_) => 0.0,
            Closest::SinglePoint(c) => haversine_distance(point, Coordinate::new(c.y(), c.x())),
            Closest::Indeterminate => haversine_distance(point, feature.coordinate),
        }
    }

    /// Features within `max_distance` metres of `point` that satisfy
    /// `filter`, nearest first, at most `limit` of them. Returned copies
    /// have `distance` filled in.
    pub fn nearby<F>(&self, point: Coordinate, max_distance: f64, limit: usize, filter: F) -> Vec<MapFeature>
    where
        F: Fn(&MapFeature) -> bool,
    {
        let (dlat, dlon) = metres_to_degrees(max_distance, point.lat);
        let query = AABB::from_corners(
            [point.lon - dlon, point.lat - dlat],
            [point.lon + dlon, point.lat + dlat],
        );

        let mut found: Vec<MapFeature> = self
            .tree
            .locate_in_envelope_intersecting(&query)
            .map(|entry| &self.features[entry.index])
            .filter(|f| filter(f))
            .filter_map(|f| {
                let distance = Self::distance_to(f, point);
                (distance <= max_distance).then(|| MapFeature {
                    distance,
                    ..f.clone()
                })
            })
            .collect();

        found.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.key().cmp(&b.key()))
        });
        found.truncate(limit);
        found
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> FeatureStore {
        let payload = json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 51.5000, "lon": -0.1000, "tags": {"name": "Near", "amenity": "pub"}},
                {"type": "node", "id": 2, "lat": 51.5100, "lon": -0.1000, "tags": {"name": "Far", "amenity": "pub"}},
                {"type": "node", "id": 3, "lat": 51.5001, "lon": -0.1000, "tags": {"name": "Shop", "shop": "yes", "wikidata": "Q42"}},
                {"type": "way", "id": 4, "tags": {"building": "yes", "wikidata": "bogus"},
                 "geometry": [
                    {"lat": 51.499, "lon": -0.101}, {"lat": 51.499, "lon": -0.099},
                    {"lat": 51.501, "lon": -0.099}, {"lat": 51.501, "lon": -0.101},
                    {"lat": 51.499, "lon": -0.101}
                 ]}
            ]
        });
        FeatureStore::from_payload(&payload).unwrap()
    }

    #[test]
    fn nearby_sorted_and_filtered() {
        let s = store();
        let point = Coordinate::new(51.5, -0.1);
        let pubs = s.nearby(point, 500.0, 10, |f| f.tags.get("amenity") == Some("pub"));
        assert_eq!(pubs.len(), 1);
        assert_eq!(pubs[0].osm_id, 1);

        let all = s.nearby(point, 2000.0, 10, |_| true);
        let ids: Vec<i64> = all.iter().map(|f| f.osm_id).collect();
        assert_eq!(ids, vec![1, 4, 3, 2]);
        assert!(all[1].distance.abs() < f64::EPSILON);
    }

    #[test]
    fn nearby_respects_limit() {
        let s = store();
        assert_eq!(s.nearby(Coordinate::new(51.5, -0.1), 2000.0, 2, |_| true).len(), 2);
    }

    #[test]
    fn existing_links_require_valid_qid() {
        let links = store().existing_links();
        assert_eq!(links.len(), 1);
        assert_eq!(links["Q42"], vec![(OsmType::Node, 3)]);
    }

    #[test]
    fn runtime_remark_is_an_error() {
        let payload = json!({"elements": [], "remark": "runtime error: Query run out of memory"});
        assert!(matches!(
            FeatureStore::from_payload(&payload),
            Err(LoadError::Remark { .. })
        ));
    }

    #[test]
    fn oversized_file_is_out_of_memory() {
        let dir = std::env::temp_dir().join(format!("wikimatch_store_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("big.json");
        std::fs::write(&path, r#"{"elements": []}"#).unwrap();

        let err = FeatureStore::load_file(&path, 4).err().unwrap();
        assert_eq!(err.to_string(), "out of memory");
        assert!(FeatureStore::load_file(&path, 1024).unwrap().is_empty());
        assert!(matches!(
            FeatureStore::load_file(&dir.join("missing.json"), 1024),
            Err(LoadError::Empty)
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
