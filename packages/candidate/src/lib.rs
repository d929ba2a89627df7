#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Candidate selection.
//!
//! [`CandidateFilter`] decides which nearby map features are the same
//! real-world thing as a knowledge-base entity. Each feature must carry
//! identifier, address or name evidence and survive the rejection
//! [`guards`]; several survivors are then narrowed by [`disambiguate`].

pub mod catalog;
pub mod disambiguate;
pub mod guards;
pub mod tags;

use std::collections::{BTreeMap, BTreeSet};

use wikimatch_match_models::{Candidate, Entity, MapFeature, MatchEvidence, MatchKind, OsmType};
use wikimatch_names::{
    AddressMatch, check_for_address_in_extract, check_for_match, check_identifier,
    check_name_matches_address,
};
use wikimatch_spatial::FeatureStore;

use crate::catalog::{endings_for, endings_for_classes, max_distance_km};
use crate::disambiguate::{Found, disambiguate};
use crate::guards::{EvidenceCheck, FeatureCheck, evidence_rejection, feature_rejection};
use crate::tags::{expected_tags, find_matching_tags, is_building_only_match, matches_any};

/// Most features considered per entity.
pub const NEARBY_LIMIT: usize = 50;

/// Any node this close to the entity's coordinate is considered, whatever
/// its tags.
pub const CLOSE_NODE_METRES: f64 = 10.0;

/// Matches features to entities for one area.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Accept features that are nothing but an address node.
    pub match_address_nodes: bool,
    /// Names of the enclosing places, for stripping from names.
    pub place_names: Vec<String>,
}

/// Result of comparing stored candidates with a fresh selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Candidates to insert or update.
    pub upserts: Vec<Candidate>,
    /// Stored candidates no longer found.
    pub removals: Vec<(OsmType, i64)>,
}

fn is_lighthouse(entity: &Entity) -> bool {
    entity.criteria.contains("man_made=lighthouse") || entity.is_instance_of("Q39715")
}

impl CandidateFilter {
    #[must_use]
    pub const fn new(match_address_nodes: bool, place_names: Vec<String>) -> Self {
        Self {
            match_address_nodes,
            place_names,
        }
    }

    /// Search radius around the entity in metres.
    #[must_use]
    pub fn search_radius(entity: &Entity) -> f64 {
        max_distance_km(entity.criteria.as_set()) * 1000.0
    }

    fn ignored_tags(entity: &Entity) -> &'static [&'static str] {
        if entity.is_historic_district() {
            &["building"]
        } else {
            &[]
        }
    }

    /// Features worth comparing with the entity: those carrying an expected
    /// tag within the search radius, plus any node right on top of it.
    #[must_use]
    pub fn nearby(entity: &Entity, store: &FeatureStore) -> Vec<MapFeature> {
        let Some(point) = entity.coordinate else {
            return vec![];
        };
        let expected = expected_tags(entity, Self::ignored_tags(entity));
        if expected.is_empty() {
            return vec![];
        }

        let mut found = store.nearby(point, Self::search_radius(entity), NEARBY_LIMIT, |f| {
            matches_any(&f.tags, expected.iter().map(String::as_str))
        });
        let seen: BTreeSet<(OsmType, i64)> = found.iter().map(MapFeature::key).collect();
        found.extend(
            store
                .nearby(point, CLOSE_NODE_METRES, NEARBY_LIMIT, |f| f.osm_type == OsmType::Node)
                .into_iter()
                .filter(|f| !seen.contains(&f.key())),
        );
        found
    }

    fn endings(entity: &Entity) -> Vec<String> {
        if entity.is_farmhouse() {
            return vec![];
        }
        let mut endings = endings_for(entity.criteria.as_set());
        endings.extend(endings_for_classes(&entity.instance_of));
        if entity.is_hamlet() {
            endings.remove("house");
        }
        endings.remove("street");
        endings.into_iter().collect()
    }

    /// A feature carrying the entity's NRHP reference number, when exactly
    /// one does.
    fn nrhp_match(entity: &Entity, nearby: &[MapFeature]) -> Option<Found> {
        let refs = entity.ref_nrhp();
        if refs.is_empty() {
            return None;
        }
        let mut hits = nearby
            .iter()
            .filter(|f| f.tags.get("ref:nrhp").is_some_and(|v| refs.contains(&v)));
        let feature = hits.next()?;
        if hits.next().is_some() {
            return None;
        }
        let value = feature.tags.get("ref:nrhp").unwrap_or_default().to_string();
        let mut identifiers = BTreeMap::new();
        identifiers.insert("ref:nrhp".to_string(), vec![value]);
        Some(Found {
            feature: feature.clone(),
            evidence: MatchEvidence {
                identifiers,
                ..MatchEvidence::default()
            },
        })
    }

    /// Evidence that the feature is the entity, or `None` when it is not.
    fn check_feature(
        &self,
        entity: &Entity,
        feature: &MapFeature,
        endings: &[String],
        expected: &BTreeSet<String>,
    ) -> Option<Found> {
        let entity_names = entity.names_by_text();
        let name_texts: Vec<&str> = entity_names.keys().copied().collect();

        let identifiers = check_identifier(&feature.tags, &entity.identifiers);
        let address = check_name_matches_address(&feature.tags, &name_texts);

        let check = FeatureCheck {
            entity,
            feature,
            identifier_match: !identifiers.is_empty(),
            address,
            match_address_nodes: self.match_address_nodes,
        };
        if let Some(reason) = feature_rejection(&check) {
            log::debug!("{}: skip {}: {reason}", entity.qid, feature.identifier());
            return None;
        }

        let address = address == AddressMatch::Match
            || entity
                .extract
                .as_deref()
                .is_some_and(|extract| check_for_address_in_extract(&feature.tags, extract));

        let mut names = check_for_match(
            &feature.tags,
            &entity_names,
            endings,
            &self.place_names,
            !entity.is_hamlet(),
        );
        if !is_lighthouse(entity) {
            names.remove("seamark:name");
        }

        if identifiers.is_empty() && !address && names.is_empty() {
            return None;
        }

        let evidence = MatchEvidence {
            identifiers,
            address,
            names,
            matching_tags: find_matching_tags(&feature.tags, expected),
        };
        let check = EvidenceCheck {
            entity,
            feature,
            evidence: &evidence,
            building_only: is_building_only_match(&evidence.matching_tags),
        };
        if let Some(reason) = evidence_rejection(&check) {
            log::debug!("{}: reject {}: {reason}", entity.qid, feature.identifier());
            return None;
        }

        Some(Found {
            feature: feature.clone(),
            evidence,
        })
    }

    /// Nearby features that are the entity.
    ///
    /// A unique NRHP reference hit wins outright. Otherwise every feature
    /// is checked for evidence and guards, and the survivors are
    /// disambiguated. The result is sorted by distance, then feature.
    #[must_use]
    pub fn select_candidates(&self, entity: &Entity, nearby: &[MapFeature]) -> Vec<Candidate> {
        let found = if let Some(hit) = Self::nrhp_match(entity, nearby) {
            vec![hit]
        } else {
            let endings = Self::endings(entity);
            let expected = expected_tags(entity, Self::ignored_tags(entity));
            let found: Vec<Found> = nearby
                .iter()
                .filter_map(|f| self.check_feature(entity, f, &endings, &expected))
                .collect();
            disambiguate(entity, found)
        };

        let mut candidates: Vec<Candidate> = found
            .into_iter()
            .map(|f| to_candidate(entity, f))
            .collect();
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance).then_with(|| a.key().cmp(&b.key())));
        candidates
    }
}

fn to_candidate(entity: &Entity, found: Found) -> Candidate {
    let Found { feature, evidence } = found;
    Candidate {
        qid: entity.qid.clone(),
        osm_type: feature.osm_type,
        osm_id: feature.osm_id,
        name: feature.name().map(ToString::to_string),
        kind: evidence.best_kind().unwrap_or(MatchKind::Identifier),
        distance: feature.distance,
        tags: feature.tags,
        evidence,
    }
}

/// Compares stored candidates with a fresh selection for the same entity.
#[must_use]
pub fn reconcile(existing: &[Candidate], found: &[Candidate]) -> Reconciled {
    let found_keys: BTreeSet<(OsmType, i64)> = found.iter().map(Candidate::key).collect();
    Reconciled {
        upserts: found.to_vec(),
        removals: existing
            .iter()
            .map(Candidate::key)
            .filter(|k| !found_keys.contains(k))
            .collect(),
    }
}

/// Reasons a selected candidate needs a second look before it is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReviewNote {
    /// The feature's name is just a number.
    NumberAsName,
    /// The entity has more than one candidate.
    MultipleCandidates,
    /// The feature is a candidate for several entities.
    MatchesMultipleItems,
    /// The feature is already linked to some entity.
    AlreadyTagged,
}

impl ReviewNote {
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::NumberAsName => "number as name",
            Self::MultipleCandidates => "multiple candidates",
            Self::MatchesMultipleItems => "matches multiple items",
            Self::AlreadyTagged => "already tagged",
        }
    }
}

/// Flags candidates across all entities of an area that should not be
/// linked automatically.
#[must_use]
pub fn review_notes(
    by_entity: &BTreeMap<String, Vec<Candidate>>,
) -> BTreeMap<(String, OsmType, i64), BTreeSet<ReviewNote>> {
    let mut per_feature: BTreeMap<(OsmType, i64), usize> = BTreeMap::new();
    for c in by_entity.values().flatten() {
        *per_feature.entry(c.key()).or_default() += 1;
    }

    let mut notes: BTreeMap<(String, OsmType, i64), BTreeSet<ReviewNote>> = BTreeMap::new();
    for (qid, candidates) in by_entity {
        for c in candidates {
            let mut flags = BTreeSet::new();
            let number_name = |k: &str| {
                c.tags
                    .get(k)
                    .is_some_and(|v| !v.is_empty() && v.chars().all(|ch| ch.is_ascii_digit()))
            };
            if number_name("name") || number_name("addr:housename") {
                flags.insert(ReviewNote::NumberAsName);
            }
            if candidates.len() > 1 {
                flags.insert(ReviewNote::MultipleCandidates);
            }
            if per_feature.get(&c.key()).copied().unwrap_or_default() > 1 {
                flags.insert(ReviewNote::MatchesMultipleItems);
            }
            if c.tags.contains_key("wikidata") {
                flags.insert(ReviewNote::AlreadyTagged);
            }
            if !flags.is_empty() {
                notes.insert((qid.clone(), c.osm_type, c.osm_id), flags);
            }
        }
    }
    notes
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wikimatch_match_models::{Coordinate, IdentifierClaim, NameCandidate, NameProvenance, TagMap};

    use super::*;

    fn pub_entity() -> Entity {
        let mut e = Entity::new("Q100");
        e.names.push(NameCandidate::new("The Red Lion", NameProvenance::Label, "en"));
        e.coordinate = Some(Coordinate::new(51.5, -0.1));
        e.criteria.insert("amenity=pub");
        e
    }

    fn store() -> FeatureStore {
        FeatureStore::from_payload(&json!({
            "elements": [
                {"type": "node", "id": 1, "lat": 51.5001, "lon": -0.1001,
                 "tags": {"name": "Red Lion", "amenity": "pub"}},
                {"type": "node", "id": 2, "lat": 51.5002, "lon": -0.1002,
                 "tags": {"name": "Blue Boar", "amenity": "pub"}},
                {"type": "node", "id": 3, "lat": 51.6, "lon": -0.1,
                 "tags": {"name": "Red Lion", "amenity": "pub"}},
                {"type": "node", "id": 4, "lat": 51.5, "lon": -0.1,
                 "tags": {"addr:housenumber": "1", "addr:street": "High Street"}}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn nearby_uses_expected_tags_and_close_nodes() {
        let e = pub_entity();
        let keys: Vec<i64> = CandidateFilter::nearby(&e, &store())
            .iter()
            .map(|f| f.osm_id)
            .collect();
        assert!(keys.contains(&1));
        assert!(keys.contains(&2));
        assert!(keys.contains(&4));
        assert!(!keys.contains(&3));
    }

    #[test]
    fn selects_named_pub() {
        let e = pub_entity();
        let filter = CandidateFilter::default();
        let nearby = CandidateFilter::nearby(&e, &store());
        let candidates = filter.select_candidates(&e, &nearby);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].osm_id, 1);
        assert_eq!(candidates[0].qid, "Q100");
        assert!(candidates[0].evidence.matching_tags.contains("amenity=pub"));
    }

    #[test]
    fn selection_is_idempotent() {
        let e = pub_entity();
        let filter = CandidateFilter::default();
        let nearby = CandidateFilter::nearby(&e, &store());
        assert_eq!(
            filter.select_candidates(&e, &nearby),
            filter.select_candidates(&e, &nearby)
        );
    }

    #[test]
    fn nrhp_reference_short_circuits() {
        let mut e = Entity::new("Q200");
        e.coordinate = Some(Coordinate::new(40.0, -75.0));
        e.criteria.insert("building");
        e.identifiers.push(IdentifierClaim {
            property: "P649".to_string(),
            label: "NRHP reference number".to_string(),
            osm_keys: vec!["ref:nrhp".to_string()],
            values: vec!["78000001".to_string()],
        });
        let feature = MapFeature {
            osm_type: OsmType::Way,
            osm_id: 9,
            kind: wikimatch_match_models::GeometryKind::Polygon,
            tags: [("building", "yes"), ("ref:nrhp", "78000001")].into_iter().collect::<TagMap>(),
            coordinate: Coordinate::new(40.0, -75.0),
            distance: 12.0,
            area: 100.0,
            geometry: None,
        };
        let candidates = CandidateFilter::default().select_candidates(&e, &[feature]);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, MatchKind::Identifier);
    }

    #[test]
    fn reconcile_removes_missing() {
        let e = pub_entity();
        let nearby = CandidateFilter::nearby(&e, &store());
        let found = CandidateFilter::default().select_candidates(&e, &nearby);
        let mut stale = found[0].clone();
        stale.osm_id = 99;

        let r = reconcile(&[found[0].clone(), stale], &found);
        assert_eq!(r.upserts, found);
        assert_eq!(r.removals, vec![(OsmType::Node, 99)]);
    }

    #[test]
    fn review_flags_shared_feature() {
        let e = pub_entity();
        let nearby = CandidateFilter::nearby(&e, &store());
        let found = CandidateFilter::default().select_candidates(&e, &nearby);
        let mut other = found.clone();
        other[0].qid = "Q101".to_string();

        let mut by_entity = BTreeMap::new();
        by_entity.insert("Q100".to_string(), found);
        by_entity.insert("Q101".to_string(), other);
        let notes = review_notes(&by_entity);
        assert!(notes[&("Q100".to_string(), OsmType::Node, 1)].contains(&ReviewNote::MatchesMultipleItems));
    }
}
