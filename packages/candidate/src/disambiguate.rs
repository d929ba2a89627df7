//! Narrowing several matched features down to the ones that are the entity.
//!
//! Every step takes the surviving matches and returns a subset. A step that
//! has nothing to say returns its input unchanged.

use std::sync::LazyLock;

use geo::{Contains, Point};
use regex::Regex;
use wikimatch_match_models::{Entity, GeometryKind, MapFeature, MatchEvidence, OsmType};

use crate::tags::is_building_only_match;

/// A feature that survived the per-feature checks, with its evidence.
#[derive(Debug, Clone)]
pub struct Found {
    pub feature: MapFeature,
    pub evidence: MatchEvidence,
}

impl Found {
    fn building_only(&self) -> bool {
        is_building_only_match(&self.evidence.matching_tags)
    }

    fn has_tag(&self, key: &str, value: &str) -> bool {
        self.feature.tags.has(key, value)
    }
}

static PLACE_CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(Districts|Areas|Cities|Towns|Villages|Airports)\b").expect("valid regex")
});

static FARMHOUSE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(.*) farm ?house$").expect("valid regex"));

/// Keeps the only match within 50 m when nothing else is closer than 1 km.
#[must_use]
pub fn filter_distant(found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 {
        return found;
    }
    let mut chosen = None;
    for (i, f) in found.iter().enumerate() {
        if f.feature.distance < 50.0 {
            if chosen.is_some() {
                return found;
            }
            chosen = Some(i);
        } else if f.feature.distance < 1000.0 {
            return found;
        }
    }
    match chosen {
        Some(i) => found.into_iter().skip(i).take(1).collect(),
        None => found,
    }
}

fn is_proper_name_key(key: &str) -> bool {
    key == "name" || key.starts_with("name:")
}

/// Prefers matches on `name` or `name:*` over ones that only matched an
/// operator, house name or other secondary name.
#[must_use]
pub fn prefer_proper_name_match(found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 {
        return found;
    }
    let proper = found
        .iter()
        .filter(|f| f.evidence.names.keys().any(|k| is_proper_name_key(k)))
        .count();
    if proper == 0 || proper == found.len() {
        return found;
    }
    found
        .into_iter()
        .filter(|f| f.evidence.names.keys().any(|k| is_proper_name_key(k)))
        .collect()
}

/// Prefers matches on a tag with `key` over building-only matches.
#[must_use]
pub fn prefer_key_over_building(found: Vec<Found>, key: &str) -> Vec<Found> {
    if found.len() < 2 {
        return found;
    }
    let prefix = format!("{key}=");
    let with_key = |f: &Found| {
        f.evidence
            .matching_tags
            .iter()
            .any(|t| t == key || t.starts_with(&prefix))
    };
    let (keyed, rest): (Vec<Found>, Vec<Found>) = found.into_iter().partition(|f| with_key(f));
    if keyed.is_empty() || !rest.iter().all(Found::building_only) {
        return keyed.into_iter().chain(rest).collect();
    }
    keyed
}

/// Prefers matches with some tag beyond `building`.
///
/// When every such match is over 100 m away and a building-only match is
/// within 10 m, distance wins and everything is kept.
#[must_use]
pub fn prefer_tag_match_over_building_only(found: Vec<Found>) -> Vec<Found> {
    let (good, less_good): (Vec<Found>, Vec<Found>) =
        found.into_iter().partition(|f| !f.building_only());
    if good.is_empty() || less_good.is_empty() {
        return good.into_iter().chain(less_good).collect();
    }
    let good_is_far = good.iter().all(|f| f.feature.distance > 100.0);
    let building_is_close = less_good.iter().any(|f| f.feature.distance < 10.0);
    if good_is_far && building_is_close {
        return good.into_iter().chain(less_good).collect();
    }
    good
}

/// For station entities, prefers the single `railway=station` feature over
/// platforms, depots and halts carrying the same name.
#[must_use]
pub fn prefer_railway_station(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 || !entity.criteria.contains("railway=station") {
        return found;
    }
    let stations = found.iter().filter(|f| f.has_tag("railway", "station")).count();
    if stations != 1 {
        return found;
    }
    found
        .into_iter()
        .filter(|f| f.has_tag("railway", "station"))
        .collect()
}

/// Prefers `X Farmhouse` over `X Farm` when both matched a farmhouse.
#[must_use]
pub fn prefer_farmhouse(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 || !entity.is_farmhouse() {
        return found;
    }
    let farmhouses: Vec<usize> = found
        .iter()
        .enumerate()
        .filter_map(|(i, f)| {
            let name = f.feature.name()?;
            let base = FARMHOUSE_RE.captures(name)?.get(1)?.as_str().to_lowercase();
            let farm = format!("{base} farm");
            found
                .iter()
                .any(|other| other.feature.name().is_some_and(|n| n.to_lowercase() == farm))
                .then_some(i)
        })
        .collect();
    if farmhouses.len() != 1 {
        return found;
    }
    found.into_iter().skip(farmhouses[0]).take(1).collect()
}

/// For bridge entities, prefers `man_made=bridge` outlines over the roads
/// and railways tagged `bridge=yes` that cross them.
#[must_use]
pub fn filter_bridge(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 || !entity.criteria.iter().any(|t| t.starts_with("bridge") || t == "man_made=bridge") {
        return found;
    }
    if !found.iter().any(|f| f.has_tag("man_made", "bridge")) {
        return found;
    }
    found
        .into_iter()
        .filter(|f| f.has_tag("man_made", "bridge"))
        .collect()
}

/// Entities in place-like categories map to one point: when exactly one
/// match is a node, keep it.
#[must_use]
pub fn prefer_single_point(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 || !entity.categories.iter().any(|c| PLACE_CATEGORY_RE.is_match(c)) {
        return found;
    }
    let nodes = found
        .iter()
        .filter(|f| f.feature.osm_type == OsmType::Node)
        .count();
    if nodes != 1 {
        return found;
    }
    found
        .into_iter()
        .filter(|f| f.feature.osm_type == OsmType::Node)
        .collect()
}

fn contains_feature(outer: &MapFeature, inner: &MapFeature) -> bool {
    let Some(geometry) = &outer.geometry else {
        return false;
    };
    if inner.kind == GeometryKind::Polygon && inner.area > outer.area {
        return false;
    }
    geometry.contains(&Point::new(inner.coordinate.lon, inner.coordinate.lat))
}

/// When one matched polygon contains every other match, keep only it.
#[must_use]
pub fn prefer_outer_polygon(found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 {
        return found;
    }
    let outer = found.iter().position(|candidate| {
        candidate.feature.kind == GeometryKind::Polygon
            && found
                .iter()
                .filter(|other| other.feature.key() != candidate.feature.key())
                .all(|other| contains_feature(&candidate.feature, &other.feature))
    });
    match outer {
        Some(i) => found.into_iter().skip(i).take(1).collect(),
        None => found,
    }
}

/// Keeps the single feature satisfying `keep` when every other one
/// satisfies `other`.
fn reduce_to_one<K, O>(found: Vec<Found>, keep: K, other: O) -> Vec<Found>
where
    K: Fn(&Found) -> bool,
    O: Fn(&Found) -> bool,
{
    let kept = found.iter().filter(|f| keep(f)).count();
    if kept != 1 || !found.iter().filter(|f| !keep(f)).all(other) {
        return found;
    }
    found.into_iter().filter(|f| keep(f)).collect()
}

fn is_node(f: &Found) -> bool {
    f.feature.osm_type == OsmType::Node
}

/// Entity-kind specific reductions: schools, stations with tram stops,
/// churches, buildings and reservoirs drawn as one way with nodes inside.
#[must_use]
pub fn reduce_candidates(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    if found.len() < 2 {
        return found;
    }

    if entity.is_school() {
        return reduce_to_one(found, |f| f.has_tag("amenity", "school"), |_| true);
    }

    if entity.criteria.contains("railway=station") {
        let tram_stop = |f: &Found| {
            f.has_tag("railway", "tram_stop") || f.has_tag("public_transport", "stop_position")
        };
        let found = reduce_to_one(found, |f| f.has_tag("railway", "station"), tram_stop);
        if found.len() < 2 {
            return found;
        }
        return reduce_to_one(
            found,
            |f| f.has_tag("public_transport", "station"),
            |f| f.has_tag("railway", "tram_stop") || f.has_tag("public_transport", "stop_position"),
        );
    }

    if entity.is_church_building() || entity.criteria.contains("amenity=place_of_worship") {
        return reduce_to_one(
            found,
            |f| f.has_tag("amenity", "place_of_worship") && f.has_tag("religion", "christian"),
            |_| true,
        );
    }

    if entity.is_primarily_building() {
        return reduce_to_one(
            found,
            |f| f.feature.osm_type == OsmType::Way && f.feature.tags.contains_key("building"),
            is_node,
        );
    }

    if entity.is_reservoir() {
        return reduce_to_one(found, |f| f.feature.osm_type == OsmType::Way, is_node);
    }

    found
}

/// Full disambiguation pipeline in order.
#[must_use]
pub fn disambiguate(entity: &Entity, found: Vec<Found>) -> Vec<Found> {
    let found = filter_distant(found);
    let found = prefer_proper_name_match(found);
    let found = prefer_key_over_building(found, "amenity");
    let found = prefer_tag_match_over_building_only(found);
    let found = prefer_railway_station(entity, found);
    let found = prefer_farmhouse(entity, found);
    let found = filter_bridge(entity, found);
    let found = prefer_single_point(entity, found);
    let found = prefer_outer_polygon(found);
    reduce_candidates(entity, found)
}
