//! Expected map tags for an entity and how a feature's tags satisfy them.

use std::collections::BTreeSet;

use wikimatch_match_models::{Criterion, Entity, TagMap};

use crate::catalog::{could_be_building, extra_tags};

/// Generic criteria dropped from every entity (facility, geographic
/// location and artificial entity classes map to these).
const GENERIC_CRITERIA: [&str; 3] = ["amenity", "location", "man_made"];

/// Keys whose criteria are also looked for under lifecycle prefixes.
const LIFECYCLE_KEYS: [&str; 7] = [
    "amenity", "railway", "leisure", "tourism", "man_made", "shop", "building",
];

const LIFECYCLE_PREFIXES: [&str; 7] = [
    "disused",
    "was",
    "abandoned",
    "demolished",
    "destroyed",
    "ruins",
    "historic",
];

fn is_shopping_street(entity: &Entity) -> bool {
    entity
        .categories
        .iter()
        .any(|c| c.starts_with("Shopping street "))
}

/// `disused:amenity=pub` style variants of the entity's criteria.
#[must_use]
pub fn lifecycle_tags(entity: &Entity) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for criterion in entity.criteria.iter() {
        if criterion == "amenity" || (criterion == "shop" && is_shopping_street(entity)) {
            continue;
        }
        let key = Criterion::parse(criterion).key();
        if !LIFECYCLE_KEYS.contains(&key) {
            continue;
        }
        for prefix in LIFECYCLE_PREFIXES {
            tags.insert(format!("{prefix}:{criterion}"));
        }
    }
    tags
}

/// Map tags a feature for this entity is expected to carry.
///
/// Combines the entity's own criteria with class-implied tags, adds
/// `building` (and church tags for names ending in ` church`) when the
/// entity could be a building, adds `ref:nrhp` values and lifecycle
/// variants, and removes `ignore` plus generic criteria.
#[must_use]
pub fn expected_tags(entity: &Entity, ignore: &[&str]) -> BTreeSet<String> {
    let ignored = |t: &str| ignore.contains(&t) || GENERIC_CRITERIA.contains(&t);

    let mut tags: BTreeSet<String> = extra_tags(&entity.instance_of)
        .into_iter()
        .chain(entity.criteria.iter().map(ToString::to_string))
        .filter(|t| !ignored(t))
        .collect();

    if could_be_building(&tags, &entity.instance_of) {
        tags.insert("building".to_string());
        if entity
            .names
            .iter()
            .any(|n| n.text.to_lowercase().ends_with(" church"))
        {
            tags.insert("amenity=place_of_worship".to_string());
            tags.insert("building=church".to_string());
        }
    }

    if tags.contains("shop") && is_shopping_street(entity) {
        tags.remove("shop");
    }

    tags.extend(entity.ref_nrhp().into_iter().map(|v| format!("ref:nrhp={v}")));
    tags.extend(lifecycle_tags(entity));
    tags.retain(|t| !ignored(t));
    tags
}

/// Whether a feature satisfies any of the criteria. `key=value` criteria
/// match one of the `;`-separated values, also with `_` read as a space.
#[must_use]
pub fn matches_any<'a, I: IntoIterator<Item = &'a str>>(tags: &TagMap, criteria: I) -> bool {
    criteria.into_iter().any(|c| match Criterion::parse(c) {
        Criterion::Key(k) => tags.contains_key(k),
        Criterion::KeyValue(k, v) => {
            tags.has(k, v) || (v.contains('_') && tags.has(k, &v.replace('_', " ")))
        }
    })
}

/// Drops a bare key when a `key=value` for the same key is present.
fn tag_and_key_if_possible(mut tags: BTreeSet<String>) -> BTreeSet<String> {
    let keys: Vec<String> = tags.iter().filter(|t| !t.contains('=')).cloned().collect();
    for key in keys {
        let prefix = format!("{key}=");
        if tags.iter().any(|t| t.starts_with(&prefix)) {
            tags.remove(&key);
        }
    }
    tags
}

/// Expected tags the feature actually carries.
#[must_use]
pub fn find_matching_tags(tags: &TagMap, expected: &BTreeSet<String>) -> BTreeSet<String> {
    let matching = expected
        .iter()
        .filter(|t| match Criterion::parse(t) {
            Criterion::Key(k) => tags.contains_key(k),
            Criterion::KeyValue(k, v) => tags.has(k, v),
        })
        .cloned()
        .collect();
    tag_and_key_if_possible(matching)
}

/// The only matching tags say "it is a building".
#[must_use]
pub fn is_building_only_match(matching: &BTreeSet<String>) -> bool {
    matching
        .iter()
        .all(|t| matches!(t.as_str(), "building" | "building=yes" | "historic:building"))
}

#[cfg(test)]
mod tests {
    use wikimatch_match_models::{IdentifierClaim, NameCandidate, NameProvenance};

    use super::*;

    fn entity(criteria: &[&str]) -> Entity {
        Entity {
            criteria: criteria.iter().copied().collect(),
            ..Entity::new("Q1")
        }
    }

    #[test]
    fn generic_criteria_dropped() {
        let tags = expected_tags(&entity(&["amenity", "man_made", "railway=station"]), &[]);
        assert!(!tags.contains("amenity"));
        assert!(!tags.contains("man_made"));
        assert!(tags.contains("railway=station"));
        assert!(tags.contains("disused:railway=station"));
        assert!(!tags.contains("building"));
    }

    #[test]
    fn church_name_adds_worship_tags() {
        let mut e = entity(&["building"]);
        e.names.push(NameCandidate::new("St Mary's Church", NameProvenance::Label, "en"));
        let tags = expected_tags(&e, &[]);
        assert!(tags.contains("amenity=place_of_worship"));
        assert!(tags.contains("building=church"));
    }

    #[test]
    fn ignore_removes_building() {
        let tags = expected_tags(&entity(&["building=house"]), &["building"]);
        assert!(!tags.contains("building"));
        assert!(tags.contains("building=house"));
    }

    #[test]
    fn nrhp_reference_is_expected() {
        let mut e = entity(&["building"]);
        e.identifiers.push(IdentifierClaim {
            property: "P649".to_string(),
            label: "NRHP reference number".to_string(),
            osm_keys: vec!["ref:nrhp".to_string()],
            values: vec!["0071234".to_string()],
        });
        assert!(expected_tags(&e, &[]).contains("ref:nrhp=0071234"));
    }

    #[test]
    fn matching_prefers_key_value() {
        let tags: TagMap = [("building", "church"), ("amenity", "place_of_worship")]
            .into_iter()
            .collect();
        let expected: BTreeSet<String> = ["building", "building=church", "shop"]
            .into_iter()
            .map(String::from)
            .collect();
        let matching = find_matching_tags(&tags, &expected);
        assert_eq!(matching.into_iter().collect::<Vec<_>>(), vec!["building=church"]);
    }

    #[test]
    fn building_only() {
        let only: BTreeSet<String> = ["building=yes"].into_iter().map(String::from).collect();
        assert!(is_building_only_match(&only));
        let more: BTreeSet<String> = ["building", "amenity=pub"].into_iter().map(String::from).collect();
        assert!(!is_building_only_match(&more));
    }

    #[test]
    fn matches_underscore_as_space() {
        let tags: TagMap = [("amenity", "place of worship")].into_iter().collect();
        assert!(matches_any(&tags, ["amenity=place_of_worship"]));
        assert!(!matches_any(&tags, ["shop"]));
    }
}
