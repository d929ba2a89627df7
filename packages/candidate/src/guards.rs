//! Rejection guards.
//!
//! Each guard is a named predicate that vetoes one feature for one entity.
//! Feature guards run before any name matching; evidence guards run once a
//! feature has matched by name, identifier or address. Both lists are
//! evaluated in order and the first guard that fires names the rejection.
//!
//! Many of these encode specific real-world confusions (a station matching
//! the café inside it, a tower matching a pub called "The Tower") rather
//! than general principles.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use wikimatch_match_models::{Entity, MapFeature, MatchEvidence, MatchKind, OsmType, TagMap};
use wikimatch_names::AddressMatch;

/// Inputs available before name matching.
pub struct FeatureCheck<'a> {
    pub entity: &'a Entity,
    pub feature: &'a MapFeature,
    pub identifier_match: bool,
    pub address: AddressMatch,
    pub match_address_nodes: bool,
}

/// Inputs available once a feature has matched.
pub struct EvidenceCheck<'a> {
    pub entity: &'a Entity,
    pub feature: &'a MapFeature,
    pub evidence: &'a MatchEvidence,
    /// The only matching tags are building tags.
    pub building_only: bool,
}

impl EvidenceCheck<'_> {
    fn tags(&self) -> &TagMap {
        &self.feature.tags
    }

    fn amenity(&self) -> Vec<&str> {
        self.tags().values("amenity")
    }

    fn has_amenity(&self, value: &str) -> bool {
        self.amenity().contains(&value)
    }

    fn wants(&self, criterion: &str) -> bool {
        self.entity.criteria.contains(criterion)
    }

    fn names(&self) -> bool {
        !self.evidence.names.is_empty()
    }

    fn identifier(&self) -> bool {
        !self.evidence.identifiers.is_empty()
    }

    fn address(&self) -> bool {
        self.evidence.address
    }

    /// Matched by name alone, and only building tags agree.
    fn name_only_building(&self) -> bool {
        self.names() && !self.identifier() && !self.address() && self.building_only
    }

    fn is_station_feature(&self) -> bool {
        self.tags().get("railway") == Some("station")
            || self.tags().get("building") == Some("train_station")
    }

    fn entity_wants_shop(&self) -> bool {
        self.entity.criteria.iter().any(|t| t.starts_with("shop"))
    }
}

pub struct FeatureGuard {
    pub name: &'static str,
    pub rejects: fn(&FeatureCheck<'_>) -> bool,
}

pub struct EvidenceGuard {
    pub name: &'static str,
    pub rejects: fn(&EvidenceCheck<'_>) -> bool,
}

/// A map node carrying nothing but an address.
#[must_use]
pub fn is_address_node(feature: &MapFeature) -> bool {
    if feature.osm_type != OsmType::Node || feature.tags.contains_key("addr:housename") {
        return false;
    }
    feature.tags.keys().all(|k| {
        k.starts_with("addr:") || k.starts_with("source:") || k == "entrance" || k == "source"
    })
}

#[must_use]
pub fn is_bus_stop(tags: &TagMap) -> bool {
    tags.get("highway") == Some("bus_stop")
        || (tags.get("bus") == Some("yes") && tags.get("public_transport") == Some("stop_position"))
}

pub static FEATURE_GUARDS: &[FeatureGuard] = &[
    FeatureGuard {
        name: "townland",
        rejects: |c| {
            c.feature.tags.get("locality") == Some("townland")
                && !c.entity.criteria.contains("locality=townland")
        },
    },
    FeatureGuard {
        name: "historic district shouldn't match building",
        rejects: |c| c.entity.is_historic_district() && c.feature.tags.contains_key("building"),
    },
    FeatureGuard {
        name: "address node",
        rejects: |c| !c.match_address_nodes && is_address_node(c.feature),
    },
    FeatureGuard {
        name: "bad city match",
        rejects: |c| {
            !c.identifier_match
                && c.entity.categories.iter().any(|cat| cat.starts_with("Cities "))
                && c.feature
                    .tags
                    .get("admin_level")
                    .and_then(|l| l.trim().parse::<i32>().ok())
                    == Some(10)
        },
    },
    FeatureGuard {
        name: "OSM and Wikidata addresses differ",
        rejects: |c| c.address == AddressMatch::Mismatch,
    },
];

/// First feature guard that rejects, if any.
#[must_use]
pub fn feature_rejection(check: &FeatureCheck<'_>) -> Option<&'static str> {
    FEATURE_GUARDS
        .iter()
        .find(|g| (g.rejects)(check))
        .map(|g| g.name)
}

const DIPLOMATIC_TERMS: [&str; 4] = ["embassy", "diplomatic", "consulate", "ambassador"];

static MISSION_OF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:embassy|consulate(?: general)?|high commission) of (?:the )?(.+?)(?:,| in | to |$)")
        .expect("valid regex")
});

static MISSION_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:the )?(.+?) (?:embassy|consulate(?: general)?|high commission)\b")
        .expect("valid regex")
});

fn is_diplomatic_mission(c: &EvidenceCheck<'_>) -> bool {
    if c.evidence.matching_tags.contains("amenity=embassy")
        || c.tags().get("office") == Some("diplomatic")
    {
        return true;
    }
    c.tags().iter().any(|(k, v)| {
        k.contains("name") && !k.contains("old") && {
            let lc = v.to_lowercase();
            DIPLOMATIC_TERMS.iter().any(|t| lc.contains(t))
        }
    })
}

/// Country named by a mission name: `Embassy of France` or
/// `French Embassy`.
#[must_use]
pub fn mission_country(name: &str) -> Option<String> {
    MISSION_OF_RE
        .captures(name)
        .or_else(|| MISSION_SUFFIX_RE.captures(name))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

/// The feature's name names a sending country that none of the entity's
/// names mention.
fn mission_for_other_country(c: &EvidenceCheck<'_>) -> bool {
    let Some(name) = c.tags().get("name:en").or_else(|| c.tags().get("name")) else {
        return false;
    };
    let Some(country) = mission_country(name) else {
        return false;
    };
    !c.entity
        .names
        .iter()
        .any(|n| n.text.to_lowercase().contains(&country))
}

/// A building-only name match that leans on weak name evidence.
///
/// Parking is never good enough. Otherwise the match is bad unless some
/// name comparison is stronger than trimming both names, `operator`
/// matching a trimmed entity name, or a trimmed entity name when either
/// side is a station.
#[must_use]
pub fn bad_building_match(tags: &TagMap, evidence: &MatchEvidence, entity: &Entity) -> bool {
    if tags.has("amenity", "parking") {
        return true;
    }
    if evidence.names.is_empty() {
        return false;
    }

    let is_station = entity.is_station()
        || tags
            .iter()
            .any(|(k, v)| k.ends_with("railway") && matches!(v, "station" | "halt"));

    let strong = evidence.names.iter().any(|(osm_key, details)| {
        details.iter().any(|d| match d.kind {
            MatchKind::BothTrimmed => false,
            MatchKind::WikidataTrimmed => !(osm_key == "operator" || is_station),
            _ => true,
        })
    });
    !strong
}

/// A named one-off correction used by [`is_bad_match`].
pub struct BadMatchRule {
    pub name: &'static str,
    pub rejects: fn(&Entity, &TagMap) -> bool,
}

fn wants(entity: &Entity, criterion: &str) -> bool {
    entity.criteria.contains(criterion)
}

pub static BAD_MATCH_RULES: &[BadMatchRule] = &[
    BadMatchRule {
        name: "car rental or sharing",
        rejects: |_, tags| tags.has("amenity", "car_rental") || tags.has("amenity", "car_sharing"),
    },
    BadMatchRule {
        name: "farm building shouldn't match house",
        rejects: |e, tags| {
            ["stable", "barn", "farm_auxiliary"].iter().any(|t| {
                wants(e, &format!("building={t}"))
                    && !wants(e, "building=house")
                    && tags.has("building", "house")
                    && !tags.has("building", t)
            })
        },
    },
    BadMatchRule {
        name: "tower shouldn't match pub",
        rejects: |e, tags| {
            wants(e, "building=tower")
                && !wants(e, "amenity=pub")
                && tags.has("amenity", "pub")
                && !tags.contains_key("man_made")
        },
    },
    BadMatchRule {
        name: "castle shouldn't match station",
        rejects: |e, tags| {
            wants(e, "historic=castle")
                && !wants(e, "railway=station")
                && (tags.get("railway") == Some("station")
                    || tags.get("building") == Some("train_station"))
                && tags.get("historic") != Some("castle")
        },
    },
    BadMatchRule {
        name: "station shouldn't match cafe",
        rejects: |e, tags| {
            wants(e, "railway=station")
                && !wants(e, "amenity=cafe")
                && tags.has("amenity", "cafe")
                && tags.get("railway") != Some("station")
                && tags.get("building") != Some("train_station")
        },
    },
    BadMatchRule {
        name: "station shouldn't match supermarket",
        rejects: |e, tags| {
            wants(e, "railway=station")
                && !wants(e, "shop=supermarket")
                && tags.get("shop") == Some("supermarket")
                && tags.get("railway") != Some("station")
                && tags.get("building") != Some("train_station")
        },
    },
    BadMatchRule {
        name: "non-station shouldn't match station building",
        rejects: |e, tags| {
            !wants(e, "building=train_station") && tags.get("building") == Some("train_station")
        },
    },
    BadMatchRule {
        name: "fuel",
        rejects: |e, tags| !wants(e, "amenity=fuel") && tags.has("amenity", "fuel"),
    },
    BadMatchRule {
        name: "place shouldn't match railway",
        rejects: |e, tags| {
            wants(e, "place")
                && !e.criteria.iter().any(|t| t.starts_with("railway"))
                && !tags.contains_key("place")
                && tags.contains_key("railway")
        },
    },
];

/// First one-off correction that vetoes a building-only name match.
#[must_use]
pub fn is_bad_match(entity: &Entity, tags: &TagMap) -> Option<&'static str> {
    BAD_MATCH_RULES
        .iter()
        .find(|r| (r.rejects)(entity, tags))
        .map(|r| r.name)
}

pub static EVIDENCE_GUARDS: &[EvidenceGuard] = &[
    EvidenceGuard {
        name: "diplomatic mission of a different country",
        rejects: |c| is_diplomatic_mission(c) && mission_for_other_country(c),
    },
    EvidenceGuard {
        name: "Wikidata building shouldn't match car sharing",
        rejects: |c| {
            c.wants("building")
                && !c.wants("amenity=car_sharing")
                && !c.tags().contains_key("building")
                && c.has_amenity("car_sharing")
        },
    },
    EvidenceGuard {
        name: "Wikidata school shouldn't match OSM restaurant",
        rejects: |c| {
            c.building_only
                && c.address()
                && !c.names()
                && !c.identifier()
                && c.wants("amenity=school")
                && !c.wants("amenity=restaurant")
                && c.has_amenity("restaurant")
                && !c.has_amenity("school")
        },
    },
    EvidenceGuard {
        name: "bad match",
        rejects: |c| {
            c.building_only
                && !c.address()
                && c.names()
                && !c.identifier()
                && is_bad_match(c.entity, c.tags()).is_some()
        },
    },
    EvidenceGuard {
        name: "nearby road match",
        rejects: |c| {
            (c.evidence.matching_tags.is_empty() || c.building_only)
                && c.entity.instance_of.len() == 1
                && c.entity.is_instance_of("Q34442")
        },
    },
    EvidenceGuard {
        name: "parking should only match parking",
        rejects: |c| c.tags().get("amenity") == Some("parking") && !c.wants("amenity=parking"),
    },
    EvidenceGuard {
        name: "nearby match OSM bus stop matching non-bus stop",
        rejects: |c| {
            c.evidence.matching_tags.is_empty()
                && is_bus_stop(c.tags())
                && !c.entity.is_instance_of("Q953806")
        },
    },
    EvidenceGuard {
        name: "cricket ground shouldn't match common",
        rejects: |c| {
            c.evidence.matching_tags.contains("leisure=park")
                && c.entity.is_cricket_ground()
                && (c.tags().get("designation") == Some("common")
                    || c.feature.name().is_some_and(|n| n.to_lowercase().contains("common")))
        },
    },
    EvidenceGuard {
        name: "bad building match",
        rejects: |c| c.name_only_building() && bad_building_match(c.tags(), c.evidence, c.entity),
    },
    EvidenceGuard {
        name: "stadium shouldn't match restaurant",
        rejects: |c| {
            c.name_only_building()
                && c.entity.is_stadium()
                && !c.wants("amenity=restaurant")
                && c.has_amenity("restaurant")
        },
    },
    EvidenceGuard {
        name: "stadium shouldn't match supermarket",
        rejects: |c| {
            c.name_only_building()
                && c.entity.is_stadium()
                && c.tags().get("shop") == Some("supermarket")
        },
    },
    EvidenceGuard {
        name: "mountain range shouldn't match peak",
        rejects: |c| {
            c.evidence.matching_tags.len() == 1
                && c.evidence.matching_tags.contains("natural=peak")
                && c.entity.is_mountain_range()
                && c.feature.distance > 100.0
        },
    },
    EvidenceGuard {
        name: "heritage listing too far away",
        rejects: |c| c.entity.is_nhle() && c.feature.distance > 500.0,
    },
    EvidenceGuard {
        name: "station shouldn't match ferry terminal",
        rejects: |c| {
            !c.identifier()
                && c.wants("railway=station")
                && !c.wants("amenity=ferry_terminal")
                && c.has_amenity("ferry_terminal")
                && !c.is_station_feature()
        },
    },
    EvidenceGuard {
        name: "place of worship shouldn't match bridge",
        rejects: |c| {
            c.wants("amenity=place_of_worship")
                && !c.wants("man_made=bridge")
                && c.tags().get("man_made") == Some("bridge")
                && !c.has_amenity("place_of_worship")
        },
    },
    EvidenceGuard {
        name: "apartment building shouldn't match shop",
        rejects: |c| {
            !c.names()
                && c.address()
                && (c.wants("building=apartments") || c.wants("building=residential"))
                && !c.entity_wants_shop()
                && c.tags().contains_key("shop")
                && !matches!(c.tags().get("building"), Some("apartments" | "residential"))
        },
    },
    EvidenceGuard {
        name: "recording studio shouldn't match shop",
        rejects: |c| {
            !c.names()
                && c.address()
                && c.wants("studio=audio")
                && !c.entity_wants_shop()
                && c.tags().contains_key("shop")
                && c.tags().get("studio") != Some("audio")
        },
    },
    EvidenceGuard {
        name: "statue shouldn't match museum",
        rejects: |c| {
            c.wants("artwork_type=statue")
                && !c.wants("tourism=museum")
                && c.tags().get("tourism") == Some("museum")
                && c.tags().get("artwork_type") != Some("statue")
        },
    },
    EvidenceGuard {
        name: "only memorial should match memorial",
        rejects: |c| !c.wants("historic=memorial") && c.tags().get("historic") == Some("memorial"),
    },
];

/// First evidence guard that rejects, if any.
#[must_use]
pub fn evidence_rejection(check: &EvidenceCheck<'_>) -> Option<&'static str> {
    EVIDENCE_GUARDS
        .iter()
        .find(|g| (g.rejects)(check))
        .map(|g| g.name)
}

/// Guard names in evaluation order.
#[must_use]
pub fn guard_names() -> BTreeSet<&'static str> {
    FEATURE_GUARDS
        .iter()
        .map(|g| g.name)
        .chain(EVIDENCE_GUARDS.iter().map(|g| g.name))
        .collect()
}
