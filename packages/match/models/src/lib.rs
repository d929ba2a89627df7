#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared types for matching knowledge-base entities to map features.
//!
//! This crate contains only data types and small predicates. It performs no
//! I/O and holds no matching logic; see `wikimatch_names` and
//! `wikimatch_candidate` for that.

pub mod entity;
pub mod tags;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use entity::{Coordinate, Entity, IdentifierClaim, NameCandidate, NameProvenance};
pub use tags::{Criterion, SKIP_TAGS, TagCriteria, TagMap};

/// Map element type.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OsmType {
    Node,
    Way,
    Relation,
}

/// Shape of a map feature's geometry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

/// A geometry and tag record from the map extract, positioned relative to
/// the entity it is being compared with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapFeature {
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub kind: GeometryKind,
    pub tags: TagMap,
    /// Representative point (node position or geometry centroid).
    pub coordinate: Coordinate,
    /// Metres from the entity's coordinate.
    #[serde(default)]
    pub distance: f64,
    /// Planar area in square metres; zero for points and lines.
    #[serde(default)]
    pub area: f64,
    #[serde(skip)]
    pub geometry: Option<geo::Geometry<f64>>,
}

impl MapFeature {
    /// `node/123` style identifier.
    #[must_use]
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.osm_type, self.osm_id)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get("name")
    }

    #[must_use]
    pub const fn key(&self) -> (OsmType, i64) {
        (self.osm_type, self.osm_id)
    }
}

/// How a map name was judged to correspond to an entity name.
///
/// The variants are mutually exclusive attempts; none ranks above another
/// for acceptance, but callers may treat the trimmed and initials kinds as
/// weaker evidence than exact ones.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchKind {
    /// Byte-identical names.
    Exact,
    /// Identical apart from letter case.
    CaseInsensitive,
    /// Same words in a different order.
    TermSet,
    /// Equal after punctuation, accent, abbreviation or numeral
    /// normalization.
    Normalized,
    /// One name is the initials of the other.
    Initials,
    /// Initials after dropping a droppable ending.
    InitialsTrim,
    /// Equal after trimming a word from the entity name only.
    WikidataTrimmed,
    /// Equal after trimming words from both names.
    BothTrimmed,
    /// Equal after dropping a droppable ending or prefix.
    Trim,
    /// Matched through address fields.
    Address,
    /// The map name is a prefix of the entity name plus a droppable residue.
    Prefix,
    /// Matched through an external identifier rather than a name.
    Identifier,
}

impl MatchKind {
    /// Kinds produced by cutting words off the names.
    #[must_use]
    pub const fn is_trimmed(self) -> bool {
        matches!(self, Self::WikidataTrimmed | Self::BothTrimmed | Self::Trim)
    }
}

/// Outcome of comparing one map name with one entity name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameMatch {
    pub kind: MatchKind,
    /// Short human-readable note on which rule succeeded.
    pub detail: String,
}

impl NameMatch {
    #[must_use]
    pub fn new(kind: MatchKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// One successful name comparison recorded as evidence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameMatchDetail {
    pub kind: MatchKind,
    pub entity_name: String,
    pub sources: Vec<NameCandidate>,
}

/// Everything that tied a map feature to an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchEvidence {
    /// Identifier label to the matching values.
    #[serde(default)]
    pub identifiers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub address: bool,
    /// Map tag key to the entity names it matched.
    #[serde(default)]
    pub names: BTreeMap<String, Vec<NameMatchDetail>>,
    /// Entity tag criteria the feature satisfies.
    #[serde(default)]
    pub matching_tags: BTreeSet<String>,
}

impl MatchEvidence {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() && !self.address && self.names.is_empty()
    }

    /// Every match kind in the name evidence.
    pub fn name_kinds(&self) -> impl Iterator<Item = MatchKind> + '_ {
        self.names.values().flatten().map(|d| d.kind)
    }

    /// The classification reported for the candidate.
    #[must_use]
    pub fn best_kind(&self) -> Option<MatchKind> {
        if !self.identifiers.is_empty() {
            return Some(MatchKind::Identifier);
        }
        self.name_kinds()
            .min()
            .or_else(|| self.address.then_some(MatchKind::Address))
    }
}

/// An accepted pairing of one entity with one map feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub qid: String,
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub name: Option<String>,
    pub kind: MatchKind,
    pub distance: f64,
    pub tags: TagMap,
    pub evidence: MatchEvidence,
}

impl Candidate {
    #[must_use]
    pub const fn key(&self) -> (OsmType, i64) {
        (self.osm_type, self.osm_id)
    }

    #[must_use]
    pub fn identifier(&self) -> String {
        format!("{}/{}", self.osm_type, self.osm_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn osm_type_round_trips_through_strum() {
        assert_eq!(OsmType::Relation.to_string(), "relation");
        assert_eq!("way".parse::<OsmType>().unwrap(), OsmType::Way);
    }

    #[test]
    fn evidence_best_kind_prefers_identifier() {
        let mut evidence = MatchEvidence::default();
        assert!(evidence.best_kind().is_none());

        evidence.address = true;
        assert_eq!(evidence.best_kind(), Some(MatchKind::Address));

        evidence.names.insert(
            "name".to_string(),
            vec![NameMatchDetail {
                kind: MatchKind::Trim,
                entity_name: "X House".to_string(),
                sources: vec![],
            }],
        );
        assert_eq!(evidence.best_kind(), Some(MatchKind::Trim));

        evidence
            .identifiers
            .insert("NRHP reference number".to_string(), vec!["1234".to_string()]);
        assert_eq!(evidence.best_kind(), Some(MatchKind::Identifier));
    }

    #[test]
    fn trimmed_kinds() {
        assert!(MatchKind::BothTrimmed.is_trimmed());
        assert!(!MatchKind::Initials.is_trimmed());
    }
}
