//! Knowledge-base entity records.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use crate::tags::TagCriteria;

/// Where a candidate name of an entity came from.
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
pub enum NameProvenance {
    /// Primary label in some language.
    Label,
    /// Alternate name in some language.
    Alias,
    /// Title of a linked encyclopedia article.
    Sitelink,
    /// Media repository category name.
    CommonsCategory,
    OfficialName,
    NativeLabel,
    /// Image file name with the extension removed.
    Image,
    /// Bold name found in an article extract.
    Extract,
    StreetAddress,
    /// Value of an external identifier.
    Identifier,
}

/// One name an entity is known by, with its provenance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameCandidate {
    pub text: String,
    pub provenance: NameProvenance,
    /// Language code, site id or property id the name was read from.
    pub provenance_tag: String,
}

impl NameCandidate {
    #[must_use]
    pub fn new(
        text: impl Into<String>,
        provenance: NameProvenance,
        provenance_tag: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            provenance,
            provenance_tag: provenance_tag.into(),
        }
    }
}

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// An external identifier claim and the map keys it corresponds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierClaim {
    /// Property id, e.g. `P649`.
    pub property: String,
    /// Human-readable label, e.g. `NRHP reference number`.
    pub label: String,
    /// Map tag keys that may hold the same identifier.
    pub osm_keys: Vec<String>,
    pub values: Vec<String>,
}

/// A knowledge-base record describing a real-world feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Item identifier, e.g. `Q42`.
    pub qid: String,
    pub label: Option<String>,
    #[serde(default)]
    pub names: Vec<NameCandidate>,
    pub coordinate: Option<Coordinate>,
    #[serde(default)]
    pub criteria: TagCriteria,
    /// Classification item ids this entity is an instance of.
    #[serde(default)]
    pub instance_of: BTreeSet<String>,
    #[serde(default)]
    pub identifiers: Vec<IdentifierClaim>,
    /// Encyclopedia categories, populated by the enrichment stage.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Intro extract of the linked article, if any.
    pub extract: Option<String>,
    /// Raw entity document, fetched lazily.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

const STATION_ISA: [&str; 3] = ["Q55488", "Q928830", "Q4663385"];
const STATION_CATEGORIES: [&str; 5] = [
    "railway stations",
    "railroad stations",
    "train stations",
    "metro stations",
    "subway stations",
];

const STADIUM_ISA: [&str; 3] = ["Q483110", "Q641226", "Q1076486"];
const STADIUM_CATEGORIES: [&str; 6] = [
    "football venues",
    "ice rinks",
    "stadiums",
    "velodromes",
    "cycling venues",
    "grounds",
];

const BUILDING_ISA: [&str; 3] = ["Q41176", "Q811979", "Q47012103"];

const NOT_A_DISTRICT_PREFIXES: [&str; 9] = [
    "Historic district contributing properties",
    "Churches ",
    "Towers ",
    "Educational institutions ",
    "Schools ",
    "Houses ",
    "Historic house ",
    "Museums ",
    "Buildings and structures ",
];

impl Entity {
    #[must_use]
    pub fn new(qid: impl Into<String>) -> Self {
        Self {
            qid: qid.into(),
            ..Self::default()
        }
    }

    /// Groups the candidate names by text, keeping every provenance.
    #[must_use]
    pub fn names_by_text(&self) -> BTreeMap<&str, Vec<&NameCandidate>> {
        let mut out: BTreeMap<&str, Vec<&NameCandidate>> = BTreeMap::new();
        for name in &self.names {
            if name.text.trim().is_empty() {
                continue;
            }
            out.entry(name.text.as_str()).or_default().push(name);
        }
        out
    }

    #[must_use]
    pub fn is_instance_of(&self, qid: &str) -> bool {
        self.instance_of.contains(qid)
    }

    fn is_instance_of_any(&self, qids: &[&str]) -> bool {
        qids.iter().any(|q| self.is_instance_of(q))
    }

    fn has_category_prefix(&self, prefix: &str) -> bool {
        self.categories.iter().any(|c| c.starts_with(prefix))
    }

    fn has_category_containing(&self, fragments: &[&str]) -> bool {
        self.categories.iter().any(|c| {
            let lc = c.to_lowercase();
            fragments.iter().any(|f| lc.contains(f))
        })
    }

    /// Values of the identifier claim for `property`.
    #[must_use]
    pub fn identifier_values(&self, property: &str) -> Vec<&str> {
        self.identifiers
            .iter()
            .filter(|c| c.property == property)
            .flat_map(|c| c.values.iter().map(String::as_str))
            .collect()
    }

    /// Names read from the street-address property.
    pub fn street_addresses(&self) -> impl Iterator<Item = &str> {
        self.names
            .iter()
            .filter(|n| n.provenance == NameProvenance::StreetAddress)
            .map(|n| n.text.as_str())
    }

    #[must_use]
    pub fn is_hamlet(&self) -> bool {
        self.is_instance_of("Q5084") || self.has_category_prefix("Hamlets ")
    }

    #[must_use]
    pub fn is_farmhouse(&self) -> bool {
        self.is_instance_of("Q489357")
    }

    #[must_use]
    pub fn is_mountain_range(&self) -> bool {
        self.is_instance_of("Q46831")
    }

    #[must_use]
    pub fn is_church_building(&self) -> bool {
        self.is_instance_of("Q16970")
    }

    #[must_use]
    pub fn is_reservoir(&self) -> bool {
        self.is_instance_of("Q131681")
    }

    /// The entity is the building itself rather than its current use.
    #[must_use]
    pub fn is_primarily_building(&self) -> bool {
        self.is_instance_of_any(&BUILDING_ISA)
    }

    #[must_use]
    pub fn is_proposed(&self) -> bool {
        if self.has_category_prefix("Disused ") {
            return false;
        }
        self.has_category_prefix("Proposed ") || self.is_instance_of("Q811683")
    }

    #[must_use]
    pub fn is_historic_district(&self) -> bool {
        let district =
            self.is_instance_of("Q15243209") || self.has_category_prefix("Historic district");
        district
            && !self.categories.iter().any(|cat| {
                NOT_A_DISTRICT_PREFIXES.iter().any(|p| cat.starts_with(p))
                    || cat.contains(" buildings ")
            })
    }

    #[must_use]
    pub fn is_station(&self) -> bool {
        self.is_instance_of_any(&STATION_ISA) || self.has_category_containing(&STATION_CATEGORIES)
    }

    #[must_use]
    pub fn is_stadium(&self) -> bool {
        self.is_instance_of_any(&STADIUM_ISA) || self.has_category_containing(&STADIUM_CATEGORIES)
    }

    #[must_use]
    pub fn is_school(&self) -> bool {
        self.criteria.contains("amenity=school")
    }

    #[must_use]
    pub fn is_cricket_ground(&self) -> bool {
        self.names
            .iter()
            .any(|n| n.text.to_lowercase().contains("cricket"))
    }

    /// Listed on the National Heritage List for England.
    #[must_use]
    pub fn is_nhle(&self) -> bool {
        self.identifiers.iter().any(|c| c.property == "P1216")
    }

    /// National Register of Historic Places reference numbers.
    #[must_use]
    pub fn ref_nrhp(&self) -> Vec<&str> {
        self.identifier_values("P649")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity_with_categories(cats: &[&str]) -> Entity {
        Entity {
            categories: cats.iter().map(ToString::to_string).collect(),
            ..Entity::new("Q1")
        }
    }

    #[test]
    fn station_from_category() {
        let e = entity_with_categories(&["Railway stations in Kent"]);
        assert!(e.is_station());
        assert!(!e.is_stadium());
    }

    #[test]
    fn historic_district_excluded_by_building_category() {
        let mut e = entity_with_categories(&["Historic districts in Ohio"]);
        assert!(e.is_historic_district());
        e.categories.push("Houses on the National Register".to_string());
        assert!(!e.is_historic_district());
    }

    #[test]
    fn disused_category_is_not_proposed() {
        let e = entity_with_categories(&["Proposed railway stations", "Disused stations"]);
        assert!(!e.is_proposed());
    }

    #[test]
    fn names_grouped_by_text() {
        let e = Entity {
            names: vec![
                NameCandidate::new("Big Ben", NameProvenance::Label, "en"),
                NameCandidate::new("Big Ben", NameProvenance::Label, "fr"),
                NameCandidate::new("Elizabeth Tower", NameProvenance::Alias, "en"),
                NameCandidate::new(" ", NameProvenance::Alias, "en"),
            ],
            ..Entity::new("Q41225")
        };
        let grouped = e.names_by_text();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["Big Ben"].len(), 2);
    }
}
