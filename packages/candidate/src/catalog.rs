//! Entity-type catalog.
//!
//! The catalog is baked into the binary from `entity_types.toml` via
//! [`include_str!`] and parsed on first use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Deserialize;

/// One kind of real-world feature and how it is mapped.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityType {
    /// Category fragments implying this type.
    pub cats: Vec<String>,
    /// Category words that cancel a hit on `cats`.
    #[serde(default)]
    pub exclude_cats: Vec<String>,
    /// Tag criteria for the type.
    pub tags: Vec<String>,
    /// Droppable name endings.
    #[serde(default)]
    pub trim: Vec<String>,
    /// Maximum search distance in km.
    pub dist: Option<f64>,
    /// Knowledge-base class of the type.
    pub wikidata: Option<String>,
    #[serde(default)]
    pub check_housename: bool,
}

/// The parsed catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    pub default_max_distance_km: f64,
    #[serde(rename = "entity_type")]
    pub entity_types: Vec<EntityType>,
    /// Class id to additional tag criteria.
    #[serde(default)]
    pub extra_tags: BTreeMap<String, Vec<String>>,
}

const ENTITY_TYPES_TOML: &str = include_str!("../entity_types.toml");

/// Parses a catalog from TOML text.
///
/// # Errors
///
/// Returns an error if the text is not a valid catalog.
pub fn parse_catalog(text: &str) -> Result<Catalog, toml::de::Error> {
    toml::de::from_str(text)
}

static CATALOG: LazyLock<Catalog> = LazyLock::new(|| {
    parse_catalog(ENTITY_TYPES_TOML)
        .unwrap_or_else(|e| panic!("Failed to parse entity_types.toml: {e}"))
});

/// The embedded catalog.
///
/// # Panics
///
/// Panics on first use if the embedded `entity_types.toml` is invalid.
#[must_use]
pub fn catalog() -> &'static Catalog {
    &CATALOG
}

fn word_pattern(words: &[&str]) -> Option<Regex> {
    if words.is_empty() {
        return None;
    }
    let alternation = words.iter().map(|w| regex::escape(w)).collect::<Vec<_>>().join("|");
    RegexBuilder::new(&format!(r"\b(?:{alternation})\b"))
        .case_insensitive(true)
        .build()
        .ok()
}

/// A category key with its compiled include and exclude patterns.
struct CategoryRule {
    include: Regex,
    exclude: Option<Regex>,
    tags: &'static [String],
}

/// Category fragment rules. `Churches by country` style keys are cut at
/// ` by `.
static CATEGORY_RULES: LazyLock<Vec<CategoryRule>> = LazyLock::new(|| {
    let mut by_key: BTreeMap<String, &'static EntityType> = BTreeMap::new();
    for t in &catalog().entity_types {
        for c in &t.cats {
            let lc = c.to_lowercase();
            let key = lc.find(" by ").map_or(lc.as_str(), |pos| &lc[..pos]).to_string();
            by_key.insert(key, t);
        }
    }
    by_key
        .into_iter()
        .filter_map(|(key, t)| {
            let include = word_pattern(&[key.as_str()])?;
            let excludes: Vec<&str> = t.exclude_cats.iter().map(String::as_str).collect();
            Some(CategoryRule {
                include,
                exclude: word_pattern(&excludes),
                tags: &t.tags,
            })
        })
        .collect()
});

/// Tag criteria implied by encyclopedia categories.
#[must_use]
pub fn categories_to_tags<S: AsRef<str>>(categories: &[S]) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    for cat in categories {
        let cat = cat.as_ref();
        for rule in CATEGORY_RULES.iter() {
            if !rule.include.is_match(cat) {
                continue;
            }
            if rule.exclude.as_ref().is_some_and(|re| re.is_match(cat)) {
                continue;
            }
            tags.extend(rule.tags.iter().cloned());
        }
    }
    tags
}

fn types_for_criteria<'a>(criteria: &'a BTreeSet<String>) -> impl Iterator<Item = &'static EntityType> + 'a {
    catalog()
        .entity_types
        .iter()
        .filter(move |t| t.tags.iter().any(|tag| criteria.contains(tag)))
}

/// Name endings that may be dropped for entities with these criteria.
/// `type=site` is ignored as too generic.
#[must_use]
pub fn endings_for(criteria: &BTreeSet<String>) -> BTreeSet<String> {
    let mut criteria = criteria.clone();
    criteria.remove("type=site");
    types_for_criteria(&criteria)
        .flat_map(|t| t.trim.iter().cloned())
        .collect()
}

/// Name endings contributed by the entity's classes.
#[must_use]
pub fn endings_for_classes(instance_of: &BTreeSet<String>) -> BTreeSet<String> {
    catalog()
        .entity_types
        .iter()
        .filter(|t| t.wikidata.as_ref().is_some_and(|q| instance_of.contains(q)))
        .flat_map(|t| t.trim.iter().cloned())
        .collect()
}

/// Largest search distance in km of any type sharing a criterion, falling
/// back to the catalog default.
#[must_use]
pub fn max_distance_km(criteria: &BTreeSet<String>) -> f64 {
    types_for_criteria(criteria)
        .filter_map(|t| t.dist)
        .reduce(f64::max)
        .unwrap_or(catalog().default_max_distance_km)
}

/// Extra tag criteria implied by the entity's classes.
#[must_use]
pub fn extra_tags(instance_of: &BTreeSet<String>) -> BTreeSet<String> {
    instance_of
        .iter()
        .filter_map(|q| catalog().extra_tags.get(q))
        .flatten()
        .cloned()
        .collect()
}

const PLACE_TAGS: [&str; 5] = [
    "place",
    "place=neighbourhood",
    "landuse=residential",
    "boundary=administrative",
    "admin_level",
];

/// Whether an entity with these criteria and classes may be mapped as a
/// building.
///
/// Human settlements never are. Otherwise a `building*` criterion decides,
/// then the classes' types, then any type sharing a criterion.
#[must_use]
pub fn could_be_building(criteria: &BTreeSet<String>, instance_of: &BTreeSet<String>) -> bool {
    if criteria.iter().all(|t| PLACE_TAGS.contains(&t.as_str())) {
        return false;
    }
    if criteria.iter().any(|t| t.starts_with("building")) {
        return true;
    }

    let mut found_class = false;
    let mut check_housename = false;
    for t in &catalog().entity_types {
        if t.wikidata.as_ref().is_some_and(|q| instance_of.contains(q)) {
            found_class = true;
            check_housename |= t.check_housename;
        }
    }
    if found_class {
        return check_housename;
    }

    types_for_criteria(criteria).any(|t| t.check_housename)
}
