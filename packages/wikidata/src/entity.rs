//! Entity documents as returned by `wbgetentities`.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use wikimatch_match_models::{
    Coordinate, Entity, IdentifierClaim, NameCandidate, NameProvenance,
};

use crate::sparql::QueryItem;

static IMAGE_EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.[a-z]{3,4}$").expect("valid regex"));

static IMAGE_SUFFIX_RES: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r" - geograph\.org\.uk - \d+$").expect("valid regex"),
        Regex::new(r"[, -]*0\d{2,}$").expect("valid regex"),
    ]
});

/// `'UKJ1234'` style LAU codes also appear without the country prefix.
static LAU_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2}([^A-Z].+)$").expect("valid regex"));

const CATEGORY_PREFIX: &str = "Category:";

/// Languages with more aliases than this are skipped.
const MAX_ALIASES_PER_LANGUAGE: usize = 3;

/// External identifier properties and the map keys holding the same value.
pub const IDENTIFIER_PROPERTIES: [(&str, &[&str], &str); 28] = [
    ("P238", &["iata"], "IATA airport code"),
    ("P239", &["icao"], "ICAO airport code"),
    ("P240", &["faa", "ref"], "FAA airport code"),
    ("P296", &["ref", "ref:train", "railway:ref"], "station code"),
    ("P300", &["ISO3166-2"], "ISO 3166-2 code"),
    ("P359", &["ref:rce"], "Rijksmonument ID"),
    ("P590", &["ref:gnis", "GNISID", "gnis:id", "gnis:feature_id"], "USGS GNIS ID"),
    ("P649", &["ref:nrhp"], "NRHP reference number"),
    ("P722", &["uic_ref"], "UIC station code"),
    ("P757", &["ref:whc"], "World Heritage Site ID"),
    ("P782", &["ref"], "LAU (local administrative unit)"),
    ("P836", &["ref:gss"], "UK Government Statistical Service code"),
    ("P856", &["website", "contact:website", "url"], "website"),
    ("P882", &["nist:fips_code"], "FIPS 6-4 (US counties)"),
    ("P901", &["ref:fips"], "FIPS 10-4 (countries and regions)"),
    ("P954", &["uic_ref"], "IBNR ID"),
    ("P981", &["ref:woonplaatscode"], "BAG code for Dutch residencies"),
    ("P1216", &["HE_ref"], "National Heritage List for England number"),
    ("P2253", &["ref:edubase"], "EDUBase URN"),
    ("P2815", &["esr:user", "ref", "ref:train"], "ESR station code"),
    ("P3425", &["ref", "ref:SIC"], "Natura 2000 site ID"),
    ("P3562", &["seamark:light:reference"], "Admiralty number"),
    ("P4755", &["ref", "ref:train", "ref:crs", "crs", "nat_ref"], "UK railway station code"),
    ("P4803", &["ref", "ref:train"], "Amtrak station code"),
    ("P6082", &["nycdoitt:bin"], "NYC Building Identification Number"),
    ("P5086", &["ref"], "FIPS 5-2 alpha code (US states)"),
    ("P5087", &["ref:fips"], "FIPS 5-2 numeric code (US states)"),
    ("P5208", &["ref:bag"], "BAG building ID for Dutch buildings"),
];

#[derive(Debug, Clone, Deserialize)]
pub struct LangValue {
    #[serde(default)]
    pub language: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sitelink {
    pub title: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Snak {
    pub datavalue: Option<DataValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataValue {
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Claim {
    pub mainsnak: Snak,
}

/// The parts of an entity document the matcher reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntity {
    pub id: String,
    /// Present when the requested id does not exist.
    #[serde(default)]
    pub missing: Option<Value>,
    #[serde(default)]
    pub labels: BTreeMap<String, LangValue>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<LangValue>>,
    #[serde(default)]
    pub sitelinks: BTreeMap<String, Sitelink>,
    #[serde(default)]
    pub claims: BTreeMap<String, Vec<Claim>>,
}

impl RawEntity {
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        self.missing.is_some()
    }

    /// Values of every claim for `property` that has one.
    pub fn claim_values<'a>(&'a self, property: &str) -> impl Iterator<Item = &'a Value> + 'a {
        self.claims
            .get(property)
            .into_iter()
            .flatten()
            .filter_map(|c| c.mainsnak.datavalue.as_ref().map(|d| &d.value))
    }

    fn string_claims(&self, property: &str) -> Vec<String> {
        self.claim_values(property)
            .filter_map(Value::as_str)
            .map(ToString::to_string)
            .collect()
    }

    /// The English label, else any label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.labels
            .get("en")
            .or_else(|| self.labels.values().next())
            .map(|l| l.value.as_str())
    }

    /// Classes this entity is an instance of (P31).
    pub fn instance_of(&self) -> impl Iterator<Item = &str> {
        self.claim_values("P31")
            .filter_map(|v| v.get("id").and_then(Value::as_str))
    }

    /// First coordinate claim (P625).
    #[must_use]
    pub fn coordinate(&self) -> Option<Coordinate> {
        self.claim_values("P625").find_map(|v| {
            let lat = v.get("latitude")?.as_f64()?;
            let lon = v.get("longitude")?.as_f64()?;
            Some(Coordinate::new(lat, lon))
        })
    }

    /// Title of the English encyclopedia article.
    #[must_use]
    pub fn enwiki(&self) -> Option<&str> {
        self.sitelinks.get("enwiki").map(|s| s.title.as_str())
    }

    /// External identifier claims with their map keys.
    #[must_use]
    pub fn identifiers(&self) -> Vec<IdentifierClaim> {
        IDENTIFIER_PROPERTIES
            .iter()
            .filter_map(|(property, osm_keys, label)| {
                let mut values = self.string_claims(property);
                if values.is_empty() {
                    return None;
                }
                if *property == "P782" {
                    let short: Vec<String> = values
                        .iter()
                        .filter_map(|v| LAU_CODE_RE.captures(v).map(|c| c[1].to_string()))
                        .collect();
                    values.extend(short);
                }
                Some(IdentifierClaim {
                    property: (*property).to_string(),
                    label: (*label).to_string(),
                    osm_keys: osm_keys.iter().map(ToString::to_string).collect(),
                    values,
                })
            })
            .collect()
    }
}

/// Strips the extension and camera or archive suffixes from an image file
/// name, leaving the part that may name the subject.
#[must_use]
pub fn image_name(file_name: &str) -> String {
    let mut name = IMAGE_EXTENSION_RE.replace(file_name, "").into_owned();
    for re in IMAGE_SUFFIX_RES.iter() {
        if let Some(m) = re.find(&name) {
            name.truncate(m.start());
            break;
        }
    }
    name
}

struct NameList(Vec<NameCandidate>);

impl NameList {
    fn has_text(&self, text: &str) -> bool {
        self.0.iter().any(|n| n.text == text)
    }

    fn push(&mut self, text: impl Into<String>, provenance: NameProvenance, tag: impl Into<String>) {
        self.0.push(NameCandidate::new(text, provenance, tag));
    }
}

fn text_and_language(value: &Value) -> Option<(&str, &str)> {
    let text = value.get("text")?.as_str()?;
    let language = value.get("language").and_then(Value::as_str).unwrap_or("");
    Some((text, language))
}

/// Every name the entity is known by, tagged with where it came from.
///
/// A sitelink title whose lower-cased first letter form is already a name
/// is recorded in that form. Image names containing digits are dropped
/// when nothing else gives the same name: a photo of one house is often
/// used for a whole terrace.
#[must_use]
pub fn names_from_entity(raw: &RawEntity) -> Vec<NameCandidate> {
    let mut names = NameList(Vec::new());

    for (lang, label) in &raw.labels {
        names.push(&label.value, NameProvenance::Label, lang);
    }

    for (site, link) in &raw.sitelinks {
        let mut title = link
            .title
            .strip_prefix(CATEGORY_PREFIX)
            .unwrap_or(&link.title)
            .to_string();
        let mut chars = title.chars();
        if let Some(first) = chars.next().filter(|c| c.is_uppercase()) {
            let lowered: String = first.to_lowercase().chain(chars).collect();
            if names.has_text(&lowered) {
                title = lowered;
            }
        }
        names.push(title, NameProvenance::Sitelink, site);
    }

    for (lang, aliases) in &raw.aliases {
        if aliases.len() > MAX_ALIASES_PER_LANGUAGE {
            continue;
        }
        for alias in aliases {
            names.push(&alias.value, NameProvenance::Alias, lang);
        }
    }

    for value in raw.claim_values("P373").filter_map(Value::as_str) {
        names.push(value, NameProvenance::CommonsCategory, "P373");
    }
    for (text, lang) in raw.claim_values("P1448").filter_map(text_and_language) {
        names.push(text, NameProvenance::OfficialName, lang);
    }
    for (text, lang) in raw.claim_values("P1705").filter_map(text_and_language) {
        names.push(text, NameProvenance::NativeLabel, lang);
    }

    let image_names: Vec<String> = raw
        .claim_values("P18")
        .filter_map(Value::as_str)
        .map(image_name)
        .collect();
    for name in image_names {
        if name.chars().any(|c| c.is_ascii_digit()) && !names.has_text(&name) {
            log::trace!("{}: skipping image name {name:?}", raw.id);
            continue;
        }
        names.push(name, NameProvenance::Image, "P18");
    }

    for (text, lang) in raw.claim_values("P6375").filter_map(text_and_language) {
        names.push(text, NameProvenance::StreetAddress, lang);
    }

    names.0
}

/// Builds an entity from a bounding-box query row.
#[must_use]
pub fn entity_from_item(item: QueryItem) -> Entity {
    let mut entity = Entity::new(item.qid);
    entity.label = Some(item.label);
    entity.coordinate = item.coordinate;
    entity.criteria = item.criteria;
    if let Some(address) = item.address {
        entity
            .names
            .push(NameCandidate::new(address, NameProvenance::StreetAddress, "P969"));
    }
    entity
}

/// Fills names, classes, identifiers and the raw document in from a
/// fetched entity document. Query-derived label and coordinate win.
///
/// # Errors
///
/// Returns [`serde_json::Error`] if the document is not an entity.
pub fn apply_detail(entity: &mut Entity, document: Value) -> Result<(), serde_json::Error> {
    let raw: RawEntity = serde_json::from_value(document.clone())?;

    let mut names = names_from_entity(&raw);
    names.append(&mut entity.names);
    entity.names = names;

    entity.instance_of.extend(raw.instance_of().map(ToString::to_string));
    entity.identifiers = raw.identifiers();
    if entity.label.is_none() {
        entity.label = raw.label().map(ToString::to_string);
    }
    if entity.coordinate.is_none() {
        entity.coordinate = raw.coordinate();
    }
    entity.detail = Some(document);
    Ok(())
}

/// Title of the entity's English article, read from its raw document.
#[must_use]
pub fn enwiki_title(entity: &Entity) -> Option<&str> {
    entity
        .detail
        .as_ref()?
        .get("sitelinks")?
        .get("enwiki")?
        .get("title")?
        .as_str()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document() -> Value {
        json!({
            "id": "Q7594472",
            "labels": {
                "en": {"language": "en", "value": "St Mary's Church"},
                "de": {"language": "de", "value": "St. Mary's Church"}
            },
            "aliases": {
                "en": [{"language": "en", "value": "Church of St Mary"}],
                "fr": [
                    {"language": "fr", "value": "a"},
                    {"language": "fr", "value": "b"},
                    {"language": "fr", "value": "c"},
                    {"language": "fr", "value": "d"}
                ]
            },
            "sitelinks": {
                "enwiki": {"site": "enwiki", "title": "St Mary's Church, Ashwell"},
                "commonswiki": {"site": "commonswiki", "title": "Category:St Mary's Church"}
            },
            "claims": {
                "P31": [
                    {"mainsnak": {"datavalue": {"value": {"id": "Q16970"}}}},
                    {"mainsnak": {"snaktype": "somevalue"}}
                ],
                "P625": [{"mainsnak": {"datavalue": {"value": {"latitude": 52.04, "longitude": -0.15}}}}],
                "P1216": [{"mainsnak": {"datavalue": {"value": "1175563"}}}],
                "P782": [{"mainsnak": {"datavalue": {"value": "NL0363"}}}],
                "P1448": [{"mainsnak": {"datavalue": {"value": {"text": "Parish Church of St Mary", "language": "en"}}}}],
                "P18": [
                    {"mainsnak": {"datavalue": {"value": "Ashwell church - geograph.org.uk - 123456.jpg"}}},
                    {"mainsnak": {"datavalue": {"value": "12 High Street.jpg"}}}
                ],
                "P6375": [{"mainsnak": {"datavalue": {"value": {"text": "High Street", "language": "en"}}}}]
            }
        })
    }

    fn raw() -> RawEntity {
        serde_json::from_value(document()).unwrap()
    }

    #[test]
    fn image_names_lose_suffixes() {
        assert_eq!(image_name("Ashwell church - geograph.org.uk - 123456.jpg"), "Ashwell church");
        assert_eq!(image_name("Town Hall, 0123.jpeg"), "Town Hall");
        assert_eq!(image_name("Town Hall.JPG"), "Town Hall.JPG");
    }

    #[test]
    fn names_with_provenance() {
        let names = names_from_entity(&raw());
        let find = |text: &str| names.iter().filter(|n| n.text == text).collect::<Vec<_>>();

        assert_eq!(find("St Mary's Church").len(), 2);
        assert_eq!(find("St Mary's Church")[1].provenance, NameProvenance::Sitelink);
        assert_eq!(find("Church of St Mary")[0].provenance, NameProvenance::Alias);
        assert!(find("a").is_empty());
        assert_eq!(find("Parish Church of St Mary")[0].provenance_tag, "en");
        assert_eq!(find("Ashwell church")[0].provenance, NameProvenance::Image);
        assert!(find("12 High Street").is_empty());
        assert_eq!(find("High Street")[0].provenance, NameProvenance::StreetAddress);
    }

    #[test]
    fn lowercase_sitelink_reuses_existing_name() {
        let raw: RawEntity = serde_json::from_value(json!({
            "id": "Q1",
            "labels": {"en": {"language": "en", "value": "iPod museum"}},
            "sitelinks": {"enwiki": {"title": "IPod museum"}}
        }))
        .unwrap();
        let names = names_from_entity(&raw);
        assert!(names.iter().all(|n| n.text == "iPod museum"));
    }

    #[test]
    fn identifiers_and_lau_short_form() {
        let ids = raw().identifiers();
        let nhle = ids.iter().find(|c| c.property == "P1216").unwrap();
        assert_eq!(nhle.osm_keys, vec!["HE_ref"]);
        let lau = ids.iter().find(|c| c.property == "P782").unwrap();
        assert_eq!(lau.values, vec!["NL0363", "0363"]);
    }

    #[test]
    fn detail_fills_entity() {
        let mut entity = Entity::new("Q7594472");
        entity.label = Some("St Mary's".to_string());
        apply_detail(&mut entity, document()).unwrap();

        assert_eq!(entity.label.as_deref(), Some("St Mary's"));
        assert!(entity.is_church_building());
        assert!(entity.is_nhle());
        assert!(entity.coordinate.is_some());
        assert_eq!(enwiki_title(&entity), Some("St Mary's Church, Ashwell"));
    }

    #[test]
    fn query_item_address_becomes_name() {
        let entity = entity_from_item(QueryItem {
            qid: "Q2".to_string(),
            label: "Old Bank".to_string(),
            coordinate: None,
            address: Some("1 Market Square".to_string()),
            street: None,
            criteria: ["amenity=bank"].into_iter().collect(),
        });
        assert_eq!(entity.street_addresses().collect::<Vec<_>>(), vec!["1 Market Square"]);
        assert!(entity.criteria.contains("amenity=bank"));
    }
}
