//! SPARQL queries for entities inside a bounding box.
//!
//! Two queries are run per box: one on the entity's own coordinate (P625)
//! and one on the coordinate qualifier of its headquarters location (P159).
//! Both walk the class tree (`P31/P279*`) to classes carrying an OSM tag
//! (P1282), directly or through sport, religion or use.

use std::collections::{BTreeMap, btree_map::Entry};

use serde::Deserialize;
use wikimatch_match_models::{Coordinate, SKIP_TAGS, TagCriteria};
use wikimatch_place_models::BoundingBox;

/// Prefix of entity URIs in query results.
pub const ENTITY_URI_PREFIX: &str = "http://www.wikidata.org/entity/Q";

/// Markers the query service puts in the body of a timed-out query.
pub const TIMEOUT_MARKERS: [&str; 2] = [
    "Query deadline is expired.",
    "java.util.concurrent.TimeoutException",
];

const TAG_PATH: &str = "((p:P1282/ps:P1282)|wdt:P641/(p:P1282/ps:P1282)|wdt:P140/(p:P1282/ps:P1282)|wdt:P366/(p:P1282/ps:P1282))";

const ITEM_TAGS: &str = r#"
SELECT ?place ?placeLabel (SAMPLE(?location) AS ?location) ?address ?street ?item ?itemLabel ?tag WHERE {
    SERVICE wikibase:box {
        ?place wdt:P625 ?location .
        bd:serviceParam wikibase:cornerWest "Point($west $south)"^^geo:wktLiteral .
        bd:serviceParam wikibase:cornerEast "Point($east $north)"^^geo:wktLiteral .
    }
    ?place wdt:P31/wdt:P279* ?item .
    ?item $tag_path ?tag .
    OPTIONAL { ?place wdt:P969 ?address } .
    OPTIONAL { ?place wdt:P669 ?street } .
    FILTER NOT EXISTS { ?item wdt:P31 wd:Q18340550 } .
    FILTER NOT EXISTS { ?item wdt:P31 wd:Q13406463 } .
    FILTER NOT EXISTS { ?place wdt:P31 wd:Q17362920 } .
    FILTER NOT EXISTS { ?place wdt:P31/wdt:P279* wd:Q192611 } .
    FILTER NOT EXISTS { ?place wdt:P31 wd:Q811683 } .
    SERVICE wikibase:label { bd:serviceParam wikibase:language "en" }
}
GROUP BY ?place ?placeLabel ?address ?street ?item ?itemLabel ?tag
"#;

const HQ_ITEM_TAGS: &str = r#"
SELECT ?place ?placeLabel (SAMPLE(?location) AS ?location) ?address ?street ?item ?itemLabel ?tag WHERE {
    ?place p:P159 ?statement .
    SERVICE wikibase:box {
        ?statement pq:P625 ?location .
        bd:serviceParam wikibase:cornerWest "Point($west $south)"^^geo:wktLiteral .
        bd:serviceParam wikibase:cornerEast "Point($east $north)"^^geo:wktLiteral .
    }
    ?place wdt:P31/wdt:P279* ?item .
    ?item $tag_path ?tag .
    OPTIONAL { ?place wdt:P969 ?address } .
    OPTIONAL { ?place wdt:P669 ?street } .
    FILTER NOT EXISTS { ?place wdt:P31/wdt:P279* wd:Q192611 } .
    SERVICE wikibase:label { bd:serviceParam wikibase:language "en" }
}
GROUP BY ?place ?placeLabel ?address ?street ?item ?itemLabel ?tag
"#;

fn render(template: &str, bbox: &BoundingBox) -> String {
    template
        .replace("$tag_path", TAG_PATH)
        .replace("$west", &bbox.west.to_string())
        .replace("$south", &bbox.south.to_string())
        .replace("$east", &bbox.east.to_string())
        .replace("$north", &bbox.north.to_string())
}

/// Entities located inside `bbox` with their tag criteria.
#[must_use]
pub fn item_tag_query(bbox: &BoundingBox) -> String {
    render(ITEM_TAGS, bbox)
}

/// Entities whose headquarters is inside `bbox`.
#[must_use]
pub fn hq_item_tag_query(bbox: &BoundingBox) -> String {
    render(HQ_ITEM_TAGS, bbox)
}

/// One bound variable of a result row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Binding {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// A result row keyed by variable name.
pub type Row = BTreeMap<String, Binding>;

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    pub results: QueryResults,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResults {
    pub bindings: Vec<Row>,
}

/// An entity found by a bounding-box query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryItem {
    pub qid: String,
    pub label: String,
    pub coordinate: Option<Coordinate>,
    /// Free-text address (P969).
    pub address: Option<String>,
    /// URI of the street the entity is on (P669).
    pub street: Option<String>,
    pub criteria: TagCriteria,
}

/// The item id of an entity URI binding, e.g. `Q42`.
#[must_use]
pub fn uri_to_qid(binding: &Binding) -> Option<String> {
    if binding.kind != "uri" {
        return None;
    }
    let id = binding.value.strip_prefix(ENTITY_URI_PREFIX)?;
    Some(format!("Q{id}"))
}

/// Converts `Key:x` to `x` and `Tag:k=v` to `k=v`. Anything else is not
/// a usable criterion.
#[must_use]
pub fn drop_tag_prefix(value: &str) -> Option<&str> {
    if let Some(key) = value.strip_prefix("Key:") {
        return (!key.contains('=')).then_some(key);
    }
    value.strip_prefix("Tag:").filter(|tag| tag.contains('='))
}

/// Parses a WKT point, `Point(lon lat)`.
#[must_use]
pub fn parse_wkt_point(wkt: &str) -> Option<Coordinate> {
    let inner = wkt.trim().strip_prefix("Point(")?.strip_suffix(')')?;
    let mut parts = inner.split_whitespace();
    let lon = parts.next()?.parse().ok()?;
    let lat = parts.next()?.parse().ok()?;
    Some(Coordinate::new(lat, lon))
}

/// Folds query rows into `items`, one entry per entity with the union of
/// its criteria. Rows with skipped or malformed tags are ignored.
pub fn collect_item_rows(rows: &[Row], items: &mut BTreeMap<String, QueryItem>) {
    for row in rows {
        let Some(tag) = row
            .get("tag")
            .and_then(|b| drop_tag_prefix(&b.value))
            .filter(|t| !SKIP_TAGS.contains(t))
        else {
            continue;
        };
        let Some(qid) = row.get("place").and_then(uri_to_qid) else {
            continue;
        };
        let value = |name: &str| row.get(name).map(|b| b.value.clone());

        let item = match items.entry(qid) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let qid = e.key().clone();
                e.insert(QueryItem {
                    label: value("placeLabel").unwrap_or_else(|| qid.clone()),
                    coordinate: row.get("location").and_then(|b| parse_wkt_point(&b.value)),
                    address: value("address"),
                    street: value("street"),
                    criteria: TagCriteria::new(),
                    qid,
                })
            }
        };
        item.criteria.insert(tag);
    }
}

/// Whether a failed query response is the service's time limit.
#[must_use]
pub fn is_timeout_body(body: &str) -> bool {
    TIMEOUT_MARKERS.iter().any(|m| body.contains(m))
}
