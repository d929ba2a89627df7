//! Overpass QL query building.
//!
//! A chunk query selects every feature inside the area's bounding box that
//! carries one of the wanted tags and has a name, plus anything already
//! linked by `wikidata`, anything with a house number and anything with a
//! `ref:*` identifier.

use std::collections::{BTreeMap, BTreeSet};

use wikimatch_match_models::{OsmType, SKIP_TAGS};
use wikimatch_place_models::{AreaId, BoundingBox};

/// Offset of area ids derived from closed ways.
pub const WAY_AREA_OFFSET: i64 = 2_400_000_000;

/// Offset of area ids derived from relations.
pub const RELATION_AREA_OFFSET: i64 = 3_600_000_000;

/// Query timeout in seconds.
pub const QUERY_TIMEOUT_SECS: u32 = 600;

/// Criteria never asked for: the shared skip list plus plain `name`.
fn is_skipped(tag: &str) -> bool {
    tag == "name" || SKIP_TAGS.contains(&tag)
}

/// Tags whose features nearly always have a plain `name`.
const NAME_ONLY_TAGS: [&str; 14] = [
    "area=yes",
    "type=tunnel",
    "leisure=park",
    "leisure=garden",
    "site=aerodome",
    "amenity=hospital",
    "boundary",
    "amenity=pub",
    "amenity=cinema",
    "ruins",
    "retail=retail_park",
    "amenity=concert_hall",
    "amenity=theatre",
    "designation=civil_parish",
];

const NAME_ONLY_KEYS: [&str; 9] = [
    "place",
    "landuse",
    "admin_level",
    "water",
    "man_made",
    "railway",
    "aeroway",
    "bridge",
    "natural",
];

/// Keys only expected on relations.
const RELATION_ONLY_KEYS: [&str; 3] = ["site", "type", "route"];

const ANY_NAME_FILTER: &str = r#"[~"^(addr:housenumber|.*name.*)$"~".",i]"#;

/// Overpass QL element keyword for an OSM type.
#[must_use]
pub const fn overpass_type(osm_type: OsmType) -> &'static str {
    match osm_type {
        OsmType::Node => "node",
        OsmType::Way => "way",
        OsmType::Relation => "rel",
    }
}

/// Overpass area id for a way or relation. Nodes have none.
#[must_use]
pub const fn area_id(id: AreaId) -> Option<i64> {
    match id.osm_type {
        OsmType::Node => None,
        OsmType::Way => Some(id.osm_id + WAY_AREA_OFFSET),
        OsmType::Relation => Some(id.osm_id + RELATION_AREA_OFFSET),
    }
}

/// Drops `key=value` tags whose bare `key` is also wanted.
#[must_use]
pub fn simplify_tags(mut tags: BTreeSet<String>) -> BTreeSet<String> {
    let keys: Vec<String> = tags.iter().filter(|t| !t.contains('=')).cloned().collect();
    for key in keys {
        let prefix = format!("{key}=");
        tags.retain(|t| !t.starts_with(&prefix));
    }
    tags
}

/// Drops `building` when more specific tags are wanted as well.
#[must_use]
pub fn drop_building_tag(mut tags: BTreeSet<String>) -> BTreeSet<String> {
    let generic = |t: &String| t == "building" || t == "building=yes";
    if tags.iter().any(|t| !generic(t)) {
        tags.retain(|t| !generic(t));
    }
    tags
}

/// Wanted tags for a query: skip list removed, then simplified.
#[must_use]
pub fn query_tags<I, S>(criteria: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let tags = criteria
        .into_iter()
        .map(Into::into)
        .filter(|t| !is_skipped(t))
        .collect();
    simplify_tags(tags)
}

/// Groups tags by key; a bare key maps to no values.
#[must_use]
pub fn group_tags<'a, I: IntoIterator<Item = &'a str>>(tags: I) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for tag in tags {
        match tag.split_once('=') {
            Some((k, v)) => grouped.entry(k.to_string()).or_default().push(v.to_string()),
            None => {
                grouped.insert(tag.to_string(), Vec::new());
            }
        }
    }
    grouped
}

/// One filter statement, e.g. `nwr(area.a)["amenity"~"^(bar|pub)$"];`.
#[must_use]
pub fn element_filter(key: &str, values: &[String], filters: &str) -> String {
    let tag = match values {
        [] => format!(r#""{key}""#),
        [value] => format!(r#""{key}"="{value}""#),
        _ => format!(r#""{key}"~"^({})$""#, values.join("|")),
    };
    let element = if RELATION_ONLY_KEYS.contains(&key) {
        "rel"
    } else {
        "nwr"
    };
    format!("{element}{filters}[{}];", tag.replace('␣', " "))
}

fn is_name_only(tag: &str) -> bool {
    NAME_ONLY_TAGS.contains(&tag)
        || (tag.contains('=')
            && NAME_ONLY_KEYS
                .iter()
                .any(|key| tag.strip_prefix(key).is_some_and(|rest| rest.starts_with('='))))
}

/// `[name]` when every tag is one whose features are plainly named,
/// otherwise any name-like key or a house number.
#[must_use]
pub fn name_filter<'a, I: IntoIterator<Item = &'a str>>(tags: I) -> &'static str {
    if tags.into_iter().all(is_name_only) {
        "[name]"
    } else {
        ANY_NAME_FILTER
    }
}

fn union_lines(tags: &BTreeSet<String>, filters: &str) -> String {
    group_tags(tags.iter().map(String::as_str))
        .iter()
        .map(|(key, values)| element_filter(key, values, filters))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `south,west,north,east` with six decimals.
#[must_use]
pub fn bbox_clause(bbox: &BoundingBox) -> String {
    format!(
        "{:.6},{:.6},{:.6},{:.6}",
        bbox.south, bbox.west, bbox.north, bbox.east
    )
}

/// Query for one chunk of a way or relation area.
///
/// `include_self` adds the area's own element, wanted once per area.
/// Returns `None` for node areas, which use [`oql_for_point`].
#[must_use]
pub fn oql_for_area(
    area: AreaId,
    tags: &BTreeSet<String>,
    bbox: &BoundingBox,
    include_self: bool,
) -> Option<String> {
    let area_id = area_id(area)?;
    let self_line = if include_self {
        format!("{}({});", overpass_type(area.osm_type), area.osm_id)
    } else {
        String::new()
    };
    Some(format!(
        r#"[timeout:{QUERY_TIMEOUT_SECS}][out:json][bbox:{bbox}];
area({area_id}) -> .a;
(
{tags}
) -> .b;
(
    {self_line}
    nwr(area.a)["wikidata"];
    nwr(area.a)["addr:housenumber"];
    nwr.b{name_filter};
    nwr.b[~"^ref:"~"."];
);
(._;>;);
out geom;"#,
        bbox = bbox_clause(bbox),
        tags = union_lines(tags, "(area.a)"),
        name_filter = name_filter(tags.iter().map(String::as_str)),
    ))
}

/// Query for a node area: everything within `radius` metres of a point.
#[must_use]
pub fn oql_for_point(lat: f64, lon: f64, radius: u32, tags: &BTreeSet<String>) -> String {
    format!(
        r#"[timeout:{QUERY_TIMEOUT_SECS}][out:json];
nwr(around:{radius},{lat},{lon}) -> .a;
(
{tags}
) -> .b;
(
    nwr.a["wikidata"];
    nwr.a["addr:housenumber"];
    nwr.b{name_filter};
    nwr.b[~"^ref:"~"."];
);
(._;>;);
out geom;"#,
        tags = union_lines(tags, ".a"),
        name_filter = name_filter(tags.iter().map(String::as_str)),
    )
}
