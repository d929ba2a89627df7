#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fuzzy comparison of map feature names with entity names.
//!
//! [`name_match`] compares one map name with one entity name by trying a
//! fixed sequence of normalizations and returns the first rule that
//! succeeds. [`check_for_match`] runs it across every name-like tag of a
//! feature and every name of an entity and collects the evidence.

pub mod address;
pub mod identifier;
pub mod initials;
pub mod normalize;
pub mod numerals;
pub mod synonyms;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use wikimatch_match_models::{MatchKind, NameCandidate, NameMatch, NameMatchDetail, TagMap};

pub use address::{AddressMatch, check_for_address_in_extract, check_name_matches_address, has_address};
pub use identifier::check_identifier;

use crate::initials::{
    drop_initials, initials_match, name_containing_initials, strip_prefix_ignore_case,
    strip_suffix_ignore_case,
};
use crate::normalize::{
    ORDINAL_RE, digits_to_words, drop_article, ordinal_to_words, strip_non_chars,
    strip_non_chars_and_dash, strip_non_chars_match, strip_non_letter_start, strip_words,
    tidy_name,
};

/// Image file names such as `DSC 8243`.
static DSC_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bdsc \d+").expect("valid regex"));

static SS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bss\b").expect("valid regex"));

static ST_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bst\b").expect("valid regex"));

static SS_OR_ST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bs[st]\b").expect("valid regex"));

static KEEP_COMMAS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^@\w, ]").expect("valid regex"));

/// A street name split into its body and road type.
static ROAD_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(.+)(avenue|street|road|boulevard|drive|lane|square|ave|st|rd|blvd|dr|ln|sq) *$",
    )
    .expect("valid regex")
});

/// Words that may trail an entity name without changing what it refers to.
const GENERIC_ENDINGS: [&str; 4] = ["companybuilding", "building", "complex", "office"];

const HISTORIC_SUFFIX: &str = " (historic)";

const FORMER_PREFIXES: [&str; 5] = ["old ", "the old ", "former ", "disused ", "alte "];

const MEMORIAL_PREFIXES: [&str; 3] = ["Tomb of ", "Statue of ", "Memorial to "];

const STREET_SEPARATORS: [&str; 3] = ["&", " and ", " And "];

/// Tags whose key contains `name` but which never hold the feature's name.
const BAD_NAME_FIELDS: [&str; 7] = [
    "tiger:name_base",
    "name:right",
    "name:left",
    "gnis:county_name",
    "openGeoDB:name",
    "addr:street:name",
    "name:source",
];

fn good(detail: &str) -> Option<NameMatch> {
    Some(NameMatch::new(MatchKind::Normalized, detail))
}

fn term_set(name: &str) -> BTreeSet<&str> {
    name.split_whitespace().collect()
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(char::is_numeric)
}

/// Both names join two saints: `St Peter and St Paul`, `Ss Peter & Paul`.
#[must_use]
pub fn two_saints(n1: &str, n2: &str) -> bool {
    [n1, n2].iter().all(|n| n.contains(" and ") || n.contains(" & "))
        && ((SS_RE.is_match(n1) && ST_RE.is_match(n2)) || (ST_RE.is_match(n1) && SS_RE.is_match(n2)))
}

/// A single plural word whose singular appears in a longer name, as with
/// `boots` and `the boot inn`.
#[must_use]
pub fn plural_word_name_in_other_name(n1: &str, n2: &str) -> bool {
    !n1.contains(' ')
        && n2.contains(' ')
        && !n2.contains(n1)
        && n1.strip_suffix('s').is_some_and(|singular| n2.contains(singular))
}

fn number_to_words_match(n1: &str, n2: &str) -> bool {
    if !n1.chars().any(|c| c.is_ascii_digit()) {
        return false;
    }
    digits_to_words(n1).replace('-', " ") == n2.replace('-', " ")
}

/// Compares two names with droppable words removed from either side.
///
/// The names are reduced to word characters first. When only the map name
/// had to be trimmed the result is [`MatchKind::Trim`]; otherwise
/// [`MatchKind::WikidataTrimmed`] is preferred over
/// [`MatchKind::BothTrimmed`].
#[must_use]
pub fn match_with_words_removed(osm: &str, wd: &str, words: &[String]) -> Option<NameMatch> {
    if words.is_empty() {
        return None;
    }
    let wd_char_only = strip_non_chars_and_dash(wd);
    let osm_char_only = strip_non_chars_and_dash(osm);
    let words: Vec<String> = words
        .iter()
        .map(|w| strip_non_chars(w).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    let versions = |full: &str| -> BTreeSet<String> {
        words
            .iter()
            .map(|w| full.replace(w.as_str(), ""))
            .chain(std::iter::once(full.to_string()))
            .collect()
    };
    let osm_versions = versions(&osm_char_only);
    let wd_versions = versions(&wd_char_only);

    let mut best: Option<MatchKind> = None;
    for osm_filtered in osm_versions.iter().filter(|v| !v.is_empty()) {
        if !wd_versions.contains(osm_filtered) {
            continue;
        }
        if *osm_filtered == wd_char_only {
            return Some(NameMatch::new(MatchKind::Trim, "match with words removed"));
        }
        let kind = if *osm_filtered == osm_char_only {
            MatchKind::WikidataTrimmed
        } else {
            MatchKind::BothTrimmed
        };
        best = Some(best.map_or(kind, |b| b.min(kind)));
    }
    best.map(|kind| NameMatch::new(kind, "match with words removed"))
}

/// Core name comparison without the fallback rewrites of [`name_match`].
///
/// `endings` are droppable words such as `church` or `station` taken from
/// the entity type catalog.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn name_match_main(osm: &str, wd: &str, endings: &[String]) -> Option<NameMatch> {
    let (osm, wd) = (osm.trim(), wd.trim());
    if osm.is_empty() || wd.is_empty() {
        return None;
    }
    if wd == osm {
        return Some(NameMatch::new(MatchKind::Exact, "identical"));
    }

    let mut osm = if ORDINAL_RE.is_match(osm) {
        ordinal_to_words(osm)
    } else {
        osm.to_string()
    };
    let wd = if ORDINAL_RE.is_match(wd) {
        ordinal_to_words(wd)
    } else {
        wd.to_string()
    };

    let mut osm_lc = osm.to_lowercase();
    let mut wd_lc = wd.to_lowercase();

    if wd_lc.contains("dsc") {
        wd_lc = DSC_RE.replace_all(&wd_lc, "").into_owned();
    }

    if two_saints(&osm_lc, &wd_lc) {
        osm_lc = SS_OR_ST_RE.replace_all(&osm_lc, "").into_owned();
        wd_lc = SS_OR_ST_RE.replace_all(&wd_lc, "").into_owned();
    }

    if let Some(trimmed) = osm_lc.strip_suffix(HISTORIC_SUFFIX) {
        osm_lc = trimmed.to_string();
        if let Some(trimmed) = strip_suffix_ignore_case(&osm, HISTORIC_SUFFIX) {
            osm = trimmed.to_string();
        }
    }

    if wd_lc == osm_lc {
        return Some(NameMatch::new(MatchKind::CaseInsensitive, "identical except case"));
    }
    if term_set(&osm_lc) == term_set(&wd_lc) {
        return Some(NameMatch::new(MatchKind::TermSet, "matching term sets"));
    }
    if strip_non_chars_match(&osm_lc, &wd_lc, true) {
        return good("strip non chars and dash");
    }
    if name_containing_initials(&osm, &wd) {
        return Some(NameMatch::new(MatchKind::Initials, "name containing initials"));
    }

    let mut endings = endings.to_vec();
    if let Some(at_pos) = wd_lc.find(" at ") {
        let start = &wd_lc[..at_pos];
        endings.retain(|e| e != start);
    }

    if let Some(m) =
        initials_match(&osm, &wd, &endings).or_else(|| initials_match(&wd, &osm, &endings))
    {
        return Some(m);
    }

    if strip_non_chars_match(&osm_lc, &wd_lc, false) {
        return good("strip non chars");
    }

    // lead article is kept until the word-level comparisons are done
    let wd_tidy1 = tidy_name(&wd_lc);
    let osm_tidy1 = tidy_name(&osm_lc);
    if wd_tidy1.is_empty() || osm_tidy1.is_empty() {
        return None;
    }
    if wd_tidy1 == osm_tidy1 {
        return good("tidy");
    }
    if number_to_words_match(&wd_tidy1, &osm_tidy1) || number_to_words_match(&osm_tidy1, &wd_tidy1)
    {
        return good("number to words");
    }

    let wd_tidy2 = strip_words(&wd_tidy1);
    let osm_tidy2 = strip_words(&osm_tidy1);
    if wd_tidy2 == osm_tidy2 {
        return good("strip words");
    }

    if !endings.is_empty() {
        let without_endings = |name: &str| -> BTreeSet<String> {
            name.split_whitespace()
                .filter(|t| !endings.iter().any(|e| e == t))
                .map(ToString::to_string)
                .collect()
        };
        let osm_terms = without_endings(&osm_tidy2);
        if !osm_terms.is_empty() && osm_terms == without_endings(&wd_tidy2) {
            return good("matching term sets without endings");
        }
    }

    let mut wd_tidy = drop_article(&wd_tidy2);
    let mut osm_tidy = drop_article(&osm_tidy2);

    let wd_names: BTreeSet<&str> = [wd_tidy.as_str(), wd_tidy1.as_str(), wd_tidy2.as_str()].into();
    let osm_names: BTreeSet<&str> = [osm_tidy.as_str(), osm_tidy1.as_str(), osm_tidy2.as_str()].into();

    if wd_tidy == osm_tidy {
        return good("drop article");
    }

    if let Some(m) = match_with_words_removed(&osm_lc, &wd_lc, &endings) {
        if osm_lc.contains("church") && wd_lc.contains("church") {
            return good("words removed church");
        }
        return Some(m);
    }

    let plural_in_other_name = plural_word_name_in_other_name(&osm_lc, &wd_lc)
        || plural_word_name_in_other_name(&wd_lc, &osm_lc);

    if !endings.is_empty() {
        let tidy_endings: Vec<String> = endings.iter().map(|e| tidy_name(e)).collect();
        if let Some(m) = match_with_words_removed(&osm_tidy, &wd_tidy, &tidy_endings)
            && !plural_in_other_name
        {
            return Some(m);
        }
    }

    for osm_name in &osm_names {
        for wd_name in &wd_names {
            if strip_non_chars_match(osm_name, wd_name, true) {
                return good("strip non chars and dash after tidy");
            }
        }
    }

    for wd_name in &wd_names {
        let Some(comma) = wd_name.rfind(", ") else {
            continue;
        };
        let part1 = &wd_name[..comma];
        for osm_name in &osm_names {
            if is_all_digits(&strip_non_chars(osm_name)) {
                continue;
            }
            if part1 == *osm_name || strip_non_chars_match(osm_name, part1, false) {
                return good("comma strip 1");
            }
        }
    }

    // Washington, D.C.
    if wd_tidy.contains("washington, d") {
        wd_tidy = wd_tidy.replace("washington, d", "washington d");
    }

    if !osm_tidy.trim().is_empty()
        && wd_tidy
            .split_whitespace()
            .eq(osm_tidy.split_whitespace().rev())
    {
        return good("tidy name terms reversed");
    }

    wd_tidy = KEEP_COMMAS_RE.replace_all(&wd_tidy, "").into_owned();
    osm_tidy = KEEP_COMMAS_RE.replace_all(&osm_tidy, "").into_owned();

    if let Some(comma) = wd_tidy.rfind(", ")
        && !is_all_digits(&osm_tidy)
        && wd_tidy[..comma] == osm_tidy
    {
        return good("comma strip 2");
    }

    let wd_tidy = strip_non_chars(&wd_tidy);
    let osm_tidy = strip_non_chars(&osm_tidy);

    if plural_in_other_name || wd_tidy.is_empty() || osm_tidy.is_empty() {
        return None;
    }

    let trims_to = |long: &str, short: &str, end: &str| {
        long.strip_suffix(end) == Some(short) || long.strip_prefix(end) == Some(short)
    };
    GENERIC_ENDINGS
        .iter()
        .copied()
        .chain(endings.iter().map(String::as_str))
        .filter(|end| !end.is_empty())
        .any(|end| trims_to(&wd_tidy, &osm_tidy, end) || trims_to(&osm_tidy, &wd_tidy, end))
        .then(|| NameMatch::new(MatchKind::Trim, "generic ending"))
}

/// What is left of the map name after a leading copy of the entity name,
/// compared ignoring case and punctuation.
#[must_use]
pub fn prefix_name_match(osm: &str, wd: &str) -> Option<String> {
    let wd_lc = wd.to_lowercase();
    let osm_lc = osm.to_lowercase();

    let rest = if osm_lc.starts_with(&wd_lc) {
        osm.char_indices()
            .nth(wd.chars().count())
            .map_or("", |(pos, _)| &osm[pos..])
    } else {
        osm.char_indices()
            .filter(|(_, c)| *c == ' ')
            .find(|(pos, _)| {
                osm.get(..*pos)
                    .is_some_and(|start| strip_non_chars_match(&start.to_lowercase(), &wd_lc, false))
            })
            .map(|(pos, _)| &osm[pos..])?
    };

    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn road_ending(name: &str) -> Option<String> {
    ROAD_END_RE
        .captures(name)
        .map(|caps| caps[2].to_lowercase())
}

/// Names of a junction of two streets: `Church and 18th Street` against
/// `Church Street & 18th Street`. Both halves must match, with the road
/// type on either half droppable.
#[must_use]
pub fn match_two_streets(osm: &str, wd: &str, endings: &[String]) -> Option<NameMatch> {
    let single_separator = |name: &str| {
        let found: Vec<&str> = STREET_SEPARATORS
            .iter()
            .copied()
            .filter(|sep| name.contains(sep))
            .collect();
        match found.as_slice() {
            [sep] => Some(*sep),
            _ => None,
        }
    };
    let osm_sep = single_separator(osm)?;
    let wd_sep = single_separator(wd)?;

    let (osm_part1, osm_part2) = osm.split_once(osm_sep)?;
    let (wd_part1, wd_part2) = wd.split_once(wd_sep)?;
    let (osm_part1, osm_part2) = (osm_part1.trim(), osm_part2.trim());
    let (wd_part1, wd_part2) = (wd_part1.trim(), wd_part2.trim());

    let part_endings = |a: &str, b: &str| {
        let mut part: BTreeSet<String> = endings.iter().cloned().collect();
        part.extend([a, b].into_iter().filter_map(road_ending));
        part.into_iter().collect::<Vec<_>>()
    };

    let part1 = name_match_main(osm_part1, wd_part1, &part_endings(osm_part1, wd_part1))?;
    name_match_main(osm_part2, wd_part2, &part_endings(osm_part2, wd_part2))?;
    Some(part1)
}

/// Numbered addresses where one side omits the road type:
/// `1 Main` against `1 Main Street`.
#[must_use]
pub fn name_road_end_match(osm: &str, wd: &str, endings: &[String]) -> Option<NameMatch> {
    let (osm, wd) = (osm.trim(), wd.trim());
    let starts_with_digit = |s: &str| s.chars().next().is_some_and(|c| c.is_ascii_digit());
    if !starts_with_digit(osm) || !starts_with_digit(wd) {
        return None;
    }
    let road_body = |s: &str| ROAD_END_RE.captures(s).map(|c| c.get(1).map_or("", |m| m.as_str()).to_string());
    let m_osm = road_body(osm);
    let m_wd = road_body(wd);
    if m_osm.is_none() && m_wd.is_none() {
        return None;
    }
    name_match_main(
        m_osm.as_deref().unwrap_or(osm),
        m_wd.as_deref().unwrap_or(wd),
        endings,
    )
}

/// Place names plus variants without a trailing ` city` or ` county`.
#[must_use]
pub fn more_place_name_variants(place_names: &[String]) -> BTreeSet<String> {
    let mut variants: BTreeSet<String> = place_names.iter().cloned().collect();
    for name in place_names {
        for end in [" city", " county"] {
            if let Some(short) = strip_suffix_ignore_case(name, end)
                && !short.is_empty()
            {
                variants.insert(short.to_string());
            }
        }
    }
    variants
}

/// Removes a place name from a name, together with a linking word such as
/// `of` or `at` when one precedes it.
#[must_use]
pub fn strip_place_name(name: &str, place_name: &str) -> String {
    for word in ["of", "de", "di", "at", "i"] {
        let search = format!(" {word} {place_name}");
        if name.contains(&search) {
            return name.replace(&search, "");
        }
    }
    let possessive = format!("{place_name}s ");
    if name.contains(&possessive) {
        return name.replace(&possessive, "");
    }
    name.replace(place_name, "")
}

/// Compares a map name with an entity name.
///
/// Tries [`name_match_main`] first, then a series of rewrites: dropping
/// `old`/`former` style prefixes, junction names, road types on numbered
/// addresses, house numbers, initialisms, memorial prefixes, enclosing
/// place names and finally each `;`-separated part of the map name.
#[must_use]
pub fn name_match(
    osm: &str,
    wd: &str,
    endings: &[String],
    place_names: &[String],
) -> Option<NameMatch> {
    if let Some(m) = name_match_main(osm, wd, endings) {
        return Some(m);
    }

    for prefix in FORMER_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(osm, prefix)
            && let Some(m) = name_match_main(rest, wd, endings)
        {
            return Some(m);
        }
    }

    if let Some(m) = match_two_streets(osm, wd, endings) {
        return Some(m);
    }

    if let Some(m) = name_road_end_match(osm, wd, endings) {
        log::trace!("name_match: road end {osm:?} {wd:?}");
        return Some(m);
    }

    // house numbers: '1-3 Rectory Cottages' and 'Rectory Cottages'
    let wd_lc = wd.to_lowercase();
    if osm.chars().next().is_some_and(|c| c.is_ascii_digit())
        && ["cottages", "buildings", "houses"]
            .iter()
            .any(|t| wd_lc.contains(t))
        && let Some(m) = name_match_main(strip_non_letter_start(osm), wd, endings)
    {
        return Some(NameMatch::new(m.kind, format!("{} + strip non letter start", m.detail)));
    }

    if let Some(no_initials) = drop_initials(osm)
        && let Some(m) = name_match_main(no_initials, wd, endings)
    {
        return Some(NameMatch::new(m.kind, format!("{} + drop initials", m.detail)));
    }

    for start in MEMORIAL_PREFIXES {
        if let Some(rest) = wd.strip_prefix(start)
            && name_match_main(osm, rest, endings).is_some()
        {
            return Some(NameMatch::new(MatchKind::Trim, start.trim().to_lowercase()));
        }
    }

    if let Some(rest) = strip_prefix_ignore_case(osm, "site of")
        && name_match_main(rest, wd, endings).is_some()
    {
        return Some(NameMatch::new(MatchKind::Trim, "site of"));
    }

    if let Some(rest) = strip_suffix_ignore_case(wd, " and attached railings")
        && name_match_main(osm, rest, endings).is_some()
    {
        return Some(NameMatch::new(MatchKind::Trim, "and attached railings"));
    }

    for place_name in more_place_name_variants(place_names) {
        if !osm.contains(&place_name) && !wd.contains(&place_name) {
            continue;
        }
        if let Some(m) = name_match_main(
            &strip_place_name(osm, &place_name),
            &strip_place_name(wd, &place_name),
            endings,
        ) {
            return Some(m);
        }
    }

    if !osm.contains(';') {
        return None;
    }
    osm.split(';')
        .find_map(|part| name_match(part.trim(), wd, endings, place_names))
}

/// Name-like tags of a map feature, keyed by tag key.
///
/// Every key containing `name` counts except a few that hold street or
/// county names; `operator` is included too.
#[must_use]
pub fn get_names(tags: &TagMap) -> BTreeMap<String, String> {
    tags.iter()
        .filter(|(k, _)| (k.contains("name") && !BAD_NAME_FIELDS.contains(k)) || *k == "operator")
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn initials_match_other_entity_name(
    initials: &str,
    entity_names: &BTreeMap<&str, Vec<&NameCandidate>>,
) -> bool {
    entity_names
        .keys()
        .any(|w| *w != initials && initials_match(initials, w, &[]).is_some())
}

/// Removes the first case-insensitive occurrence of the operator.
fn strip_operator(name: &str, operator: &str) -> Option<String> {
    let lc = name.to_lowercase();
    if lc.len() != name.len() {
        return None;
    }
    let start = lc.find(operator)?;
    let end = start + operator.len();
    Some(format!("{}{}", name.get(..start)?, name.get(end..)?))
}

fn strip_operator_prefix<'a>(name: &'a str, operator: &str) -> Option<&'a str> {
    let lc = name.to_lowercase();
    if lc.len() != name.len() || !lc.starts_with(operator) {
        return None;
    }
    name.get(operator.len()..).map(str::trim_end)
}

/// Endings implied by the feature's `addr:city`: the city itself and the
/// city after `in`, `w`, `à`, `en`, `em`, `v`, `i` and `a`.
fn city_endings(city: &str) -> impl Iterator<Item = String> + '_ {
    std::iter::once(city.to_string()).chain(
        ["in", "w", "à", "en", "em", "v", "i", "a"]
            .into_iter()
            .map(move |word| format!("{word} {city}")),
    )
}

/// Compares every name-like tag of a feature with every entity name.
///
/// Returns tag key to the entity names it matched, with how and where each
/// entity name came from. When nothing matches directly, a map name made
/// of one entity name followed by another (`National Museum of Mathematics
/// (MoMath)`) is reported as [`MatchKind::Prefix`].
#[must_use]
pub fn check_for_match(
    tags: &TagMap,
    entity_names: &BTreeMap<&str, Vec<&NameCandidate>>,
    endings: &[String],
    place_names: &[String],
    trim_house: bool,
) -> BTreeMap<String, Vec<NameMatchDetail>> {
    let mut found: BTreeMap<String, Vec<NameMatchDetail>> = BTreeMap::new();

    let mut names = get_names(tags);
    if names.is_empty() || entity_names.is_empty() {
        return found;
    }

    let mut endings: BTreeSet<String> = endings.iter().cloned().collect();
    if trim_house {
        endings.insert("house".to_string());
    }

    let operator = names.get("operator").map(|o| o.to_lowercase());
    if let Some(operator) = &operator {
        let stripped: Vec<(String, String)> = names
            .iter()
            .filter_map(|(key, name)| {
                strip_operator(name, operator).map(|s| (format!("{key} strip operator"), s))
            })
            .filter(|(_, s)| s.chars().any(char::is_alphabetic))
            .collect();
        names.extend(stripped);
    }

    if let Some(city) = tags.get("addr:city") {
        endings.extend(city_endings(&city.to_lowercase()));
    }
    let endings: Vec<String> = endings.into_iter().collect();

    let mut cache: BTreeMap<(&str, &str), Option<MatchKind>> = BTreeMap::new();
    for (w, sources) in entity_names {
        for (osm_key, o) in &names {
            let kind = *cache.entry((o.as_str(), *w)).or_insert_with(|| {
                if let Some(m) = name_match(o, w, &endings, place_names) {
                    return Some(m.kind);
                }
                let rest = operator.as_deref().and_then(|op| strip_operator_prefix(o, op))?;
                name_match(rest, w, &endings, place_names)
                    .map(|m| m.kind)
                    .filter(|kind| !matches!(kind, MatchKind::BothTrimmed | MatchKind::WikidataTrimmed))
            });
            let Some(kind) = kind else {
                continue;
            };
            if kind == MatchKind::BothTrimmed && osm_key == "operator" {
                continue;
            }
            if kind == MatchKind::Initials && initials_match_other_entity_name(w, entity_names) {
                continue;
            }
            log::trace!("check_for_match: {osm_key}={o:?} matches {w:?} ({kind})");
            found.entry(osm_key.clone()).or_default().push(NameMatchDetail {
                kind,
                entity_name: (*w).to_string(),
                sources: sources.iter().map(|s| (*s).clone()).collect(),
            });
        }
    }
    if !found.is_empty() {
        return found;
    }

    for (w, sources) in entity_names {
        for (osm_key, o) in &names {
            let Some(left_over) = prefix_name_match(o, w) else {
                continue;
            };
            let rest_is_other_name = entity_names
                .keys()
                .filter(|second| *second != w)
                .any(|second| name_match(&left_over, second, &[], place_names).is_some());
            if rest_is_other_name {
                found.entry(osm_key.clone()).or_default().push(NameMatchDetail {
                    kind: MatchKind::Prefix,
                    entity_name: (*w).to_string(),
                    sources: sources.iter().map(|s| (*s).clone()).collect(),
                });
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use wikimatch_match_models::NameProvenance;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn kind(osm: &str, wd: &str, endings: &[&str]) -> Option<MatchKind> {
        name_match(osm, wd, &strings(endings), &[]).map(|m| m.kind)
    }

    fn matches(osm: &str, wd: &str, endings: &[&str]) -> bool {
        kind(osm, wd, endings).is_some()
    }

    fn label(text: &str) -> NameCandidate {
        NameCandidate::new(text, NameProvenance::Label, "en")
    }

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs.iter().copied().collect()
    }

    fn run_check(
        tag_pairs: &[(&str, &str)],
        entity_names: &[&str],
        endings: &[&str],
    ) -> BTreeMap<String, Vec<NameMatchDetail>> {
        let candidates: Vec<NameCandidate> = entity_names.iter().map(|n| label(n)).collect();
        let by_text: BTreeMap<&str, Vec<&NameCandidate>> = candidates
            .iter()
            .map(|c| (c.text.as_str(), vec![c]))
            .collect();
        check_for_match(&tags(tag_pairs), &by_text, &strings(endings), &[], true)
    }

    #[test]
    fn identical_and_case() {
        assert_eq!(kind("test", "test", &[]), Some(MatchKind::Exact));
        assert_eq!(kind("Test", "TEST", &[]), Some(MatchKind::CaseInsensitive));
        assert_eq!(kind("aaa bbb", "bbb aaa", &[]), Some(MatchKind::TermSet));
        assert_eq!(
            kind("Renaissance Center Tower 300", "Renaissance Center 300 Tower", &[]),
            Some(MatchKind::TermSet)
        );
    }

    #[test]
    fn empty_names_never_match() {
        assert!(!matches("", "", &[]));
        assert!(!matches("test", "", &[]));
        assert!(!matches("  ", "test", &[]));
        assert!(!matches("aaa", "the ", &[]));
    }

    #[test]
    fn symmetric_for_exact_rules() {
        for (a, b) in [("St Andrew", "Saint Andrew"), ("aaa bbb", "bbb aaa")] {
            assert_eq!(kind(a, b, &[]), kind(b, a, &[]));
        }
    }

    #[test]
    fn saint_abbreviation() {
        assert_eq!(kind("St Andrew", "Saint Andrew", &[]), Some(MatchKind::Normalized));
        assert!(matches("St Peter", "Saint Peter", &[]));
    }

    #[test]
    fn initials() {
        assert!(matches("TIAT", "This Is A Test", &[]));
        assert!(!matches("bad", "Bad Match Here", &[]));
        assert!(matches("Phillips Chapel CME Church", "Phillips Chapel Christian Methodist Episcopal Church", &[]));
        assert!(matches("City of Birmingham Symphony Orchestra", "CBSO Centre", &[]));
    }

    #[test]
    fn historic_suffix() {
        assert_eq!(
            kind("Boulder Railroad Depot (Historic)", "Boulder Railroad Depot", &[]),
            Some(MatchKind::CaseInsensitive)
        );
    }

    #[test]
    fn ordinal_names() {
        assert!(matches("3rd Avenue–149th Street", "3rd Avenue – 149th Street", &[]));
    }

    #[test]
    fn numbers_are_not_confused() {
        assert!(!matches("Manhattan Community Board 1", "Manhattan Community Board 11", &[]));
        assert!(!matches("5.", "5, High Street", &[]));
        assert!(!matches("1 & 2", "12, Downside", &[]));
    }

    #[test]
    fn words_removed() {
        assert_eq!(
            kind("Oxmoor Mall", "Oxmoor Center", &["mall", "center"]),
            Some(MatchKind::BothTrimmed)
        );
        assert_eq!(
            kind("Castle House", "The Castle Inn", &["house", "inn"]),
            Some(MatchKind::BothTrimmed)
        );
        assert!(matches("Sint Pieters Museum", "Museum Sint-Pieters", &["museum"]));
        assert!(matches(
            "Leeds Bradford International",
            "Leeds Bradford International Airport",
            &["airport", "international airport"]
        ));
        assert!(matches("Bresso", "Aeroporto di Bresso", &["aeroporto"]));
        assert!(matches("The Landers", "Landers Theatre", &["theatre"]));
        assert!(matches("Wabasca Indian Reserve #166", "Wabasca 166", &["Indian reserve"]));
    }

    #[test]
    fn plural_word_is_not_a_trimmed_match() {
        assert!(!matches("Boots", "The Boot Inn", &["inn"]));
        assert!(matches("Kirkwood Inn", "Kirkwood's", &["inn"]));
    }

    #[test]
    fn ending_before_at_is_not_dropped() {
        assert!(!matches("Nazeing Park", "Stable At Nazeing Park", &["stable"]));
    }

    #[test]
    fn trim_to_empty_is_no_match() {
        assert!(!matches("Hall", "Post Office", &["hall", "post office"]));
    }

    #[test]
    fn generic_endings() {
        assert_eq!(
            kind("Times Furnishing", "Times Furnishing Company Building", &[]),
            Some(MatchKind::Trim)
        );
        assert!(matches("Church building", "Church", &[]));
    }

    #[test]
    fn commas_and_places() {
        assert!(matches("Beulah", "Beulah, Powys", &[]));
        assert!(matches("Test", "Test, Washington, DC", &[]));
        assert!(matches("The Ship", "'The Ship', Derriford", &[]));
        assert!(matches("Lamott", "La Mott, Pennsylvania", &[]));
        assert!(matches("Maria-Hilf-Kirche", "Mariahilfkirche, Munich", &[]));
        assert!(matches("Tricketts Cross", "Trickett's Cross, Dorset", &[]));
    }

    #[test]
    fn articles_and_stop_words() {
        assert!(matches("Place Bellecour", " La Place Bellecour", &[]));
        assert!(matches("Boxers", "The Boxers", &[]));
        assert!(matches("Sliabh Liag", "Sliabh a Liag", &[]));
    }

    #[test]
    fn abbreviations() {
        assert!(matches("Rainbow Grocery Coop", "Rainbow Grocery Cooperative", &[]));
        assert!(matches("HEB Center @ Cedar Park", "H-E-B Center at Cedar Park", &[]));
        assert!(matches(
            "New York Skyports Incorporated Seaplane Base",
            "New York Skyports Inc. Seaplane Base",
            &[]
        ));
        assert!(matches("ESCOLA DE NAUTICA DE BARCELONA", "Escola de Nàutica de Barcelona", &[]));
    }

    #[test]
    fn church_names() {
        let church = ["church", "church of"];
        assert!(matches("St. Michael's Church", "Church Of St Michael", &church));
        assert!(matches("St Andrew", "St Andrew's Church", &church));
        assert!(matches("St. Paul's Roman Catholic Church", "St. Paul's Catholic Church", &[]));
        assert!(matches("Test Roman Catholic church", "Test RC church", &[]));
        assert!(matches("Church of Ss Peter and Paul", "St Peter and St Paul's Church", &church));
        assert!(matches("Michaelstow Church", "Michaelstow DSC 8243", &church));
        assert!(matches(
            "Saint Edmund and Saint George",
            "Church of St Edmund and George",
            &["church", "church of", "st"]
        ));
        assert!(matches(
            "Parish Church of St Mary",
            "St Mary the Virgin",
            &["parish church", "church"]
        ));
        assert!(matches(
            "St John the Evangelist parish church",
            "Parish Church of St John, the Evangelist",
            &["parish church", "parish", "church"]
        ));
        assert!(matches("St Mary and St Edmund", "Church of St Edmund and St Mary", &church));
        assert!(matches("Johannes der Täufer", "St. Johann der Täufer", &["st", "kirche"]));
    }

    #[test]
    fn possessive_and_plural() {
        assert!(matches("Augustine Steward House", "Augustine Steward's House", &[]));
        assert!(matches("Lombard Buildings", "Lombard Building", &["building"]));
        assert!(matches("Manor Buildings", "Manor House Buildings", &["house"]));
    }

    #[test]
    fn two_streets() {
        assert!(matches("Church and 18th Street", "Church Street & 18th Street", &[]));
        assert!(matches("Church and 18th Street", "Church Street & 18th Street", &["test"]));
        assert!(matches("St Peter & St Paul", "St Peter and St Paul, Bromley", &[]));
        assert!(match_two_streets("Church and Main", "Church Street", &[]).is_none());
    }

    #[test]
    fn fallback_rewrites() {
        assert!(matches("1-3 Rectory Cottages", "Rectory Cottages", &[]));
        assert!(matches("RGC – Rainbow Grocery Coop", "Rainbow Grocery Coop", &[]));
        assert!(matches("site of Pegwell Lodge", "Pegwell Lodge", &[]));
        assert!(matches("Old Mill", "Mill", &[]));
        assert_eq!(kind("Nelson", "Statue of Nelson", &[]), Some(MatchKind::Trim));
        assert!(matches("St John's Church", "St John's Church And Attached Railings", &[]));
        assert!(matches("Disneyland Pacific Hotel; Pacific Hotel", "Pacific Hotel", &[]));
    }

    #[test]
    fn place_names_are_dropped() {
        let places = strings(&["Manhattan", "New York City", "New York", "United States of America"]);
        assert!(name_match("Hungarian house", "Hungarian House of New York", &[], &places).is_some());
        let richmond = strings(&["Richmond City", "Virginia"]);
        assert!(name_match("Main Street Station", "Richmond Main Street Station", &[], &richmond).is_some());
        let oslo = strings(&["Oslo"]);
        assert!(name_match("Danmarks ambassade", "Danmarks ambassade i Oslo", &[], &oslo).is_some());
        let cleveland = strings(&["Cleveland", "Cuyahoga County", "Ohio"]);
        let m = name_match(
            "Saint Vitus Catholic Church",
            "St. Vitus's Church, Cleveland",
            &strings(&["church", "church of", "catholic church", "rc church"]),
            &cleveland,
        );
        assert_eq!(m.map(|m| m.kind), Some(MatchKind::BothTrimmed));
    }

    #[test]
    fn place_name_variants() {
        let variants = more_place_name_variants(&strings(&["New York City", "Kent County"]));
        assert!(variants.contains("New York"));
        assert!(variants.contains("Kent"));
        assert_eq!(strip_place_name("Embassy in Oslo", "Oslo"), "Embassy in ");
        assert_eq!(strip_place_name("Museum of London", "London"), "Museum");
    }

    #[test]
    fn prefix_match() {
        assert_eq!(
            prefix_name_match("National Museum of Mathematics (MoMath)", "National Museum of Mathematics"),
            Some("(MoMath)".to_string())
        );
        assert_eq!(prefix_name_match("Test", "Test"), None);
        assert_eq!(prefix_name_match("Other", "Test"), None);
    }

    #[test]
    fn names_from_tags() {
        let names = get_names(&tags(&[
            ("name", "Test"),
            ("name:left", "Left"),
            ("old_name", "Old"),
            ("operator", "Op"),
            ("amenity", "pub"),
        ]));
        assert_eq!(names.keys().collect::<Vec<_>>(), vec!["name", "old_name", "operator"]);
    }

    #[test]
    fn check_for_match_simple() {
        let found = run_check(&[("name", "test"), ("alt_name", "test")], &["test"], &[]);
        assert_eq!(found.len(), 2);
        assert_eq!(found["name"][0].kind, MatchKind::Exact);
        assert!(run_check(&[], &["test"], &[]).is_empty());
        assert!(run_check(&[("name", "test")], &[], &[]).is_empty());
    }

    #[test]
    fn check_for_match_with_city() {
        let found = run_check(
            &[("name", "test"), ("addr:city", "Rome")],
            &["test in Rome"],
            &[],
        );
        assert!(found.contains_key("name"));
    }

    #[test]
    fn check_for_match_initials_of_other_name() {
        let tag_pairs = [("name", "Burgers and Cupcakes")];
        assert!(run_check(&tag_pairs, &["Baryshnikov Arts Center", "BAC"], &[]).is_empty());
        assert!(!run_check(&tag_pairs, &["BAC"], &[]).is_empty());
    }

    #[test]
    fn check_for_match_prefix() {
        let found = run_check(
            &[("name", "National Museum of Mathematics (MoMath)")],
            &["National Museum of Mathematics", "Momath", "Museum of Mathematics"],
            &[],
        );
        let details = &found["name"];
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].kind, MatchKind::Prefix);
        assert_eq!(details[0].entity_name, "National Museum of Mathematics");
    }

    #[test]
    fn check_for_match_housename_and_previous_name() {
        let found = run_check(
            &[("name", "Westland London"), ("addr:housename", "St. Michael's Church")],
            &["Church Of St Michael"],
            &["church", "church of"],
        );
        assert_eq!(found["addr:housename"][0].kind, MatchKind::BothTrimmed);

        let found = run_check(
            &[("name", "Masjid Noor-Us-Sunnah"), ("previous_name", "Samson & Lion")],
            &["Samson And Lion Public House"],
            &["public house"],
        );
        assert_eq!(found["previous_name"][0].kind, MatchKind::WikidataTrimmed);
    }

    #[test]
    fn check_for_match_operator_stripped() {
        let found = run_check(
            &[("name", "Tesco Express Welling"), ("operator", "Tesco")],
            &["Express Welling"],
            &[],
        );
        assert!(found.contains_key("name strip operator"));
    }
}
