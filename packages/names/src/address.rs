//! Address evidence.
//!
//! A map feature's `addr:*` tags are compared with entity names that look
//! like street addresses (`12 Station Road`, `Nos 12-14 Station Road`,
//! `3 Basztowa street in Kraków`) and with the entity's article extract.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex, RegexBuilder};
use wikimatch_match_models::TagMap;

use crate::normalize::normalize_name;
use crate::synonyms::{self, DIRECTIONS, ROAD_TYPES};

/// Tri-state outcome of an address comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMatch {
    /// The entity names an address equal to the feature's.
    Match,
    /// The entity names an address and it differs from the feature's.
    Mismatch,
    /// Not enough information to decide either way.
    Unknown,
}

static NUMBER_START_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:House at )?(?:(?:Number|No)s?\.? )?([0-9][-0-9]*,? .*)$").expect("valid regex")
});

static UK_POSTCODE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z][a-z][0-9]+[a-z]?$").expect("valid regex"));

/// Number range or list ending just before an address: `27–29 `, `135 and `.
static RANGE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+ ?(?:[-–+&]|and) ?$").expect("valid regex"));

fn abbreviation_words() -> String {
    ROAD_TYPES
        .keys()
        .chain(DIRECTIONS.keys())
        .copied()
        .collect::<Vec<_>>()
        .join("|")
}

/// A road type or direction word.
static ABBR_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", abbreviation_words())).expect("valid regex")
});

/// A normalized address ending in a road type, direction or `plaza`.
static ADDRESS_COMMON_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^(.+)({}|plaza)$", abbreviation_words())).expect("valid regex")
});

/// The feature carries a house number or a full address.
#[must_use]
pub fn has_address(tags: &TagMap) -> bool {
    tags.contains_key("addr:housenumber") || tags.contains_key("addr:full")
}

fn address_in_extract(address: &str, extract: &str) -> bool {
    let escaped = regex::escape(address);
    let pattern = ABBR_WORD_RE.replace_all(&escaped, |caps: &Captures| {
        let word = &caps[1];
        synonyms::abbreviation(word).map_or_else(
            || word.to_string(),
            |abbr| format!(r"(?:{word}|{abbr}\.?)"),
        )
    });

    let Ok(re) = RegexBuilder::new(&format!(r"\b{pattern}"))
        .case_insensitive(true)
        .build()
    else {
        log::debug!("unusable address pattern for {address:?}");
        return false;
    };

    let no_commas = extract.replace(',', "");
    for text in [extract, no_commas.as_str()] {
        if let Some(m) = re.find(text) {
            return !RANGE_START_RE.is_match(&text[..m.start()]);
        }
    }
    false
}

/// The feature's street address appears in the entity's article extract,
/// allowing for abbreviated road types and directions and rejecting
/// occurrences inside a number range.
#[must_use]
pub fn check_for_address_in_extract(tags: &TagMap, extract: &str) -> bool {
    if extract.is_empty() || !has_address(tags) {
        return false;
    }

    if let (Some(number), Some(street)) = (tags.get("addr:housenumber"), tags.get("addr:street"))
        && address_in_extract(&format!("{number} {street}"), extract)
    {
        return true;
    }

    tags.get("addr:full")
        .is_some_and(|full| address_in_extract(full, extract))
}

/// Name holds a house number, but not at the start: `Basztowa 3`.
fn name_contains_housenumber(name: &str) -> bool {
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    let terms: Vec<&str> = name.split_whitespace().collect();
    terms.len() > 1
        && terms[1..]
            .iter()
            .any(|t| t.starts_with(|c: char| c.is_ascii_digit()))
}

/// `"12 Station Road WC2"` into `("12 Station Road", "WC2")`.
fn split_last_word(s: &str) -> (&str, &str) {
    s.rsplit_once(' ').unwrap_or(("", s))
}

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// Compares the feature's address tags with address-like entity names.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn check_name_matches_address(tags: &TagMap, entity_names: &[&str]) -> AddressMatch {
    if !has_address(tags) {
        return AddressMatch::Unknown;
    }

    let mut number_start: BTreeSet<String> = entity_names
        .iter()
        .filter(|name| !name.to_lowercase().ends_with(" building"))
        .filter_map(|name| NUMBER_START_RE.captures(name))
        .map(|caps| caps[1].to_string())
        .collect();

    let number_end: BTreeSet<&str> = entity_names
        .iter()
        .copied()
        .filter(|name| name_contains_housenumber(name))
        .collect();

    if number_start.is_empty() && number_end.is_empty() {
        return AddressMatch::Unknown;
    }

    if let (Some(street), Some(number), Some(postcode), Some(city)) = (
        tags.get("addr:street"),
        tags.get("addr:housenumber"),
        tags.get("addr:postcode"),
        tags.get("addr:city"),
    ) {
        let full = format!("{street} {number}, {postcode} {city}");
        if entity_names.contains(&full.as_str()) {
            return AddressMatch::Match;
        }
    }

    let strip_comma: Vec<String> = number_start
        .iter()
        .filter_map(|name| name.rfind(',').map(|i| name[..i].to_string()))
        .filter(|n| !is_all_digits(n))
        .collect();
    number_start.extend(strip_comma);

    let norm_number_start: BTreeSet<String> =
        number_start.iter().map(|n| normalize_name(n)).collect();
    let norm_number_end: BTreeSet<String> =
        number_end.iter().map(|n| normalize_name(n)).collect();

    let postcode = tags.get("addr:postcode").map(str::to_lowercase);
    let city = tags.get("addr:city");

    if let (Some(number), Some(street)) = (tags.get("addr:housenumber"), tags.get("addr:street")) {
        let norm_osm_address = normalize_name(&format!("{number} {street}"));
        if norm_number_start.contains(&norm_osm_address) {
            return AddressMatch::Match;
        }

        if let Some(city) = city {
            let street_in = format!(" street in {city}");
            let found = number_start.iter().any(|name| {
                name.strip_suffix(&street_in)
                    .is_some_and(|n| normalize_name(n) == norm_osm_address)
            });
            if found {
                return AddressMatch::Match;
            }
        }

        if norm_number_end.contains(&normalize_name(&format!("{street} {number}"))) {
            return AddressMatch::Match;
        }

        if let Some(city) = city
            && norm_number_end.contains(&normalize_name(&format!("{street} {number} {city}")))
        {
            return AddressMatch::Match;
        }

        for name in &number_start {
            let (head, postcode_start) = split_last_word(name);
            if let Some(postcode) = &postcode
                && !postcode.starts_with(&postcode_start.to_lowercase())
            {
                continue;
            }
            if UK_POSTCODE_START_RE.is_match(postcode_start)
                && normalize_name(head) == norm_osm_address
            {
                return AddressMatch::Match;
            }
        }

        if norm_number_start
            .iter()
            .any(|n| n.starts_with(&norm_osm_address) || norm_osm_address.starts_with(n.as_str()))
        {
            return AddressMatch::Unknown;
        }

        if let Some(caps) = ADDRESS_COMMON_END_RE.captures(&norm_osm_address) {
            let short = &caps[1];
            if norm_number_start.iter().any(|n| n.starts_with(short)) {
                return AddressMatch::Unknown;
            }
        }
    }

    if let Some(full) = tags.get("addr:full") {
        let osm_address = normalize_name(full);
        if norm_number_start
            .iter()
            .any(|n| osm_address.starts_with(n.as_str()))
        {
            return AddressMatch::Match;
        }

        for name in &number_start {
            let (head, postcode_start) = split_last_word(name);
            if UK_POSTCODE_START_RE.is_match(postcode_start) && normalize_name(head) == osm_address
            {
                return AddressMatch::Match;
            }
        }
    }

    if number_start.is_empty() {
        return AddressMatch::Unknown;
    }

    // A feature named exactly like the entity's address-style name gets the
    // benefit of the doubt.
    let named_like_address = tags
        .get("name")
        .is_some_and(|name| number_start.contains(name));

    if named_like_address {
        AddressMatch::Unknown
    } else {
        AddressMatch::Mismatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs.iter().copied().collect()
    }

    #[test]
    fn has_address_needs_number_or_full() {
        assert!(!has_address(&TagMap::new()));
        assert!(has_address(&tags(&[("addr:full", "1 Station Road")])));
        assert!(has_address(&tags(&[("addr:housenumber", "1")])));
    }

    #[test]
    fn number_first_names() {
        let t = tags(&[("addr:housenumber", "12"), ("addr:street", "Station Road")]);
        assert_eq!(check_name_matches_address(&t, &["12 Station Road"]), AddressMatch::Match);
        assert_eq!(check_name_matches_address(&t, &["12, Station Road"]), AddressMatch::Match);
        assert_eq!(
            check_name_matches_address(&t, &["Number 12 Station Road"]),
            AddressMatch::Match
        );
        assert_eq!(check_name_matches_address(&TagMap::new(), &[]), AddressMatch::Unknown);
    }

    #[test]
    fn number_ranges() {
        let t = tags(&[("addr:housenumber", "12-14"), ("addr:street", "Station Road")]);
        assert_eq!(
            check_name_matches_address(&t, &["Nos 12-14 Station Road"]),
            AddressMatch::Match
        );
        assert_eq!(check_name_matches_address(&t, &["Station Road"]), AddressMatch::Unknown);
    }

    #[test]
    fn full_address_tag() {
        let t = tags(&[("addr:full", "12 Station Road")]);
        assert_eq!(check_name_matches_address(&t, &["12 Station Road"]), AddressMatch::Match);
        let t = tags(&[("addr:full", "Station Road")]);
        assert_eq!(
            check_name_matches_address(&t, &["12 Station Road"]),
            AddressMatch::Mismatch
        );
    }

    #[test]
    fn street_in_city() {
        let t = tags(&[
            ("addr:city", "Kraków"),
            ("addr:housenumber", "3"),
            ("addr:postcode", "31-134"),
            ("addr:street", "Basztowa"),
        ]);
        assert_eq!(
            check_name_matches_address(&t, &["3 Basztowa street in Kraków"]),
            AddressMatch::Match
        );
        assert_eq!(
            check_name_matches_address(&t, &["4 Basztowa street in Kraków"]),
            AddressMatch::Mismatch
        );
    }

    #[test]
    fn ordinal_street_names() {
        let t = tags(&[
            ("name", "1000 Second Avenue"),
            ("addr:housenumber", "1000"),
            ("addr:street", "2nd Avenue"),
            ("addr:city", "Seattle"),
            ("addr:postcode", "98104"),
        ]);
        assert_eq!(
            check_name_matches_address(&t, &["1000 Second Avenue"]),
            AddressMatch::Match
        );
    }

    #[test]
    fn partial_street_is_unknown() {
        let t = tags(&[
            ("name", "100 East Wisconsin"),
            ("addr:street", "East Wisconsin Avenue"),
            ("addr:city", "Milwaukee"),
            ("addr:postcode", "53202"),
            ("addr:housenumber", "100"),
        ]);
        assert_eq!(
            check_name_matches_address(&t, &["100 East Wisconsin"]),
            AddressMatch::Unknown
        );

        let t = tags(&[
            ("addr:street", "Poydras Street"),
            ("name", "Eni Building"),
            ("addr:housenumber", "1250"),
        ]);
        assert_ne!(
            check_name_matches_address(&t, &["1250 Poydras Plaza", "Mobil Building", "Eni Building"]),
            AddressMatch::Mismatch
        );
    }

    #[test]
    fn uk_postcode_suffix() {
        let names = ["12, Buckingham Street Wc2"];
        let t = tags(&[("addr:housenumber", "12"), ("addr:street", "Buckingham Street")]);
        assert_eq!(check_name_matches_address(&t, &names), AddressMatch::Match);

        let t = tags(&[
            ("addr:housenumber", "12"),
            ("addr:street", "Buckingham Street"),
            ("addr:postcode", "WC2N 6DF"),
        ]);
        assert_eq!(check_name_matches_address(&t, &names), AddressMatch::Match);

        let t = tags(&[
            ("addr:housenumber", "12"),
            ("addr:street", "Buckingham Street"),
            ("addr:postcode", "EC1X 1AA"),
        ]);
        assert_ne!(check_name_matches_address(&t, &names), AddressMatch::Match);

        let t = tags(&[("addr:full", "12 Buckingham Street")]);
        assert_eq!(check_name_matches_address(&t, &names), AddressMatch::Match);
    }

    #[test]
    fn extract_with_abbreviations() {
        let t = tags(&[("addr:street", "Station Road"), ("addr:housenumber", "10")]);
        assert!(check_for_address_in_extract(
            &t,
            "Test House, located at 10 Station Road is a test."
        ));

        let t = tags(&[
            ("addr:street", "East Tropicana Avenue"),
            ("addr:housenumber", "1610"),
        ]);
        assert!(check_for_address_in_extract(
            &t,
            "It is located at 1610 E Tropicana Ave."
        ));

        let t = tags(&[
            ("addr:street", "Wisconsin Avenue Northwest"),
            ("addr:housenumber", "1264"),
        ]);
        assert!(check_for_address_in_extract(
            &t,
            "Martin's is located at 1264 Wisconsin Avenue, NW in the Georgetown neighborhood."
        ));
    }

    #[test]
    fn extract_rejects_other_numbers_and_ranges() {
        let t = tags(&[("addr:street", "West 43rd Street"), ("addr:housenumber", "4")]);
        assert!(!check_for_address_in_extract(
            &t,
            "located on the third floor of 29-33 West 42nd Street (also 34 West 43rd Street)"
        ));

        let t = tags(&[("addr:street", "2nd Avenue"), ("addr:housenumber", "137")]);
        assert!(!check_for_address_in_extract(
            &t,
            "two adjoining historic buildings located at 135 and 137 2nd Avenue"
        ));

        let t = tags(&[("addr:street", "Queen Square"), ("addr:housenumber", "29")]);
        assert!(!check_for_address_in_extract(
            &t,
            "an historic house situated at 27–29 Queen Square, Bristol, England."
        ));
    }
}
