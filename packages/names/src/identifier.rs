//! External identifier evidence.

use std::collections::BTreeMap;

use wikimatch_match_models::{IdentifierClaim, TagMap};

use crate::normalize::normalize_url;

fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn value_matches(osm_value: &str, claim: &IdentifierClaim) -> bool {
    let compact_osm = osm_value.replace(' ', "");

    for value in &claim.values {
        if osm_value == value || compact_osm == value.replace(' ', "") {
            return true;
        }
        if claim.label == "website" && normalize_url(osm_value) == normalize_url(value) {
            return true;
        }
        if is_all_digits(osm_value)
            && is_all_digits(value)
            && osm_value.parse::<u128>().ok() == value.parse::<u128>().ok()
        {
            return true;
        }
    }
    false
}

/// Finds map tags holding one of the entity's external identifiers.
///
/// Values are compared ignoring spaces, website URLs ignoring scheme,
/// `www.` and trailing slashes, and all-digit values numerically. Returns
/// identifier label to the matching map values; empty when nothing matched.
#[must_use]
pub fn check_identifier(tags: &TagMap, identifiers: &[IdentifierClaim]) -> BTreeMap<String, Vec<String>> {
    let mut found: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for claim in identifiers {
        for key in &claim.osm_keys {
            let Some(osm_value) = tags.get(key) else {
                continue;
            };
            if value_matches(osm_value, claim) {
                let values = found.entry(claim.label.clone()).or_default();
                if !values.iter().any(|v| v == osm_value) {
                    values.push(osm_value.to_string());
                }
            }
        }
    }

    found
}
