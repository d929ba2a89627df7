//! Canonical spellings and abbreviation tables.
//!
//! Replacements are applied in order to lowercase, ASCII-folded names on
//! both sides of a comparison, so "Saint Mary the Virgin" and "St Mary"
//! end up identical.

use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Ordered substring replacements applied by `tidy_name`.
///
/// Most patterns carry a leading space so they only fire on word starts.
pub static TIDY_REPLACEMENTS: &[(&str, &str)] = &[
    (" no. ", " number "),
    (" nr ", " number "),
    (" hosp ", " hospital "),
    (" rgnl ", " regional "),
    ("saint ", "st "),
    ("mount ", "mt "),
    (" mountain", " mtn"),
    (" county", " co"),
    (" church of england ", " ce "),
    (" cofe ", " ce "),
    (" c of e ", " ce "),
    (" @ ", " at "),
    (" roman catholic ", " rc "),
    (" catholic ", " rc "),
    (" helena", " helen"),
    (" laurence", " lawrence"),
    (" holy ascension", " ascension"),
    (" most holy trinity", " holy trinity"),
    (" nicolas", " nicholas"),
    (" anne", " ann"),
    (" ethelreda", " etheldreda"),
    (" mary magdalene", " mary magdalen"),
    (" mary magdelene", " mary magdalen"),
    (" mary the virgin", " mary"),
    (" blessed virgin mary", " st mary"),
    (" nativity of the blessed virgin mary", " st mary"),
    (" margaret the queen", " margaret"),
    (" john the baptist", " john"),
    (" john the evangelist", " john"),
    (" john, the evangelist", " john"),
    (" john, apostle and evangelist", " john"),
    (" john the divine", " john"),
    (" michael the archangel", " michael"),
    (" luke the evangelist,", " luke"),
    (" giles the abbot", " giles"),
    (" andrew the apostle", " andrew"),
    (" peter the apostle", " peter"),
    (" thomas the apostle", " thomas"),
    (" lawrence the martyr", " lawrence"),
    (" alban the martyr", " alban"),
    (" egelwin the martyr", " egelwin"),
    (" nicholas the confessor", " nicholas"),
    (" edward the confessor", " edward"),
    (" edward the martyr", " edward"),
    (" edmund king and martyr", " edmund"),
    (" gregory the great", " gregory"),
    (" james the great", " james"),
    (" james the less", " james"),
    (" james the apostle", " james"),
    (" bartholemew", " bartholomew"),
    (" preparatory school", " prep school"),
    (" incorporated", " inc"),
    (" cooperative", " coop"),
    (" co-operative", " coop"),
    (" hotel and country club", " hotel"),
    (" hotel and spa", " hotel"),
    (" missionary baptist", " baptist"),
    (" thomas a becket", " thomas becket"),
    (" thomas of canterbury", " thomas becket"),
];

/// British/American spelling pairs, applied last.
pub static SPELLING_PAIRS: &[(&str, &str)] = &[("center", "centre"), ("theater", "theatre")];

/// Road type words and their postal abbreviations.
pub static ROAD_TYPES: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("avenue", "ave"),
        ("street", "st"),
        ("road", "rd"),
        ("boulevard", "blvd"),
        ("drive", "dr"),
        ("lane", "ln"),
        ("square", "sq"),
    ])
});

/// Compass directions and their abbreviations.
pub static DIRECTIONS: LazyLock<BTreeMap<&'static str, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ("north", "n"),
        ("south", "s"),
        ("east", "e"),
        ("west", "w"),
        ("northwest", "nw"),
        ("northeast", "ne"),
        ("southwest", "sw"),
        ("southeast", "se"),
    ])
});

/// Abbreviation for a road type or direction word, if it has one.
#[must_use]
pub fn abbreviation(word: &str) -> Option<&'static str> {
    let lc = word.to_lowercase();
    ROAD_TYPES
        .get(lc.as_str())
        .or_else(|| DIRECTIONS.get(lc.as_str()))
        .copied()
}

/// Latin letters with no canonical decomposition to ASCII.
pub static ASCII_FOLDS: LazyLock<BTreeMap<char, &'static str>> = LazyLock::new(|| {
    BTreeMap::from([
        ('ß', "ss"),
        ('æ', "ae"),
        ('Æ', "AE"),
        ('ø', "o"),
        ('Ø', "O"),
        ('œ', "oe"),
        ('Œ', "OE"),
        ('đ', "d"),
        ('Đ', "D"),
        ('ł', "l"),
        ('Ł', "L"),
        ('þ', "th"),
        ('Þ', "TH"),
        ('ı', "i"),
        ('‘', "'"),
        ('’', "'"),
        ('–', "-"),
        ('—', "-"),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abbreviation_lookup_is_case_insensitive() {
        assert_eq!(abbreviation("Avenue"), Some("ave"));
        assert_eq!(abbreviation("NORTHWEST"), Some("nw"));
        assert_eq!(abbreviation("plaza"), None);
    }

    #[test]
    fn church_variants_listed_before_generic_saint_names() {
        let pos = |needle: &str| {
            TIDY_REPLACEMENTS
                .iter()
                .position(|(from, _)| *from == needle)
                .unwrap()
        };
        assert!(pos(" church of england ") < pos(" catholic "));
        assert!(pos(" roman catholic ") < pos(" catholic "));
    }
}
