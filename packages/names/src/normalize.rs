//! Name normalization primitives.
//!
//! Every function here is pure and applied symmetrically to both names
//! under comparison.

use std::sync::LazyLock;

use regex::{Captures, Regex};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::{numerals, synonyms};

/// Characters other than word characters, `@` and `-`.
static NON_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-@\w]").expect("valid regex"));

/// Characters other than word characters and `@`.
static NON_CHARS_AND_DASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^@\w]").expect("valid regex"));

static NON_CHAR_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\w]*").expect("valid regex"));

static NON_LETTER_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[^A-Z]+").expect("valid regex"));

/// `5th`, `21 st`, `3RD`.
pub static ORDINAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([0-9]+) ?(?:st|nd|rd|th)\b").expect("valid regex"));

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[0-9]+").expect("valid regex"));

/// Trailing plural `s`/`es`, keeping the character before it.
static PLURAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(.)e?s+\b").expect("valid regex"));

static ARTICLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\W*)(?:the|le|la|les)[- ]").expect("valid regex"));

/// Words dropped by [`strip_words`] when surrounded by the same separator.
const STOP_WORDS: [&str; 13] = [
    "the", "and", "a", "an", "at", "of", "de", "di", "le", "la", "les", "von", "pw.",
];

/// Folds a string to ASCII where a Latin decomposition exists.
///
/// Accents are removed via canonical decomposition; a handful of letters
/// without one (`ß`, `ø`, `ł`, ...) use a lookup table. Other scripts are
/// left untouched.
#[must_use]
pub fn fold_ascii(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.nfkd() {
        if is_combining_mark(c) {
            continue;
        }
        match synonyms::ASCII_FOLDS.get(&c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

/// Removes everything but word characters, `@` and `-`.
#[must_use]
pub fn strip_non_chars(s: &str) -> String {
    NON_CHARS_RE.replace_all(s, "").into_owned()
}

/// Removes everything but word characters and `@`.
#[must_use]
pub fn strip_non_chars_and_dash(s: &str) -> String {
    NON_CHARS_AND_DASH_RE.replace_all(s, "").into_owned()
}

/// Both names are non-empty and equal once punctuation is removed.
#[must_use]
pub fn strip_non_chars_match(osm: &str, wd: &str, strip_dash: bool) -> bool {
    let (a, b) = if strip_dash {
        (strip_non_chars_and_dash(osm), strip_non_chars_and_dash(wd))
    } else {
        (strip_non_chars(osm), strip_non_chars(wd))
    };
    !a.is_empty() && a == b
}

#[must_use]
pub fn strip_non_char_start(s: &str) -> &str {
    NON_CHAR_START_RE
        .find(s)
        .map_or(s, |m| &s[m.end()..])
}

/// Drops everything before the first ASCII letter.
#[must_use]
pub fn strip_non_letter_start(s: &str) -> &str {
    NON_LETTER_START_RE
        .find(s)
        .map_or(s, |m| &s[m.end()..])
}

/// Rewrites `5th` as `fifth`.
#[must_use]
pub fn ordinal_to_words(name: &str) -> String {
    ORDINAL_RE
        .replace_all(name, |caps: &Captures| {
            caps[1]
                .parse::<u64>()
                .map_or_else(|_| caps[0].to_string(), numerals::ordinal)
        })
        .into_owned()
}

/// Rewrites every run of digits as cardinal words.
#[must_use]
pub fn digits_to_words(name: &str) -> String {
    DIGITS_RE
        .replace_all(name, |caps: &Captures| {
            caps[0]
                .parse::<u64>()
                .map_or_else(|_| caps[0].to_string(), numerals::cardinal)
        })
        .into_owned()
}

/// Canonical form of a lowercase name.
///
/// Folds to ASCII, canonicalizes saint, church and abbreviation variants,
/// drops possessive and plural endings and unifies British/American
/// spellings. Leading articles are kept; see [`drop_article`].
#[must_use]
pub fn tidy_name(name: &str) -> String {
    let folded = fold_ascii(name);
    let mut n = folded.trim().trim_end_matches('\'').to_string();

    for (from, to) in synonyms::TIDY_REPLACEMENTS {
        if n.contains(from) {
            n = n.replace(from, to);
        }
    }

    if let Some(stripped) = n.strip_suffix("'s") {
        n = stripped.to_string();
    }

    if n.chars().any(|c| c.is_alphabetic() && c != 's') {
        n = PLURAL_RE.replace_all(&n, "$1").into_owned();
    }

    n = n.replace("ss", "s");

    for (from, to) in synonyms::SPELLING_PAIRS {
        n = n.replace(from, to);
    }
    n
}

/// Removes a leading `the`, `le`, `la` or `les`.
#[must_use]
pub fn drop_article(name: &str) -> String {
    ARTICLE_RE.replacen(name, 1, "$1").into_owned()
}

/// Removes stop words that sit between two identical separators.
///
/// `rio de la tetta` becomes `rio tetta`; `walton-on-the-hill` becomes
/// `walton-on-hill`. The trailing separator is kept so consecutive stop
/// words are all removed.
#[must_use]
pub fn strip_words(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut i = 0;

    'outer: while i < name.len() {
        let Some(c) = name[i..].chars().next() else {
            break;
        };
        if c == ' ' || c == '-' {
            let rest = &name[i + 1..];
            for word in STOP_WORDS {
                if rest.starts_with(word) && rest[word.len()..].starts_with(c) {
                    out.push(c);
                    i += 1 + word.len();
                    continue 'outer;
                }
            }
        }
        out.push(c);
        i += c.len_utf8();
    }

    out
}

/// Reduces an address-like name to lowercase word characters.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let name = ordinal_to_words(name).replace(" bij ", "");
    strip_non_chars(&name.to_lowercase())
}

/// Strips scheme, `www.` and trailing slashes from a URL.
#[must_use]
pub fn normalize_url(url: &str) -> &str {
    let mut url = url;
    for start in ["http://", "https://", "www."] {
        url = url.strip_prefix(start).unwrap_or(url);
    }
    url.trim_end_matches('/')
}

#[must_use]
pub fn has_upper(s: &str) -> bool {
    s.chars().any(char::is_uppercase)
}

#[must_use]
pub fn has_lower(s: &str) -> bool {
    s.chars().any(char::is_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tidy_name_saint_possessive() {
        assert_eq!(tidy_name("no change"), "no change");
        assert_eq!(tidy_name("saint andrew's"), "st andrew");
        assert_eq!(tidy_name(" ? "), "?");
        assert_eq!(tidy_name(" s "), "s");
    }

    #[test]
    fn tidy_name_plurals() {
        assert_eq!(tidy_name("four crosses"), "four cros");
        assert_eq!(tidy_name("four crosses, powys"), "four cros, powy");
    }

    #[test]
    fn tidy_name_folds_accents() {
        assert_eq!(tidy_name("escola de nàutica"), "escola de nautica");
        assert_eq!(tidy_name("straße"), "strase");
    }

    #[test]
    fn drop_article_keeps_leading_punctuation() {
        assert_eq!(drop_article("the old shop"), "old shop");
        assert_eq!(drop_article("'the ship'"), "'ship'");
        assert_eq!(drop_article("theatre"), "theatre");
    }

    #[test]
    fn strip_words_consecutive() {
        assert_eq!(strip_words("rio de la tetta"), "rio tetta");
        assert_eq!(strip_words("walton-on-the-hill"), "walton-on-hill");
        assert_eq!(strip_words("the end"), "the end");
    }

    #[test]
    fn ordinals_become_words() {
        assert_eq!(
            ordinal_to_words("3rd Avenue–149th Street"),
            "third Avenue–one hundred and forty-ninth Street"
        );
        assert_eq!(ordinal_to_words("Stadium"), "Stadium");
    }

    #[test]
    fn normalize_name_examples() {
        assert_eq!(normalize_name("TEST TEST"), "testtest");
        assert_eq!(normalize_name("testtest"), "testtest");
        assert_eq!(normalize_name("1st Street"), "firststreet");
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_url("https://www.test.org/"), "test.org");
        assert_eq!(normalize_url("http://test.org"), "test.org");
    }

    #[test]
    fn non_letter_start() {
        assert_eq!(strip_non_letter_start("1-3 Rectory Cottages"), "Rectory Cottages");
        assert_eq!(strip_non_char_start(" – Rainbow"), "Rainbow");
    }
}
