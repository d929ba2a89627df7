//! Initialism detection.
//!
//! Handles names written as the initials of another name (`TIAT` for
//! `This Is A Test`), names containing initials in place of some words
//! (`Phillips Chapel CME Church`) and names with a redundant initialism
//! before or after the full form (`RGC – Rainbow Grocery Coop`).

use wikimatch_match_models::{MatchKind, NameMatch};

use crate::normalize::{has_lower, has_upper, strip_non_char_start, strip_non_chars};

/// Connecting words that may or may not contribute an initial.
const FILTER_WORDS: [&str; 5] = ["of", "de", "di", "at", "i"];

/// Tests whether `n1` is the initials of `n2`.
///
/// Requires at least three initials and a three character `n1`. An
/// initialism followed by a droppable ending (`TIAT station`) matches as
/// [`MatchKind::InitialsTrim`].
#[must_use]
pub fn initials_match(n1: &str, n2: &str, endings: &[String]) -> Option<NameMatch> {
    let terms: Vec<&str> = n2
        .split_whitespace()
        .filter(|t| t.chars().next().is_some_and(char::is_alphanumeric))
        .collect();
    let initials: String = terms
        .iter()
        .filter_map(|t| t.chars().next())
        .flat_map(char::to_uppercase)
        .collect();

    if initials.chars().count() < 3 || n1.chars().count() < 3 {
        return None;
    }
    if initials == n1 {
        return Some(NameMatch::new(MatchKind::Initials, "initials"));
    }
    let n1_alnum: String = n1.chars().filter(|c| c.is_alphanumeric()).collect();
    if initials == n1_alnum {
        return Some(NameMatch::new(MatchKind::Initials, "initials"));
    }

    let n1_lc = n1.to_lowercase();
    for end in endings {
        let end_lc = end.to_lowercase();
        if !n1_lc.ends_with(&end_lc) || n1_lc.len() != n1.len() {
            continue;
        }
        if n1[..n1.len() - end_lc.len()].trim() == initials {
            return Some(NameMatch::new(MatchKind::InitialsTrim, "initials with ending"));
        }
    }

    let lc_terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
    for word in FILTER_WORDS {
        if !lc_terms.iter().any(|t| t == word) {
            continue;
        }
        let filtered = terms
            .iter()
            .zip(&lc_terms)
            .filter(|(_, lc)| *lc != word)
            .map(|(t, _)| *t)
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(m) = initials_match(n1, &filtered, &[]) {
            return Some(m);
        }
    }

    None
}

/// Stricter initials test used on fragments of a single name: the
/// candidate initialism must have no lowercase letters and at least two
/// uppercase ones.
#[must_use]
pub fn check_for_initials_match(initials: &str, name: &str) -> bool {
    if has_lower(initials) {
        return false;
    }
    if initials.chars().filter(|c| c.is_uppercase()).count() < 2 {
        return false;
    }
    initials_match(initials, name, &[]).is_some()
}

/// Removes an initialism from the start or end of a name when it spells
/// out the rest of the name.
///
/// Returns `None` when there is nothing to drop.
#[must_use]
pub fn drop_initials(name: &str) -> Option<&str> {
    let first_space = name.find(' ')?;
    let tail = strip_non_char_start(&name[first_space..]);
    if check_for_initials_match(&name[..first_space], tail) {
        return Some(tail);
    }

    let last_space = name.rfind(' ')?;
    if last_space == first_space {
        return None;
    }
    let head = strip_non_char_start(&name[..last_space]);
    check_for_initials_match(&name[last_space..], head).then_some(head)
}

/// Splits a name before every uppercase letter, dropping empty pieces.
#[must_use]
pub fn split_on_upper(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for (pos, c) in name.char_indices() {
        if !c.is_uppercase() {
            continue;
        }
        let text = name[start..pos].trim_end();
        if !text.is_empty() {
            parts.push(text);
        }
        start = pos;
    }
    let text = name[start..].trim_end();
    if !text.is_empty() {
        parts.push(text);
    }
    parts
}

fn split_on_upper_and_tidy(name: &str) -> Vec<String> {
    split_on_upper(name)
        .into_iter()
        .map(strip_non_chars)
        .filter(|p| !p.is_empty())
        .collect()
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(char::is_numeric)
}

fn first_char_is(part: &str, single: &str) -> bool {
    single.chars().count() == 1 && part.chars().next() == single.chars().next()
}

/// Name where some capitalized words are replaced by their initials:
/// `Phillips Chapel CME Church` and
/// `Phillips Chapel Christian Methodist Episcopal Church`.
#[must_use]
pub fn name_containing_initials(n1: &str, n2: &str) -> bool {
    if !has_upper(n1) || !has_upper(n2) {
        return false;
    }
    let n1_split = split_on_upper_and_tidy(n1);
    let n2_split = split_on_upper_and_tidy(n2);

    if n1_split.len() != n2_split.len() || n1_split.len() < 3 {
        const CENTRE_ENDINGS: [&str; 2] = [" centre", " center"];
        for end in CENTRE_ENDINGS {
            if let Some(trimmed) = strip_suffix_ignore_case(n1, end)
                && name_containing_initials(trimmed, n2)
            {
                return true;
            }
        }
        for end in CENTRE_ENDINGS {
            if let Some(trimmed) = strip_suffix_ignore_case(n2, end)
                && name_containing_initials(n1, trimmed)
            {
                return true;
            }
        }
        return false;
    }

    n1_split.iter().zip(&n2_split).all(|(part1, part2)| {
        if part1 == part2 {
            return true;
        }
        if is_digits(part1) || is_digits(part2) {
            return false;
        }
        first_char_is(part2, part1) || first_char_is(part1, part2)
    })
}

/// Strips an ASCII suffix compared case-insensitively.
pub(crate) fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let cut = s.len().checked_sub(suffix.len())?;
    let tail = s.get(cut..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..cut])
}

/// Strips an ASCII prefix compared case-insensitively.
pub(crate) fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}
