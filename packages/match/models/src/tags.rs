//! Typed tag containers.
//!
//! Map features carry an ordered `key -> value` mapping with unique keys,
//! and knowledge-base entities carry a set of tag criteria, each either a
//! bare key (`building`) or a `key=value` pair (`amenity=school`).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Tag criteria too generic or too numerous to search for.
pub const SKIP_TAGS: [&str; 15] = [
    "route:road",
    "route=road",
    "highway=primary",
    "highway=road",
    "highway=service",
    "highway=motorway",
    "highway=trunk",
    "highway=unclassified",
    "highway",
    "landusename",
    "website",
    "addr:street",
    "type=associatedStreet",
    "type=waterway",
    "waterway=river",
];

/// Ordered tag mapping of a map feature. Keys are unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagMap(BTreeMap<String, String>);

impl TagMap {
    /// Creates an empty tag map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a tag, replacing any existing value for the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Removes a tag, returning its value if it was present.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns `true` when `key` is present and one of its `;`-separated
    /// values equals `value`.
    #[must_use]
    pub fn has(&self, key: &str, value: &str) -> bool {
        self.values(key).contains(&value)
    }

    /// Splits a multi-valued tag (`a;b;c`) into its trimmed parts.
    #[must_use]
    pub fn values(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|v| v.split(';').map(str::trim).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single tag criterion: a bare key or a `key=value` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion<'a> {
    /// Any value for this key.
    Key(&'a str),
    /// This exact key and value.
    KeyValue(&'a str, &'a str),
}

impl<'a> Criterion<'a> {
    /// Parses `amenity=school` or `building`.
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        raw.split_once('=')
            .map_or(Self::Key(raw), |(k, v)| Self::KeyValue(k, v))
    }

    #[must_use]
    pub const fn key(&self) -> &'a str {
        match self {
            Self::Key(k) | Self::KeyValue(k, _) => k,
        }
    }
}

/// Set of tag criteria an entity may be mapped with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagCriteria(BTreeSet<String>);

impl TagCriteria {
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn insert(&mut self, criterion: impl Into<String>) -> bool {
        self.0.insert(criterion.into())
    }

    #[must_use]
    pub fn contains(&self, criterion: &str) -> bool {
        self.0.contains(criterion)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub const fn as_set(&self) -> &BTreeSet<String> {
        &self.0
    }

    /// Iterates the criteria in parsed form.
    pub fn parsed(&self) -> impl Iterator<Item = Criterion<'_>> {
        self.0.iter().map(|c| Criterion::parse(c))
    }

    /// Returns `true` when any criterion uses `key`, with or without a value.
    #[must_use]
    pub fn has_key(&self, key: &str) -> bool {
        self.parsed().any(|c| c.key() == key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TagCriteria {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for TagCriteria {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}
