#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Area and chunk types.
//!
//! An [`Area`] is the region being processed together with its persisted
//! pipeline state. Large areas are split into [`Chunk`]s, each identified
//! by a [`ChunkId`] that maps one-to-one onto a cached result file.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use wikimatch_match_models::{Coordinate, OsmType};

/// A geographic bounding box in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude boundary.
    pub west: f64,
    /// Southern latitude boundary.
    pub south: f64,
    /// Eastern longitude boundary.
    pub east: f64,
    /// Northern latitude boundary.
    pub north: f64,
}

impl BoundingBox {
    /// Creates a new bounding box from the given coordinates.
    #[must_use]
    pub const fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Longitude span in degrees.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Latitude span in degrees.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    #[must_use]
    pub fn center(&self) -> Coordinate {
        Coordinate::new(
            f64::midpoint(self.south, self.north),
            f64::midpoint(self.west, self.east),
        )
    }

    /// Inclusive containment test.
    #[must_use]
    pub fn contains(&self, point: Coordinate) -> bool {
        (self.south..=self.north).contains(&point.lat) && (self.west..=self.east).contains(&point.lon)
    }

    /// Area in square degrees; used for overlap arithmetic, not distances.
    #[must_use]
    pub fn degree_area(&self) -> f64 {
        self.width() * self.height()
    }
}

/// Identity of an area: the map element its boundary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AreaId {
    pub osm_type: OsmType,
    pub osm_id: i64,
}

impl AreaId {
    #[must_use]
    pub const fn new(osm_type: OsmType, osm_id: i64) -> Self {
        Self { osm_type, osm_id }
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.osm_type, self.osm_id)
    }
}

/// Persisted lifecycle state of an area.
///
/// The main line is `new -> entity-list-loaded -> tags-enriched ->
/// data-fetched -> bulk-loaded -> ready`. `fetch-error` and
/// `fetch-timeout` resume at the fetch stage; `refresh` restarts from
/// scratch after clearing cached data.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AreaState {
    #[default]
    New,
    EntityListLoaded,
    TagsEnriched,
    DataFetched,
    BulkLoaded,
    Ready,
    FetchError,
    FetchTimeout,
    Refresh,
}

impl AreaState {
    /// Position on the main line; side states map to the stage they
    /// resume from.
    #[must_use]
    pub const fn progress(self) -> u8 {
        match self {
            Self::New | Self::Refresh => 0,
            Self::EntityListLoaded => 1,
            Self::TagsEnriched | Self::FetchError | Self::FetchTimeout => 2,
            Self::DataFetched => 3,
            Self::BulkLoaded => 4,
            Self::Ready => 5,
        }
    }

    /// Returns `true` when the stage that produces `stage` has already
    /// completed.
    #[must_use]
    pub const fn has_reached(self, stage: Self) -> bool {
        self.progress() >= stage.progress()
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// The geographic region being processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    /// Stable numeric id used for file and table names.
    pub place_id: i64,
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub display_name: String,
    pub bbox: BoundingBox,
    /// Area in square kilometres.
    pub area_sq_km: f64,
    /// Boundary as a `GeoJSON` geometry string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polygon_geojson: Option<String>,
    /// Position and search radius in metres, for node areas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Coordinate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
    #[serde(default)]
    pub state: AreaState,
    /// Set once an entity-list query for the whole area timed out.
    #[serde(default)]
    pub wikidata_query_timeout: bool,
    /// Names of the area and its enclosing places.
    #[serde(default)]
    pub place_names: Vec<String>,
}

impl Area {
    #[must_use]
    pub const fn id(&self) -> AreaId {
        AreaId::new(self.osm_type, self.osm_id)
    }

    #[must_use]
    pub const fn is_point(&self) -> bool {
        matches!(self.osm_type, OsmType::Node)
    }

    /// Prefix for tables and files that belong to this area.
    #[must_use]
    pub fn table_prefix(&self) -> String {
        format!("osm_{}", self.place_id)
    }
}

/// Identifies one chunk of an area's fetch round.
///
/// `num` and `total` come from the initial grid; each subdivision after a
/// timeout appends the quadrant index (0 to 3) it was split into.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId {
    pub place_id: i64,
    pub num: usize,
    pub total: usize,
    #[serde(default)]
    pub quadrants: Vec<u8>,
}

impl ChunkId {
    #[must_use]
    pub const fn new(place_id: i64, num: usize, total: usize) -> Self {
        Self {
            place_id,
            num,
            total,
            quadrants: Vec::new(),
        }
    }

    /// Number of subdivisions applied.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.quadrants.len()
    }

    /// The id of one quadrant of this chunk.
    #[must_use]
    pub fn child(&self, quadrant: u8) -> Self {
        let mut quadrants = self.quadrants.clone();
        quadrants.push(quadrant);
        Self {
            quadrants,
            ..*self
        }
    }

    /// Name of the cache file holding this chunk's payload.
    ///
    /// `<place_id>.json` for a single chunk, otherwise
    /// `<place_id>_<num:03>_<total:03>.json`, with `_<q>` per subdivision.
    #[must_use]
    pub fn filename(&self) -> String {
        let mut name = if self.total <= 1 {
            self.place_id.to_string()
        } else {
            format!("{}_{:03}_{:03}", self.place_id, self.num, self.total)
        };
        for q in &self.quadrants {
            name.push('_');
            name.push_str(&q.to_string());
        }
        name.push_str(".json");
        name
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.num)?;
        for q in &self.quadrants {
            write!(f, ".{q}")?;
        }
        Ok(())
    }
}

/// A unit of fetch work: a sub-box of an area and its query, if any
/// criteria fall inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub bbox: BoundingBox,
    pub oql: Option<String>,
}

impl Chunk {
    #[must_use]
    pub fn filename(&self) -> String {
        self.id.filename()
    }
}
