#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geometry for the matcher pipeline.
//!
//! Splits areas into query-sized chunks, approximates areas and distances
//! on a sphere, and loads map-extract payloads into an R-tree backed
//! [`FeatureStore`] for proximity lookups.

pub mod area;
pub mod chunk;
pub mod osm;
pub mod store;

use geo::{BoundingRect, MultiPolygon};
use geojson::GeoJson;
use rstar::AABB;

pub use chunk::{area_chunks, chunk_count, chunk_grid, entity_chunk_count, polygon_chunks, subdivide, subdivide_chunk};
pub use osm::merge_payloads;
pub use store::FeatureStore;

/// Errors that can occur while loading a payload into the store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// I/O error reading the payload.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload is not valid JSON or has an unexpected shape.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is larger than the configured load limit.
    #[error("out of memory")]
    OutOfMemory {
        /// Payload size in bytes.
        size: u64,
        /// Configured limit in bytes.
        limit: u64,
    },

    /// Nothing was fetched for the area.
    #[error("no data from overpass to load")]
    Empty,

    /// The payload carries a server-side error remark.
    #[error("{message}")]
    Remark {
        /// Remark text.
        message: String,
    },
}

/// Parse a `GeoJSON` string into a [`MultiPolygon`].
/// Handles both `Polygon` and `MultiPolygon` geometry types, bare or
/// wrapped in a `Feature`.
#[must_use]
pub fn parse_geojson_to_multipolygon(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    let geom = match geojson {
        GeoJson::Geometry(geom) => geom,
        GeoJson::Feature(feature) => feature.geometry?,
        GeoJson::FeatureCollection(_) => return None,
    };
    let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

/// Compute the bounding box envelope of a geometry.
fn compute_envelope<G: BoundingRect<f64>>(geom: &G) -> AABB<[f64; 2]>
where
    G::Output: Into<Option<geo::Rect<f64>>>,
{
    geom.bounding_rect().into().map_or_else(
        || AABB::from_point([0.0, 0.0]),
        |rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
    )
}
