//! Splitting areas into query-sized chunks.
//!
//! Every function here is deterministic: the same inputs always give the
//! same cells in the same row-major order, so a chunk number maps to the
//! same geography across restarts.

use geo::{Intersects, MultiPolygon, Rect, coord};
use wikimatch_place_models::{Area, BoundingBox, ChunkId};

use crate::area::multipolygon_area_sq_km;
use crate::parse_geojson_to_multipolygon;

/// Side length in km of one map-extract chunk.
pub const MAP_UNIT_SIZE: f64 = 32.0;

/// Map-extract unit when only classification tags are fetched.
pub const MAP_ISA_UNIT_SIZE: f64 = 96.0;

/// Side length in km of one entity-list chunk.
pub const ENTITY_UNIT_SIZE: f64 = 22.0;

/// Entity-list unit when only classification tags are wanted.
pub const ENTITY_ISA_UNIT_SIZE: f64 = 220.0;

/// Areas below this many km² get a single entity-list query unless one
/// has already timed out.
pub const ENTITY_SINGLE_QUERY_MAX_SQ_KM: f64 = 3000.0;

/// Cells per side for an area: `max(1, ceil(sqrt(area) / unit))`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn chunk_count(area_sq_km: f64, unit_size: f64) -> usize {
    if !area_sq_km.is_finite() || area_sq_km <= 0.0 || unit_size <= 0.0 {
        return 1;
    }
    let n = (area_sq_km.sqrt() / unit_size).ceil();
    (n as usize).max(1)
}

/// Splits a box into an `n` by `n` grid, rows running south to north and
/// columns west to east.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chunk_grid(bbox: &BoundingBox, n: usize) -> Vec<BoundingBox> {
    let n = n.max(1);
    if n == 1 {
        return vec![*bbox];
    }
    let ns = bbox.height() / n as f64;
    let ew = bbox.width() / n as f64;

    // Outer edges come from the box itself so the cells tile it exactly.
    let edge = |start: f64, end: f64, step: f64, i: usize| {
        if i == n { end } else { step.mul_add(i as f64, start) }
    };

    let mut cells = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            cells.push(BoundingBox::new(
                edge(bbox.west, bbox.east, ew, col),
                edge(bbox.south, bbox.north, ns, row),
                edge(bbox.west, bbox.east, ew, col + 1),
                edge(bbox.south, bbox.north, ns, row + 1),
            ));
        }
    }
    cells
}

/// Splits a box into its four quadrants.
#[must_use]
pub fn subdivide(bbox: &BoundingBox) -> Vec<BoundingBox> {
    chunk_grid(bbox, 2)
}

/// Quadrant ids and boxes replacing a timed-out chunk.
#[must_use]
pub fn subdivide_chunk(id: &ChunkId, bbox: &BoundingBox) -> Vec<(ChunkId, BoundingBox)> {
    subdivide(bbox)
        .into_iter()
        .zip(0u8..)
        .map(|(cell, q)| (id.child(q), cell))
        .collect()
}

fn to_rect(bbox: &BoundingBox) -> Rect<f64> {
    Rect::new(
        coord! { x: bbox.west, y: bbox.south },
        coord! { x: bbox.east, y: bbox.north },
    )
}

/// Grid cells of `bbox` that intersect `polygon`.
#[must_use]
pub fn polygon_chunks(bbox: &BoundingBox, n: usize, polygon: &MultiPolygon<f64>) -> Vec<BoundingBox> {
    chunk_grid(bbox, n)
        .into_iter()
        .filter(|cell| polygon.intersects(&to_rect(cell)))
        .collect()
}

fn polygon_bbox(polygon: &geo::Polygon<f64>) -> Option<BoundingBox> {
    use geo::BoundingRect;

    polygon
        .bounding_rect()
        .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
}

/// Map-extract chunks for an area.
///
/// Each part of the boundary polygon is gridded separately, sized by its
/// own area, keeping cells that touch the part. Without a usable polygon
/// the bounding box is gridded by the stored area.
#[must_use]
pub fn area_chunks(area: &Area, unit_size: f64) -> Vec<BoundingBox> {
    let polygon = area
        .polygon_geojson
        .as_deref()
        .and_then(parse_geojson_to_multipolygon);

    let Some(polygon) = polygon else {
        return chunk_grid(&area.bbox, chunk_count(area.area_sq_km, unit_size));
    };

    let mut cells = Vec::new();
    for part in polygon {
        let Some(part_bbox) = polygon_bbox(&part) else {
            continue;
        };
        let part = MultiPolygon(vec![part]);
        let n = chunk_count(multipolygon_area_sq_km(&part), unit_size);
        cells.extend(polygon_chunks(&part_bbox, n, &part));
    }
    if cells.is_empty() {
        log::warn!("area {} polygon produced no chunks, using bbox", area.place_id);
        return vec![area.bbox];
    }
    cells
}

/// Cells per side for the entity-list query of an area.
#[must_use]
pub fn entity_chunk_count(area: &Area, unit_size: f64) -> usize {
    if area.is_point() {
        return 1;
    }
    if area.area_sq_km < ENTITY_SINGLE_QUERY_MAX_SQ_KM && !area.wikidata_query_timeout {
        return 1;
    }
    chunk_count(area.area_sq_km, unit_size)
}
