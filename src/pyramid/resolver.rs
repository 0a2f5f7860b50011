//! Tile address resolution.
//!
//! Maps pyramid levels and viewport rectangles onto tile coordinates and tile
//! coordinates onto fetchable URIs. Every function here derives level
//! geometry from [`level_dimensions`], so grid sizing, viewport intersection
//! and URI generation always agree on the shape of the pyramid.
//!
//! # Level Geometry
//!
//! Level `max_level` is full resolution. At level `L`:
//! - width = ceil(full_width / 2^(max_level - L))
//! - height = ceil(full_height / 2^(max_level - L))
//!
//! and the grid is `ceil(width / tile_size) x ceil(height / tile_size)`.

use std::collections::BTreeSet;

use crate::error::ResolveError;

use super::descriptor::{PyramidDescriptor, SlideId};

// =============================================================================
// Coordinates
// =============================================================================

/// Address of one tile within a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Pyramid level (`max_level` = full resolution)
    pub level: u32,

    /// Column, 0-indexed from the left
    pub x: u32,

    /// Row, 0-indexed from the top
    pub y: u32,
}

impl TileCoord {
    pub fn new(level: u32, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

/// Viewport rectangle in level-pixel space.
///
/// The surface converts its own viewport into the pixel space of the level it
/// intends to draw before handing it to the resolver. The rectangle may extend
/// past the image on any side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Integer rectangle in level-pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// =============================================================================
// Level Geometry
// =============================================================================

fn check_level(descriptor: &PyramidDescriptor, level: u32) -> Result<(), ResolveError> {
    if descriptor.contains_level(level) {
        Ok(())
    } else {
        Err(ResolveError::LevelOutOfRange {
            level,
            min_level: descriptor.min_level(),
            max_level: descriptor.max_level(),
        })
    }
}

/// Halve `dimension` `shift` times, rounding up, never below 1.
fn scale_dimension(dimension: u32, shift: u32) -> u32 {
    if shift >= u32::BITS {
        return 1;
    }
    (dimension as u64).div_ceil(1u64 << shift).max(1) as u32
}

/// Pixel dimensions of the image at `level`.
pub fn level_dimensions(
    descriptor: &PyramidDescriptor,
    level: u32,
) -> Result<(u32, u32), ResolveError> {
    check_level(descriptor, level)?;
    let shift = descriptor.max_level() - level;
    Ok((
        scale_dimension(descriptor.width(), shift),
        scale_dimension(descriptor.height(), shift),
    ))
}

/// Number of tile columns and rows at `level`.
///
/// Always at least `(1, 1)` for an addressable level.
pub fn tile_grid_size(
    descriptor: &PyramidDescriptor,
    level: u32,
) -> Result<(u32, u32), ResolveError> {
    let (width, height) = level_dimensions(descriptor, level)?;
    let tile_size = descriptor.tile_size();
    Ok((width.div_ceil(tile_size), height.div_ceil(tile_size)))
}

/// Pixel rectangle covered by one tile, including its overlap margins.
///
/// Edge tiles carry overlap only on their interior sides and are clipped to
/// the level bounds.
pub fn tile_bounds(
    descriptor: &PyramidDescriptor,
    coord: TileCoord,
) -> Result<PixelRect, ResolveError> {
    let (width, height) = level_dimensions(descriptor, coord.level)?;
    let tile_size = descriptor.tile_size() as u64;
    let overlap = descriptor.tile_overlap() as u64;

    let axis = |index: u32, extent: u32| -> (u32, u32) {
        let extent = extent as u64;
        let nominal = index as u64 * tile_size;
        let start = nominal.saturating_sub(if index > 0 { overlap } else { 0 });
        let end = (nominal + tile_size + overlap).min(extent);
        let start = start.min(end);
        (start as u32, (end - start) as u32)
    };

    let (x, w) = axis(coord.x, width);
    let (y, h) = axis(coord.y, height);
    Ok(PixelRect {
        x,
        y,
        width: w,
        height: h,
    })
}

// =============================================================================
// URIs
// =============================================================================

/// Path of one tile: `/slides/{slide_id}/tiles/{level}/{x}/{y}`.
///
/// The slide id is percent-encoded, so ids containing `/` cannot collide with
/// another slide's tiles.
pub fn tile_uri(slide_id: &SlideId, level: u32, x: u32, y: u32) -> String {
    format!(
        "/slides/{}/tiles/{}/{}/{}",
        urlencoding::encode(slide_id.as_str()),
        level,
        x,
        y
    )
}

/// Path of a slide's descriptor: `/slides/{slide_id}/dzi`.
pub fn descriptor_uri(slide_id: &SlideId) -> String {
    format!("/slides/{}/dzi", urlencoding::encode(slide_id.as_str()))
}

// =============================================================================
// Viewport Intersection
// =============================================================================

/// Tiles at `level` whose bounding box intersects `viewport`.
///
/// Bounding boxes include the overlap margins. The result is clipped to the
/// tile grid; a viewport entirely outside the image yields an empty set.
pub fn tiles_for_viewport(
    descriptor: &PyramidDescriptor,
    level: u32,
    viewport: Rect,
) -> Result<BTreeSet<TileCoord>, ResolveError> {
    let (width, height) = level_dimensions(descriptor, level)?;
    let (cols, rows) = tile_grid_size(descriptor, level)?;
    let tile_size = descriptor.tile_size() as f64;
    let overlap = descriptor.tile_overlap() as f64;

    let mut tiles = BTreeSet::new();

    let Some((x_start, x_end)) =
        axis_span(viewport.x, viewport.width, width, cols, tile_size, overlap)
    else {
        return Ok(tiles);
    };
    let Some((y_start, y_end)) =
        axis_span(viewport.y, viewport.height, height, rows, tile_size, overlap)
    else {
        return Ok(tiles);
    };

    for y in y_start..y_end {
        for x in x_start..x_end {
            tiles.insert(TileCoord::new(level, x, y));
        }
    }
    Ok(tiles)
}

/// Half-open range of tile indices along one axis that intersect
/// `[origin, origin + length)` once clipped to `[0, extent)`.
fn axis_span(
    origin: f64,
    length: f64,
    extent: u32,
    count: u32,
    tile_size: f64,
    overlap: f64,
) -> Option<(u32, u32)> {
    if !origin.is_finite() || !length.is_finite() || length <= 0.0 {
        return None;
    }

    let start = origin.max(0.0);
    let end = (origin + length).min(extent as f64);
    if start >= end {
        return None;
    }

    // Tile i spans [i*ts - overlap, (i+1)*ts + overlap).
    let first = ((start - overlap) / tile_size).floor().max(0.0);
    let last = ((end + overlap) / tile_size).ceil().min(count as f64);
    if first >= last {
        return None;
    }
    Some((first as u32, last as u32))
}

// =============================================================================
// Tests
// =============================================================================
