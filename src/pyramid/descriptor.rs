//! Pyramid descriptor types and validation.
//!
//! A descriptor arrives from the network as a [`RawDescriptor`]: every field
//! optional and signed, exactly as the JSON body carried it. [`validate`] is the
//! only way to obtain a [`PyramidDescriptor`], so code that holds one can rely
//! on the geometry invariants without re-checking them.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::DescriptorError;

/// Highest pyramid level accepted. Levels above this address sub-pixel images.
pub const MAX_PYRAMID_LEVEL: u32 = 63;

// =============================================================================
// Slide Identifier
// =============================================================================

/// Opaque slide identifier, cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlideId(Arc<str>);

impl SlideId {
    /// Create a new slide identifier.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlideId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SlideId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<u64> for SlideId {
    fn from(id: u64) -> Self {
        Self::new(id.to_string())
    }
}

// =============================================================================
// Raw Descriptor
// =============================================================================

/// Descriptor as received from the descriptor endpoint, before validation.
///
/// Fields are signed and optional so that negative or missing values can be
/// reported precisely instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RawDescriptor {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub tile_size: Option<i64>,
    pub tile_overlap: Option<i64>,
    pub min_level: Option<i64>,
    pub max_level: Option<i64>,
}

impl RawDescriptor {
    /// Create a raw descriptor with every required field set and no `min_level`.
    pub fn new(width: i64, height: i64, tile_size: i64, tile_overlap: i64, max_level: i64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            tile_size: Some(tile_size),
            tile_overlap: Some(tile_overlap),
            min_level: None,
            max_level: Some(max_level),
        }
    }

    /// Set the lowest addressable level.
    pub fn with_min_level(mut self, min_level: i64) -> Self {
        self.min_level = Some(min_level);
        self
    }
}

// =============================================================================
// Validated Descriptor
// =============================================================================

/// Validated geometry of one slide's tile pyramid.
///
/// Level `max_level` is full resolution; every level below halves both
/// dimensions, rounding up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidDescriptor {
    slide_id: SlideId,
    width: u32,
    height: u32,
    tile_size: u32,
    tile_overlap: u32,
    min_level: u32,
    max_level: u32,
}

impl PyramidDescriptor {
    pub fn slide_id(&self) -> &SlideId {
        &self.slide_id
    }

    /// Full-resolution width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Full-resolution height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn tile_overlap(&self) -> u32 {
        self.tile_overlap
    }

    pub fn min_level(&self) -> u32 {
        self.min_level
    }

    pub fn max_level(&self) -> u32 {
        self.max_level
    }

    /// Number of addressable levels.
    pub fn level_count(&self) -> u32 {
        self.max_level - self.min_level + 1
    }

    /// Whether `level` lies within `[min_level, max_level]`.
    pub fn contains_level(&self, level: u32) -> bool {
        (self.min_level..=self.max_level).contains(&level)
    }

    /// Iterate addressable levels from coarsest to full resolution.
    pub fn levels(&self) -> impl Iterator<Item = u32> {
        self.min_level..=self.max_level
    }
}

/// Validate a raw descriptor for `slide_id`.
///
/// Resolves the `min_level` default (0) and checks every geometry invariant.
/// Checks run in field order so the first offending field is reported.
pub fn validate(
    slide_id: SlideId,
    raw: &RawDescriptor,
) -> Result<PyramidDescriptor, DescriptorError> {
    let width = positive("width", raw.width)?;
    let height = positive("height", raw.height)?;
    let tile_size = positive("tile_size", raw.tile_size)?;

    let tile_overlap = match raw.tile_overlap {
        None => return Err(DescriptorError::MissingField("tile_overlap")),
        Some(v) if v < 0 => return Err(DescriptorError::NegativeOverlap(v)),
        Some(v) => fits_u32("tile_overlap", v)?,
    };

    let min_level_raw = raw.min_level.unwrap_or(0);
    let max_level_raw = raw
        .max_level
        .ok_or(DescriptorError::MissingField("max_level"))?;

    if min_level_raw < 0 {
        return Err(DescriptorError::NegativeLevel {
            field: "min_level",
            value: min_level_raw,
        });
    }
    if max_level_raw < 0 {
        return Err(DescriptorError::NegativeLevel {
            field: "max_level",
            value: max_level_raw,
        });
    }
    if min_level_raw > max_level_raw {
        return Err(DescriptorError::InvertedLevels {
            min_level: min_level_raw,
            max_level: max_level_raw,
        });
    }
    if max_level_raw > MAX_PYRAMID_LEVEL as i64 {
        return Err(DescriptorError::OutOfRange {
            field: "max_level",
            value: max_level_raw,
        });
    }

    Ok(PyramidDescriptor {
        slide_id,
        width,
        height,
        tile_size,
        tile_overlap,
        min_level: min_level_raw as u32,
        max_level: max_level_raw as u32,
    })
}

fn positive(field: &'static str, value: Option<i64>) -> Result<u32, DescriptorError> {
    match value {
        None => Err(DescriptorError::MissingField(field)),
        Some(v) if v <= 0 => Err(DescriptorError::NonPositive { field, value: v }),
        Some(v) => fits_u32(field, v),
    }
}

fn fits_u32(field: &'static str, value: i64) -> Result<u32, DescriptorError> {
    u32::try_from(value).map_err(|_| DescriptorError::OutOfRange { field, value })
}

// =============================================================================
// Tests
// =============================================================================
