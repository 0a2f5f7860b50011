//! Drawing surface abstraction.
//!
//! A drawing surface is whatever turns tiles into pixels: a canvas, a GPU
//! texture atlas, or the [`HeadlessSurface`] used by the command-line tool.
//! The viewer controller is its only owner and the only caller of its
//! lifecycle operations (`create`, `open`, `close`, `destroy`).
//!
//! The surface never builds tile URIs itself. On `open` it receives a
//! [`TileSource`] bound to one slide and one session, and it reports viewport
//! changes back through [`SurfaceEvents`] tagged with that session's token.

mod headless;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ResolveError;
use crate::pyramid::{
    level_dimensions, tile_bounds, tile_grid_size, tile_uri, PixelRect, PyramidDescriptor,
    TileCoord,
};
use crate::viewer::{SessionToken, SurfaceEvents};

pub use headless::{HeadlessContainer, HeadlessReport, HeadlessSurface};

/// Capability the viewer controller drives.
pub trait DrawingSurface: Send + 'static {
    /// Whatever the surface binds to when created
    type Container;

    /// Allocate a surface bound to `container`. No tiles are requested yet.
    fn create(container: Self::Container, events: SurfaceEvents) -> Self
    where
        Self: Sized;

    /// Start displaying a slide.
    fn open(&mut self, source: TileSource);

    /// Stop displaying the current slide and clear the image.
    fn close(&mut self);

    /// Release the surface. Called exactly once.
    fn destroy(self)
    where
        Self: Sized;

    /// A requested tile is ready to draw.
    fn tile_loaded(&mut self, coord: TileCoord, data: Bytes);

    /// A requested tile will not load this session; draw a placeholder.
    fn tile_failed(&mut self, coord: TileCoord);
}

/// Descriptor plus tile addressing for one opened slide.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSource {
    token: SessionToken,
    descriptor: Arc<PyramidDescriptor>,
}

impl TileSource {
    pub fn new(token: SessionToken, descriptor: Arc<PyramidDescriptor>) -> Self {
        Self { token, descriptor }
    }

    /// Token to tag viewport reports with.
    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn descriptor(&self) -> &PyramidDescriptor {
        &self.descriptor
    }

    /// URI of a tile of this slide.
    pub fn tile_url(&self, level: u32, x: u32, y: u32) -> String {
        tile_uri(self.descriptor.slide_id(), level, x, y)
    }

    pub fn level_dimensions(&self, level: u32) -> Result<(u32, u32), ResolveError> {
        level_dimensions(&self.descriptor, level)
    }

    pub fn tile_grid_size(&self, level: u32) -> Result<(u32, u32), ResolveError> {
        tile_grid_size(&self.descriptor, level)
    }

    pub fn tile_bounds(&self, coord: TileCoord) -> Result<PixelRect, ResolveError> {
        tile_bounds(&self.descriptor, coord)
    }
}
