//! # WSI Viewer
//!
//! Viewer core for Whole Slide Images served as Deep Zoom tile pyramids.
//!
//! This library turns a slide selection into a displayed image: it fetches
//! and validates the slide's pyramid descriptor, computes which tiles cover
//! the visible region, schedules their fetches with retries, and keeps a
//! drawing surface in step with the selection no matter in which order
//! network responses arrive.
//!
//! ## Features
//!
//! - **Validated descriptors**: a pyramid can only be opened once it has passed validation
//! - **Tile addressing**: level geometry, tile grids, overlap-aware bounds and tile URIs
//! - **Tile scheduling**: de-duplicated fetches, cancellation, bounded retries and an LRU byte cache
//! - **Race-free lifecycle**: the last selection wins, the surface is created and destroyed exactly once
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`pyramid`] - Descriptor validation, DZI documents and tile address resolution
//! - [`fetch`] - Descriptor and tile sources, with HTTP implementations
//! - [`scheduler`] - Tile request scheduling and caching
//! - [`surface`] - Drawing surface abstraction and a headless implementation
//! - [`viewer`] - Viewer controller, events and session tokens
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use wsi_viewer::{
//!     HeadlessContainer, HeadlessSurface, HttpDescriptorSource, HttpTileFetcher, SlideId,
//!     ViewerConfig, ViewerController,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ViewerConfig::default();
//!     let descriptors = Arc::new(HttpDescriptorSource::new(&config.base_url).unwrap());
//!     let tiles = Arc::new(HttpTileFetcher::new(&config.base_url).unwrap());
//!     let (errors, _errors_rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     let mut viewer: ViewerController<HeadlessSurface> =
//!         ViewerController::new(&config, descriptors, tiles, errors);
//!     let (container, _report) = HeadlessContainer::new("main", None, None);
//!     viewer.mount(container).unwrap();
//!
//!     let handle = viewer.handle();
//!     tokio::spawn(viewer.run());
//!     handle.select(Some(SlideId::from("12")));
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod pyramid;
pub mod scheduler;
pub mod surface;
pub mod viewer;

// Re-export commonly used types
pub use config::{Cli, Command, GridConfig, OpenConfig, ViewerConfig};
pub use error::{
    ClientError, DescriptorError, DescriptorFetchError, LifecycleError, ResolveError, TileFetchError,
    ViewerError,
};
pub use fetch::{DescriptorSource, HttpDescriptorSource, HttpTileFetcher, TileFetcher};
pub use pyramid::{
    descriptor_uri, dzi_max_level, generate_dzi_xml, level_dimensions, parse_dzi_xml,
    tile_bounds, tile_grid_size, tile_uri, tiles_for_viewport, validate, PixelRect,
    PyramidDescriptor, RawDescriptor, Rect, SlideId, TileCoord, MAX_PYRAMID_LEVEL,
};
pub use scheduler::{
    RetryPolicy, TileCache, TileHandle, TileKey, TileNotice, TileScheduler, TileState,
    DEFAULT_TILE_CACHE_CAPACITY,
};
pub use surface::{DrawingSurface, HeadlessContainer, HeadlessReport, HeadlessSurface, TileSource};
pub use viewer::{
    SessionToken, SurfaceEvent, SurfaceEvents, ViewerController, ViewerEvent, ViewerHandle,
    ViewerState,
};
