//! Pyramid geometry and tile addressing.
//!
//! # Components
//!
//! - [`PyramidDescriptor`]: validated geometry of one slide's pyramid
//! - [`RawDescriptor`]: descriptor as fetched, before [`validate`]
//! - [`tile_grid_size`], [`tiles_for_viewport`], [`tile_uri`]: the address resolver
//! - [`parse_dzi_xml`], [`generate_dzi_xml`]: Deep Zoom XML documents
//!
//! # Example
//!
//! ```
//! use wsi_viewer::pyramid::{tile_grid_size, tile_uri, validate, RawDescriptor, SlideId};
//!
//! let raw = RawDescriptor::new(100_000, 80_000, 256, 1, 10);
//! let descriptor = validate(SlideId::from(1u64), &raw).unwrap();
//!
//! assert_eq!(descriptor.min_level(), 0);
//! assert_eq!(tile_grid_size(&descriptor, 10).unwrap(), (391, 313));
//! assert_eq!(tile_uri(descriptor.slide_id(), 10, 0, 0), "/slides/1/tiles/10/0/0");
//! ```

mod descriptor;
mod dzi;
mod resolver;

pub use descriptor::{validate, PyramidDescriptor, RawDescriptor, SlideId, MAX_PYRAMID_LEVEL};
pub use dzi::{dzi_max_level, generate_dzi_xml, parse_dzi_xml, DZI_NAMESPACE};
pub use resolver::{
    descriptor_uri, level_dimensions, tile_bounds, tile_grid_size, tile_uri, tiles_for_viewport,
    PixelRect, Rect, TileCoord,
};
