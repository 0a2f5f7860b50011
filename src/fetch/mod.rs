//! Network collaborators of the viewer.
//!
//! The viewer core never performs I/O itself. Descriptors and tiles are
//! obtained through the two traits below, which lets the same controller run
//! against an HTTP slide server ([`HttpDescriptorSource`], [`HttpTileFetcher`])
//! or against scripted sources in tests.

mod client;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{DescriptorFetchError, TileFetchError};
use crate::pyramid::{RawDescriptor, SlideId};

pub use client::{HttpDescriptorSource, HttpTileFetcher, DEFAULT_DESCRIPTOR_TIMEOUT};

/// Source of pyramid descriptors.
#[async_trait]
pub trait DescriptorSource: Send + Sync {
    /// Fetch the descriptor of `slide_id`.
    ///
    /// The result is unvalidated; the controller validates it only if it is
    /// still current when it arrives.
    async fn fetch_descriptor(
        &self,
        slide_id: &SlideId,
    ) -> Result<RawDescriptor, DescriptorFetchError>;
}

/// Fetcher for individual tiles.
#[async_trait]
pub trait TileFetcher: Send + Sync {
    /// Fetch the tile at `uri`, as produced by [`crate::pyramid::tile_uri`].
    async fn fetch_tile(&self, uri: &str) -> Result<Bytes, TileFetchError>;
}
