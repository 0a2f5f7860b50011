use std::time::Duration;

use thiserror::Error;

/// Reasons a pyramid descriptor is rejected before it can be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    /// A required numeric field was absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Width, height or tile size is zero or negative
    #[error("Field {field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    /// Tile overlap is negative
    #[error("Tile overlap must not be negative, got {0}")]
    NegativeOverlap(i64),

    /// A level bound is negative
    #[error("Level bound {field} must not be negative, got {value}")]
    NegativeLevel { field: &'static str, value: i64 },

    /// Level bounds are inverted
    #[error("Invalid level bounds: min_level {min_level} exceeds max_level {max_level}")]
    InvertedLevels { min_level: i64, max_level: i64 },

    /// A value does not fit the addressing range
    #[error("Field {field} is too large: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    /// The DZI XML document could not be understood
    #[error("Malformed DZI document: {0}")]
    MalformedDzi(String),
}

/// Transport or status failure while fetching a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorFetchError {
    /// Network or connection error
    #[error("Connection error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("Descriptor request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    /// Body was not a descriptor
    #[error("Malformed descriptor body: {0}")]
    Malformed(String),
}

/// Contract violations inside the tile address resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Level outside the descriptor's addressable range
    #[error("Level {level} out of range (valid: {min_level}..={max_level})")]
    LevelOutOfRange {
        level: u32,
        min_level: u32,
        max_level: u32,
    },
}

/// Per-tile fetch failure. Retried by the scheduler and never surfaced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileFetchError {
    /// Network or connection error
    #[error("Connection error: {0}")]
    Transport(String),

    /// Server answered with a non-success status
    #[error("Tile request to {uri} failed with status {status}")]
    Status { uri: String, status: u16 },

    /// The fetch did not complete in time
    #[error("Tile request timed out after {0:?}")]
    Timeout(Duration),
}

/// Errors reported to the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    /// The descriptor for a slide failed validation
    #[error("Invalid descriptor for slide {slide_id}: {source}")]
    InvalidDescriptor {
        slide_id: String,
        #[source]
        source: DescriptorError,
    },

    /// The descriptor for a slide could not be fetched
    #[error("Failed to load descriptor for slide {slide_id}: {source}")]
    DescriptorFetch {
        slide_id: String,
        #[source]
        source: DescriptorFetchError,
    },

    /// The drawing surface refused to open a valid descriptor
    #[error("Surface failed to open slide {slide_id}: {reason}")]
    OpenFailed { slide_id: String, reason: String },
}

/// Lifecycle misuse of the viewer controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The controller already owns a surface
    #[error("Viewer is already mounted")]
    AlreadyMounted,

    /// The controller was unmounted and cannot be used again
    #[error("Viewer has been unmounted")]
    Terminated,
}

/// Failure to set up an HTTP fetcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL could not be parsed
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),

    /// The HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}
