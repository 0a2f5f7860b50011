//! Configuration management for the WSI viewer.
//!
//! This module provides:
//! - [`ViewerConfig`]: runtime knobs of the viewer core (retry policy, timeouts, cache)
//! - [`Cli`]: command-line interface of the `wsi-viewer` binary via clap
//!
//! # Environment Variables
//!
//! Options of the `open` command can be set via environment variables with the
//! `WSI_VIEWER_` prefix:
//!
//! - `WSI_VIEWER_BASE_URL` - Slide server API root (default: http://localhost:5000/api)
//! - `WSI_VIEWER_TILE_TIMEOUT_MS` - Per-attempt tile timeout (default: 15000)
//! - `WSI_VIEWER_MAX_RETRIES` - Tile retries after the first failure (default: 2)
//! - `WSI_VIEWER_RETRY_BACKOFF_MS` - Backoff unit between retries (default: 250)
//! - `WSI_VIEWER_CACHE_TILES` - Tile byte cache capacity (default: 64MB)

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::fetch::DEFAULT_DESCRIPTOR_TIMEOUT;
use crate::pyramid::Rect;
use crate::scheduler::{
    RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_TILE_CACHE_CAPACITY,
    DEFAULT_TILE_TIMEOUT,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default slide server API root.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

/// Upper bound on retries; beyond this a broken tile stalls the viewport for too long.
pub const MAX_RETRIES_LIMIT: u32 = 10;

// =============================================================================
// Viewer Configuration
// =============================================================================

/// Runtime configuration of the viewer core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerConfig {
    /// Slide server API root
    pub base_url: String,

    /// Timeout of one tile fetch attempt
    pub tile_timeout: Duration,

    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Backoff unit between retries
    pub retry_backoff: Duration,

    /// Timeout of a descriptor request
    pub descriptor_timeout: Duration,

    /// Byte capacity of the loaded-tile cache
    pub tile_cache_bytes: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tile_timeout: DEFAULT_TILE_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
            tile_cache_bytes: DEFAULT_TILE_CACHE_CAPACITY,
        }
    }
}

impl ViewerConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if url::Url::parse(&self.base_url).is_err() {
            return Err(format!("base_url is not a valid URL: {}", self.base_url));
        }
        if self.tile_timeout.is_zero() {
            return Err("tile_timeout must be greater than 0".to_string());
        }
        if self.descriptor_timeout.is_zero() {
            return Err("descriptor_timeout must be greater than 0".to_string());
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(format!("max_retries must be at most {}", MAX_RETRIES_LIMIT));
        }
        if self.tile_cache_bytes == 0 {
            return Err("tile_cache_bytes must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Retry policy handed to the tile scheduler.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff: self.retry_backoff,
            timeout: self.tile_timeout,
        }
    }
}

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Viewer - pyramid tile viewer core for Whole Slide Images.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-viewer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Open a slide from a live server and load one viewport of tiles.
    Open(OpenConfig),

    /// Print the tile pyramid for the given geometry.
    Grid(GridConfig),
}

/// Arguments of the `open` command.
#[derive(Args, Debug, Clone)]
pub struct OpenConfig {
    /// Slide identifier.
    pub slide_id: String,

    /// Slide server API root.
    #[arg(long, default_value = DEFAULT_BASE_URL, env = "WSI_VIEWER_BASE_URL")]
    pub base_url: String,

    /// Pyramid level to draw (default: full resolution).
    #[arg(long)]
    pub level: Option<u32>,

    /// Viewport in level pixels as x,y,width,height (default: whole level).
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub viewport: Option<Vec<f64>>,

    /// Timeout of one tile fetch attempt in milliseconds.
    #[arg(long, default_value_t = DEFAULT_TILE_TIMEOUT.as_millis() as u64, env = "WSI_VIEWER_TILE_TIMEOUT_MS")]
    pub tile_timeout_ms: u64,

    /// Retries after the first failed tile attempt.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES, env = "WSI_VIEWER_MAX_RETRIES")]
    pub max_retries: u32,

    /// Backoff unit between retries in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_BACKOFF.as_millis() as u64, env = "WSI_VIEWER_RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: u64,

    /// Byte capacity of the loaded-tile cache.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_VIEWER_CACHE_TILES")]
    pub cache_tiles: usize,

    /// Give up after this many seconds.
    #[arg(long, default_value_t = 60)]
    pub deadline_secs: u64,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl OpenConfig {
    /// Runtime configuration derived from the arguments.
    pub fn viewer_config(&self) -> ViewerConfig {
        ViewerConfig {
            base_url: self.base_url.clone(),
            tile_timeout: Duration::from_millis(self.tile_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            descriptor_timeout: DEFAULT_DESCRIPTOR_TIMEOUT,
            tile_cache_bytes: self.cache_tiles,
        }
    }

    /// Requested viewport, if any.
    pub fn viewport_rect(&self) -> Result<Option<Rect>, String> {
        match self.viewport.as_deref() {
            None => Ok(None),
            Some([x, y, w, h]) => Ok(Some(Rect::new(*x, *y, *w, *h))),
            Some(_) => Err("viewport must be x,y,width,height".to_string()),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.slide_id.trim().is_empty() {
            return Err("slide id must not be empty".to_string());
        }
        if self.deadline_secs == 0 {
            return Err("deadline_secs must be greater than 0".to_string());
        }
        self.viewport_rect()?;
        self.viewer_config().validate()
    }
}

/// Arguments of the `grid` command.
#[derive(Args, Debug, Clone)]
pub struct GridConfig {
    /// Full-resolution width in pixels.
    #[arg(long)]
    pub width: i64,

    /// Full-resolution height in pixels.
    #[arg(long)]
    pub height: i64,

    /// Tile edge length in pixels.
    #[arg(long, default_value_t = 256)]
    pub tile_size: i64,

    /// Tile overlap in pixels.
    #[arg(long, default_value_t = 0)]
    pub overlap: i64,

    /// Lowest addressable level.
    #[arg(long)]
    pub min_level: Option<i64>,

    /// Full-resolution level (default: Deep Zoom convention).
    #[arg(long)]
    pub max_level: Option<i64>,
}

// =============================================================================
// Tests
// =============================================================================
