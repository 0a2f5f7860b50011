//! Tile request scheduling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Viewer control task              │
//! │   request / cancel / settle             │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            TileScheduler                │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ per-tile     │  │   TileCache     │  │
//! │  │ state map    │  │ (loaded bodies) │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ spawned fetch tasks
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            TileFetcher                  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileScheduler`]: issues, de-duplicates, cancels and retries fetches
//! - [`TileCache`]: LRU cache for tile bodies with size-based eviction
//! - [`RetryPolicy`]: retry bound, backoff and per-attempt timeout
//! - [`TileKey`], [`TileHandle`], [`TileSettled`], [`TileNotice`]: the request protocol

mod cache;
mod inflight;

pub use cache::{TileCache, DEFAULT_TILE_CACHE_CAPACITY};
pub use inflight::{
    Requested, RetryPolicy, TileHandle, TileKey, TileNotice, TileScheduler, TileSettled,
    TileState, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BACKOFF, DEFAULT_TILE_TIMEOUT,
};
