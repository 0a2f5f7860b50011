//! Byte cache for loaded tiles.
//!
//! Keeps the bodies of tiles loaded during the current session so that a
//! surface re-requesting a tile it already displayed (pan away and back) is
//! served without another transfer.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached tiles in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;

use super::inflight::TileKey;

/// Default cache capacity: 64MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(4_096) {
    Some(n) => n,
    None => unreachable!(),
};

/// LRU cache for tile bodies with size-based capacity.
///
/// Owned by the scheduler and only touched from the viewer's control task,
/// so it needs no interior locking.
pub struct TileCache {
    /// The underlying LRU cache
    cache: LruCache<TileKey, Bytes>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Current total size in bytes
    current_size: usize,
}

impl TileCache {
    /// Create a new tile cache with default capacity (64MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a new tile cache with the specified capacity in bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            cache: LruCache::new(DEFAULT_MAX_ENTRIES),
            max_size,
            current_size: 0,
        }
    }

    /// Get a tile body, marking it as recently used.
    pub fn get(&mut self, key: &TileKey) -> Option<Bytes> {
        self.cache.get(key).cloned()
    }

    /// Store a tile body.
    ///
    /// Entries larger than the whole capacity are not stored. Otherwise
    /// least-recently-used entries are evicted until the cache fits.
    pub fn put(&mut self, key: TileKey, data: Bytes) {
        let data_size = data.len();
        if data_size > self.max_size {
            return;
        }

        if let Some(old_data) = self.cache.peek(&key) {
            self.current_size = self.current_size.saturating_sub(old_data.len());
        }

        // The entry-count bound can push out an entry on its own
        if let Some((evicted_key, evicted_data)) = self.cache.push(key.clone(), data) {
            if evicted_key != key {
                self.current_size = self.current_size.saturating_sub(evicted_data.len());
            }
        }
        self.current_size += data_size;

        while self.current_size > self.max_size {
            match self.cache.pop_lru() {
                Some((_, evicted_data)) => {
                    self.current_size = self.current_size.saturating_sub(evicted_data.len());
                }
                None => break,
            }
        }
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_size = 0;
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Current total size of cached tiles in bytes.
    pub fn size(&self) -> usize {
        self.current_size
    }

    /// Maximum capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}
