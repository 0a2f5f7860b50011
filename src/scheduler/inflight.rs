//! In-flight tile fetch management.
//!
//! The scheduler owns the per-tile state map of the current session. Fetches
//! run as spawned tasks that only report back through the viewer's event
//! channel; every state transition happens in [`TileScheduler::settle`] on
//! the viewer's control task.
//!
//! # Tile Lifecycle
//!
//! ```text
//!   request ──► Pending{0} ──ok──► Loaded
//!                   │
//!                  err (attempt < max_retries)
//!                   ▼
//!               Pending{n} ──err (n == max_retries)──► Failed{n + 1}
//! ```
//!
//! Concurrent requests for a pending tile attach to the same fetch. A
//! `Failed` tile is not retried again until the session changes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::TileFetchError;
use crate::fetch::TileFetcher;
use crate::pyramid::{tile_uri, SlideId, TileCoord};
use crate::viewer::{SessionToken, ViewerEvent};

use super::cache::TileCache;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default delay before the first retry; later retries wait proportionally longer.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Default per-attempt tile fetch timeout.
pub const DEFAULT_TILE_TIMEOUT: Duration = Duration::from_secs(15);

// =============================================================================
// Keys, Handles and Results
// =============================================================================

/// Identity of one tile across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub slide_id: SlideId,
    pub coord: TileCoord,
}

impl TileKey {
    pub fn new(slide_id: SlideId, coord: TileCoord) -> Self {
        Self { slide_id, coord }
    }
}

/// State of one tile within the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// A fetch for this attempt (0-based) is in flight or waiting on backoff
    Pending { attempt: u32 },

    /// The tile body arrived
    Loaded,

    /// Every attempt failed
    Failed { attempts: u32 },
}

/// Cancellable claim on a requested tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileHandle {
    id: u64,
    key: TileKey,
}

impl TileHandle {
    pub fn key(&self) -> &TileKey {
        &self.key
    }
}

/// Result of [`TileScheduler::request`].
#[derive(Debug, Clone)]
pub struct Requested {
    pub handle: TileHandle,

    /// Body of an already loaded tile, ready to draw without waiting
    pub cached: Option<Bytes>,
}

/// Completion of one fetch attempt, sent back to the control task.
#[derive(Debug, Clone)]
pub struct TileSettled {
    pub token: SessionToken,
    pub key: TileKey,
    pub attempt: u32,
    pub result: Result<Bytes, TileFetchError>,
}

/// What the surface must be told after a fetch attempt settled.
#[derive(Debug, Clone, PartialEq)]
pub enum TileNotice {
    /// Draw this tile
    Loaded { coord: TileCoord, data: Bytes },

    /// Draw a placeholder; no further attempts will be made this session
    Failed {
        coord: TileCoord,
        error: TileFetchError,
    },
}

/// Retry and timeout policy for tile fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Backoff unit; retry `n` waits `n * backoff`
    pub backoff: Duration,

    /// Per-attempt timeout
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: DEFAULT_RETRY_BACKOFF,
            timeout: DEFAULT_TILE_TIMEOUT,
        }
    }
}

// =============================================================================
// Tile Scheduler
// =============================================================================

struct TileEntry {
    state: TileState,
    handles: HashSet<u64>,
    task: Option<AbortHandle>,
}

impl TileEntry {
    /// Abort the fetch this entry still tracks, if any.
    ///
    /// A re-requested tile can have a newer attempt in flight when an older
    /// attempt's result settles it.
    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Issues, de-duplicates, cancels and retries tile fetches for one session.
pub struct TileScheduler {
    fetcher: Arc<dyn TileFetcher>,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<ViewerEvent>,
    session: Option<(SessionToken, SlideId)>,
    tiles: HashMap<TileKey, TileEntry>,
    cache: TileCache,
    next_handle: u64,
}

impl TileScheduler {
    /// Create a scheduler that reports completions on `events`.
    pub fn new(
        fetcher: Arc<dyn TileFetcher>,
        policy: RetryPolicy,
        cache: TileCache,
        events: mpsc::UnboundedSender<ViewerEvent>,
    ) -> Self {
        Self {
            fetcher,
            policy,
            events,
            session: None,
            tiles: HashMap::new(),
            cache,
            next_handle: 0,
        }
    }

    /// Start accepting requests for `slide_id` under `token`.
    ///
    /// Drops every tile of the previous session.
    pub fn begin_session(&mut self, token: SessionToken, slide_id: SlideId) {
        self.reset();
        self.session = Some((token, slide_id));
    }

    /// Stop accepting requests and drop all tile state.
    pub fn end_session(&mut self) {
        self.reset();
        self.session = None;
    }

    fn reset(&mut self) {
        for entry in self.tiles.values() {
            if let Some(task) = &entry.task {
                task.abort();
            }
        }
        if !self.tiles.is_empty() {
            debug!("Dropping {} tile(s) of the previous session", self.tiles.len());
        }
        self.tiles.clear();
        self.cache.clear();
    }

    /// Token of the session currently accepted, if any.
    pub fn token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(|(token, _)| *token)
    }

    /// Request a tile.
    ///
    /// Returns `None` when the key does not belong to the current session.
    /// A pending tile is joined rather than fetched again; a loaded tile is
    /// returned from the byte cache when still present.
    pub fn request(&mut self, key: TileKey) -> Option<Requested> {
        let (token, slide_id) = self.session.clone()?;
        if key.slide_id != slide_id {
            debug!(
                "Ignoring tile request for slide {} during session of {}",
                key.slide_id, slide_id
            );
            return None;
        }

        let id = self.next_handle;
        self.next_handle += 1;

        let mut cached = None;
        let needs_fetch = match self.tiles.get(&key).map(|e| e.state) {
            None => true,
            Some(TileState::Pending { .. }) | Some(TileState::Failed { .. }) => false,
            Some(TileState::Loaded) => {
                cached = self.cache.get(&key);
                cached.is_none()
            }
        };

        let task = needs_fetch.then(|| self.spawn_fetch(token, key.clone(), 0, Duration::ZERO));

        let entry = self.tiles.entry(key.clone()).or_insert_with(|| TileEntry {
            state: TileState::Pending { attempt: 0 },
            handles: HashSet::new(),
            task: None,
        });
        if let Some(task) = task {
            entry.state = TileState::Pending { attempt: 0 };
            entry.task = Some(task);
        }
        entry.handles.insert(id);

        Some(Requested {
            handle: TileHandle { id, key },
            cached,
        })
    }

    /// Release a claim on a tile.
    ///
    /// When the last claim on a pending tile is released its fetch is aborted
    /// on a best-effort basis and the tile is forgotten. Settled tiles keep
    /// their state. Returns whether the handle was still live.
    pub fn cancel(&mut self, handle: &TileHandle) -> bool {
        let Some(entry) = self.tiles.get_mut(&handle.key) else {
            return false;
        };
        if !entry.handles.remove(&handle.id) {
            return false;
        }

        if entry.handles.is_empty() && matches!(entry.state, TileState::Pending { .. }) {
            entry.abort_task();
            self.tiles.remove(&handle.key);
        }
        true
    }

    /// Apply the outcome of a fetch attempt.
    ///
    /// Results from superseded sessions, cancelled tiles or outdated attempts
    /// are discarded. A failure below the retry bound schedules the next
    /// attempt; the final failure yields exactly one [`TileNotice::Failed`].
    pub fn settle(&mut self, settled: TileSettled) -> Option<TileNotice> {
        let TileSettled {
            token,
            key,
            attempt,
            result,
        } = settled;

        if self.token() != Some(token) {
            debug!(
                "Discarding stale tile result for {} {:?} (token {})",
                key.slide_id, key.coord, token
            );
            return None;
        }

        match self.tiles.get(&key).map(|e| e.state) {
            Some(TileState::Pending { attempt: current }) if current == attempt => {}
            _ => {
                debug!("Discarding tile result for {:?} attempt {}", key.coord, attempt);
                return None;
            }
        }

        match result {
            Ok(data) => {
                let entry = self.tiles.get_mut(&key)?;
                entry.state = TileState::Loaded;
                entry.abort_task();
                self.cache.put(key.clone(), data.clone());
                Some(TileNotice::Loaded {
                    coord: key.coord,
                    data,
                })
            }
            Err(error) if attempt < self.policy.max_retries => {
                let next = attempt + 1;
                debug!(
                    "Tile {:?} attempt {} failed: {}; retrying",
                    key.coord, attempt, error
                );
                let delay = self.policy.backoff * next;
                let task = self.spawn_fetch(token, key.clone(), next, delay);
                let entry = self.tiles.get_mut(&key)?;
                entry.abort_task();
                entry.state = TileState::Pending { attempt: next };
                entry.task = Some(task);
                None
            }
            Err(error) => {
                warn!(
                    "Tile {:?} of slide {} failed after {} attempt(s): {}",
                    key.coord,
                    key.slide_id,
                    attempt + 1,
                    error
                );
                let entry = self.tiles.get_mut(&key)?;
                entry.state = TileState::Failed {
                    attempts: attempt + 1,
                };
                entry.abort_task();
                Some(TileNotice::Failed {
                    coord: key.coord,
                    error,
                })
            }
        }
    }

    fn spawn_fetch(
        &self,
        token: SessionToken,
        key: TileKey,
        attempt: u32,
        delay: Duration,
    ) -> AbortHandle {
        let fetcher = Arc::clone(&self.fetcher);
        let events = self.events.clone();
        let timeout = self.policy.timeout;
        let uri = tile_uri(&key.slide_id, key.coord.level, key.coord.x, key.coord.y);

        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match tokio::time::timeout(timeout, fetcher.fetch_tile(&uri)).await {
                Ok(result) => result,
                Err(_) => Err(TileFetchError::Timeout(timeout)),
            };
            // The receiver is gone once the viewer unmounted
            let _ = events.send(ViewerEvent::TileSettled(TileSettled {
                token,
                key,
                attempt,
                result,
            }));
        });
        task.abort_handle()
    }

    /// State of a tile in the current session.
    pub fn state(&self, key: &TileKey) -> Option<TileState> {
        self.tiles.get(key).map(|e| e.state)
    }

    /// Number of tiles tracked for the current session.
    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Number of tiles still waiting on a fetch.
    pub fn pending(&self) -> usize {
        self.tiles
            .values()
            .filter(|e| matches!(e.state, TileState::Pending { .. }))
            .count()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

// =============================================================================
// Tests
// =============================================================================
