//! Viewer lifecycle controller.
//!
//! The controller is the single owner of the drawing surface and of the
//! current session. It consumes [`ViewerEvent`]s one at a time on its control
//! task; descriptor and tile fetches run as spawned tasks that only send
//! tagged results back.
//!
//! # States
//!
//! ```text
//!   Unmounted ──mount──► Idle ──select(id)──► AwaitingDescriptor ──descriptor ok──► Open
//!                          ▲                        │   ▲                             │
//!                          └──── select(None) ──────┘   └──────── select(other) ──────┘
//!
//!   any state ──unmount──► Unmounted (terminal)
//! ```
//!
//! Switching slides while `Open` closes the surface and reuses it; the
//! surface is destroyed only on unmount. A result whose session token is no
//! longer current is dropped, which gives "last selection wins" regardless of
//! the order in which responses arrive.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

use crate::config::ViewerConfig;
use crate::error::{DescriptorFetchError, LifecycleError, ViewerError};
use crate::fetch::{DescriptorSource, TileFetcher};
use crate::pyramid::{
    tiles_for_viewport, validate, PyramidDescriptor, RawDescriptor, Rect, SlideId, TileCoord,
};
use crate::scheduler::{
    TileCache, TileHandle, TileKey, TileNotice, TileScheduler, TileSettled,
};
use crate::surface::{DrawingSurface, TileSource};

use super::events::{SurfaceEvent, SurfaceEvents, ViewerEvent, ViewerHandle};
use super::session::SessionToken;

// =============================================================================
// States
// =============================================================================

/// Observable state of the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// No surface: not mounted yet, or torn down
    Unmounted,

    /// Surface mounted, no slide selected
    Idle,

    /// A slide is selected; its descriptor is in flight or was rejected
    AwaitingDescriptor,

    /// The surface displays the selected slide
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Fresh,
    Mounted,
    Terminated,
}

enum DescriptorStatus {
    /// Fetch in flight
    Pending(AbortHandle),

    /// Fetch or validation failed; re-selecting the slide retries
    Rejected,

    Ready(Arc<PyramidDescriptor>),
}

/// State of one slide selection. Replaced, never edited, on every switch.
struct Session {
    token: SessionToken,
    slide_id: SlideId,
    descriptor: DescriptorStatus,
}

// =============================================================================
// Controller
// =============================================================================

/// Owns one drawing surface and keeps it in step with the selected slide.
pub struct ViewerController<S: DrawingSurface> {
    descriptors: Arc<dyn DescriptorSource>,
    scheduler: TileScheduler,
    errors: mpsc::UnboundedSender<ViewerError>,
    events_tx: mpsc::UnboundedSender<ViewerEvent>,
    events_rx: mpsc::UnboundedReceiver<ViewerEvent>,
    /// Closed once every [`ViewerHandle`] is gone
    presence: watch::Sender<()>,
    lifecycle: Lifecycle,
    surface: Option<S>,
    session: Option<Session>,
    last_token: SessionToken,
    visible: HashMap<TileCoord, TileHandle>,
}

impl<S: DrawingSurface> ViewerController<S> {
    /// Create an unmounted controller.
    ///
    /// Descriptor-level failures are reported on `errors`; tile failures never are.
    pub fn new(
        config: &ViewerConfig,
        descriptors: Arc<dyn DescriptorSource>,
        tiles: Arc<dyn TileFetcher>,
        errors: mpsc::UnboundedSender<ViewerError>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (presence, _) = watch::channel(());
        let scheduler = TileScheduler::new(
            tiles,
            config.retry_policy(),
            TileCache::with_capacity(config.tile_cache_bytes),
            events_tx.clone(),
        );
        Self {
            descriptors,
            scheduler,
            errors,
            events_tx,
            events_rx,
            presence,
            lifecycle: Lifecycle::Fresh,
            surface: None,
            session: None,
            last_token: SessionToken::new(0),
            visible: HashMap::new(),
        }
    }

    /// Handle for sending selections and unmount requests from elsewhere.
    pub fn handle(&self) -> ViewerHandle {
        ViewerHandle::new(self.events_tx.clone(), self.presence.subscribe())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn state(&self) -> ViewerState {
        if self.lifecycle != Lifecycle::Mounted {
            return ViewerState::Unmounted;
        }
        match &self.session {
            None => ViewerState::Idle,
            Some(session) => match session.descriptor {
                DescriptorStatus::Ready(_) => ViewerState::Open,
                _ => ViewerState::AwaitingDescriptor,
            },
        }
    }

    /// Token of the current session, if a slide is selected.
    pub fn token(&self) -> Option<SessionToken> {
        self.session.as_ref().map(|s| s.token)
    }

    pub fn slide_id(&self) -> Option<&SlideId> {
        self.session.as_ref().map(|s| &s.slide_id)
    }

    /// Descriptor currently displayed.
    pub fn descriptor(&self) -> Option<&PyramidDescriptor> {
        match &self.session.as_ref()?.descriptor {
            DescriptorStatus::Ready(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn scheduler(&self) -> &TileScheduler {
        &self.scheduler
    }

    pub fn surface(&self) -> Option<&S> {
        self.surface.as_ref()
    }

    /// Tiles of the last viewport request.
    pub fn visible_tiles(&self) -> BTreeSet<TileCoord> {
        self.visible.keys().copied().collect()
    }

    // =========================================================================
    // Event Loop
    // =========================================================================

    /// Process events until the viewer is unmounted.
    ///
    /// Dropping every [`ViewerHandle`] unmounts the viewer as well, so take a
    /// handle before starting the loop.
    pub async fn run(mut self) {
        while self.lifecycle != Lifecycle::Terminated {
            let event = tokio::select! {
                biased;
                event = self.events_rx.recv() => event,
                _ = self.presence.closed() => None,
            };
            match event {
                Some(event) => self.dispatch(event),
                None => {
                    debug!("All viewer handles dropped");
                    self.unmount();
                }
            }
        }
        debug!("Viewer event loop stopped");
    }

    /// Wait for and process one event. Returns `false` once unmounted.
    pub async fn step(&mut self) -> bool {
        if self.lifecycle == Lifecycle::Terminated {
            return false;
        }
        match self.events_rx.recv().await {
            Some(event) => {
                self.dispatch(event);
                self.lifecycle != Lifecycle::Terminated
            }
            None => false,
        }
    }

    /// Process every event already queued without waiting. Returns the count.
    pub fn drain(&mut self) -> usize {
        let mut processed = 0;
        while self.lifecycle != Lifecycle::Terminated {
            match self.events_rx.try_recv() {
                Ok(event) => {
                    self.dispatch(event);
                    processed += 1;
                }
                Err(_) => break,
            }
        }
        processed
    }

    /// Apply one event.
    pub fn dispatch(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::Select(slide_id) => self.select(slide_id),
            ViewerEvent::DescriptorArrived {
                token,
                slide_id,
                result,
            } => self.descriptor_arrived(token, slide_id, result),
            ViewerEvent::Surface(event) => self.surface_event(event),
            ViewerEvent::TileSettled(settled) => self.tile_settled(settled),
            ViewerEvent::Unmount => self.unmount(),
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Create the surface. `Unmounted -> Idle`.
    pub fn mount(&mut self, container: S::Container) -> Result<(), LifecycleError> {
        match self.lifecycle {
            Lifecycle::Mounted => return Err(LifecycleError::AlreadyMounted),
            Lifecycle::Terminated => return Err(LifecycleError::Terminated),
            Lifecycle::Fresh => {}
        }
        let events = SurfaceEvents::new(self.events_tx.clone());
        self.surface = Some(S::create(container, events));
        self.lifecycle = Lifecycle::Mounted;
        debug!("Viewer mounted");
        Ok(())
    }

    /// React to a change of the selected slide.
    ///
    /// Selecting the slide that is already open or loading is a no-op.
    pub fn select(&mut self, slide_id: Option<SlideId>) {
        if self.lifecycle != Lifecycle::Mounted {
            debug!("Ignoring selection while unmounted");
            return;
        }

        let Some(slide_id) = slide_id else {
            self.clear_selection();
            return;
        };

        if let Some(session) = &self.session {
            let in_progress = matches!(
                session.descriptor,
                DescriptorStatus::Pending(_) | DescriptorStatus::Ready(_)
            );
            if session.slide_id == slide_id && in_progress {
                debug!("Slide {} already selected", slide_id);
                return;
            }
        }

        self.end_session();

        let token = self.next_token();
        info!("Selecting slide {} (session {})", slide_id, token);
        let fetch = self.spawn_descriptor_fetch(token, slide_id.clone());
        self.session = Some(Session {
            token,
            slide_id,
            descriptor: DescriptorStatus::Pending(fetch),
        });
    }

    /// `Select(None)`: back to `Idle` with an empty surface.
    fn clear_selection(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.end_session();
        self.next_token();
        info!("Slide selection cleared");
    }

    /// Leave the current session: close the surface if it shows a slide,
    /// abort an in-flight descriptor fetch and drop all tile state.
    fn end_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match session.descriptor {
            DescriptorStatus::Pending(fetch) => fetch.abort(),
            DescriptorStatus::Ready(_) => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.close();
                }
            }
            DescriptorStatus::Rejected => {}
        }
        self.visible.clear();
        self.scheduler.end_session();
    }

    fn next_token(&mut self) -> SessionToken {
        self.last_token = self.last_token.next();
        self.last_token
    }

    fn spawn_descriptor_fetch(&self, token: SessionToken, slide_id: SlideId) -> AbortHandle {
        let source = Arc::clone(&self.descriptors);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = source.fetch_descriptor(&slide_id).await;
            let _ = events.send(ViewerEvent::DescriptorArrived {
                token,
                slide_id,
                result,
            });
        });
        task.abort_handle()
    }

    /// A descriptor fetch completed. `AwaitingDescriptor -> Open` on success.
    pub fn descriptor_arrived(
        &mut self,
        token: SessionToken,
        slide_id: SlideId,
        result: Result<RawDescriptor, DescriptorFetchError>,
    ) {
        let Some(session) = self.session.as_mut() else {
            debug!("Discarding descriptor for slide {}: no selection", slide_id);
            return;
        };
        if session.token != token || !matches!(session.descriptor, DescriptorStatus::Pending(_)) {
            debug!(
                "Discarding stale descriptor for slide {} (session {}, current {})",
                slide_id, token, session.token
            );
            return;
        }

        let raw = match result {
            Ok(raw) => raw,
            Err(source) => {
                warn!("Descriptor fetch for slide {} failed: {}", slide_id, source);
                session.descriptor = DescriptorStatus::Rejected;
                self.report(ViewerError::DescriptorFetch {
                    slide_id: slide_id.to_string(),
                    source,
                });
                return;
            }
        };

        let descriptor = match validate(slide_id.clone(), &raw) {
            Ok(descriptor) => Arc::new(descriptor),
            Err(source) => {
                warn!("Rejecting descriptor for slide {}: {}", slide_id, source);
                session.descriptor = DescriptorStatus::Rejected;
                self.report(ViewerError::InvalidDescriptor {
                    slide_id: slide_id.to_string(),
                    source,
                });
                return;
            }
        };

        info!(
            "Opening slide {} ({}x{}, levels {}..={}, tile {}px)",
            slide_id,
            descriptor.width(),
            descriptor.height(),
            descriptor.min_level(),
            descriptor.max_level(),
            descriptor.tile_size()
        );
        session.descriptor = DescriptorStatus::Ready(Arc::clone(&descriptor));
        self.scheduler.begin_session(token, slide_id);
        if let Some(surface) = self.surface.as_mut() {
            surface.open(TileSource::new(token, descriptor));
        }
    }

    fn surface_event(&mut self, event: SurfaceEvent) {
        match event {
            SurfaceEvent::ViewportChanged {
                token,
                level,
                viewport,
            } => self.viewport_changed(token, level, viewport),
            SurfaceEvent::OpenFailed { token, reason } => self.open_failed(token, reason),
        }
    }

    /// Request the tiles covering `viewport` and release the ones that left it.
    pub fn viewport_changed(&mut self, token: SessionToken, level: u32, viewport: Rect) {
        let Some(descriptor) = self.current_descriptor(token) else {
            debug!("Discarding stale viewport change (session {})", token);
            return;
        };

        let wanted = match tiles_for_viewport(&descriptor, level, viewport) {
            Ok(tiles) => tiles,
            Err(e) => {
                error!("Surface requested an unaddressable viewport: {}", e);
                return;
            }
        };

        let gone: Vec<TileCoord> = self
            .visible
            .keys()
            .filter(|coord| !wanted.contains(coord))
            .copied()
            .collect();
        for coord in gone {
            if let Some(handle) = self.visible.remove(&coord) {
                self.scheduler.cancel(&handle);
            }
        }

        let slide_id = descriptor.slide_id().clone();
        for coord in wanted {
            if self.visible.contains_key(&coord) {
                continue;
            }
            let Some(requested) = self.scheduler.request(TileKey::new(slide_id.clone(), coord))
            else {
                continue;
            };
            self.visible.insert(coord, requested.handle);
            if let (Some(data), Some(surface)) = (requested.cached, self.surface.as_mut()) {
                surface.tile_loaded(coord, data);
            }
        }
        debug!(
            "Viewport at level {}: {} tile(s) visible, {} pending",
            level,
            self.visible.len(),
            self.scheduler.pending()
        );
    }

    /// The surface could not display the opened slide. Back to `Idle`.
    fn open_failed(&mut self, token: SessionToken, reason: String) {
        if self.current_descriptor(token).is_none() {
            debug!("Discarding stale open failure (session {})", token);
            return;
        }
        let slide_id = self
            .slide_id()
            .map(ToString::to_string)
            .unwrap_or_default();
        warn!("Surface failed to open slide {}: {}", slide_id, reason);
        self.end_session();
        self.next_token();
        self.report(ViewerError::OpenFailed { slide_id, reason });
    }

    fn tile_settled(&mut self, settled: TileSettled) {
        let Some(notice) = self.scheduler.settle(settled) else {
            return;
        };
        let Some(surface) = self.surface.as_mut() else {
            return;
        };
        match notice {
            TileNotice::Loaded { coord, data } => surface.tile_loaded(coord, data),
            TileNotice::Failed { coord, .. } => surface.tile_failed(coord),
        }
    }

    /// Destroy the surface and stop for good. Idempotent.
    pub fn unmount(&mut self) {
        if self.lifecycle == Lifecycle::Terminated {
            return;
        }
        if let Some(Session {
            descriptor: DescriptorStatus::Pending(fetch),
            ..
        }) = self.session.take()
        {
            fetch.abort();
        }
        self.visible.clear();
        self.scheduler.end_session();
        self.next_token();

        if let Some(surface) = self.surface.take() {
            surface.destroy();
        }
        self.lifecycle = Lifecycle::Terminated;
        info!("Viewer unmounted");
    }

    fn current_descriptor(&self, token: SessionToken) -> Option<Arc<PyramidDescriptor>> {
        let session = self.session.as_ref()?;
        if session.token != token {
            return None;
        }
        match &session.descriptor {
            DescriptorStatus::Ready(descriptor) => Some(Arc::clone(descriptor)),
            _ => None,
        }
    }

    fn report(&self, error: ViewerError) {
        if self.errors.send(error).is_err() {
            debug!("Error channel closed");
        }
    }
}
