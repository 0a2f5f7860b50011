//! Surface that draws nothing.
//!
//! Requests a single fixed viewport whenever a slide is opened and tallies
//! the outcome of every tile. Progress is published on a `watch` channel so a
//! caller can wait until the viewport has settled.

use std::collections::HashSet;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info};

use super::{DrawingSurface, TileSource};
use crate::pyramid::{tiles_for_viewport, Rect, TileCoord};
use crate::viewer::SurfaceEvents;

/// Progress of the headless surface for the currently open slide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessReport {
    /// Slide currently open
    pub slide_id: Option<String>,

    /// Level being drawn
    pub level: Option<u32>,

    /// Tiles covering the requested viewport
    pub expected: usize,

    /// Tiles drawn
    pub loaded: usize,

    /// Placeholders drawn for tiles that failed
    pub placeholders: usize,

    /// Total bytes of drawn tiles
    pub bytes: usize,

    /// Number of `open` calls over the surface's lifetime
    pub opened: usize,

    /// Number of `close` calls over the surface's lifetime
    pub closed: usize,
}

impl HeadlessReport {
    /// Whether every expected tile was drawn or replaced by a placeholder.
    pub fn is_settled(&self) -> bool {
        self.level.is_some() && self.loaded + self.placeholders >= self.expected
    }
}

/// Binding for a [`HeadlessSurface`].
pub struct HeadlessContainer {
    name: String,
    level: Option<u32>,
    viewport: Option<Rect>,
    report: watch::Sender<HeadlessReport>,
}

impl HeadlessContainer {
    /// Create a container.
    ///
    /// `level` defaults to full resolution and `viewport` to the whole level.
    pub fn new(
        name: impl Into<String>,
        level: Option<u32>,
        viewport: Option<Rect>,
    ) -> (Self, watch::Receiver<HeadlessReport>) {
        let (report, rx) = watch::channel(HeadlessReport::default());
        (
            Self {
                name: name.into(),
                level,
                viewport,
                report,
            },
            rx,
        )
    }
}

/// Drawing surface without pixels.
pub struct HeadlessSurface {
    container: HeadlessContainer,
    events: SurfaceEvents,
    source: Option<TileSource>,
    drawn: HashSet<TileCoord>,
}

impl DrawingSurface for HeadlessSurface {
    type Container = HeadlessContainer;

    fn create(container: HeadlessContainer, events: SurfaceEvents) -> Self {
        debug!("Creating headless surface '{}'", container.name);
        Self {
            container,
            events,
            source: None,
            drawn: HashSet::new(),
        }
    }

    fn open(&mut self, source: TileSource) {
        let descriptor = source.descriptor();
        let level = self.container.level.unwrap_or(descriptor.max_level());
        let slide_id = descriptor.slide_id().to_string();

        self.drawn.clear();
        self.container.report.send_modify(|r| {
            r.opened += 1;
            r.slide_id = Some(slide_id.clone());
            r.level = None;
            r.expected = 0;
            r.loaded = 0;
            r.placeholders = 0;
            r.bytes = 0;
        });

        let viewport = match self.container.viewport {
            Some(viewport) => viewport,
            None => match source.level_dimensions(level) {
                Ok((w, h)) => Rect::new(0.0, 0.0, w as f64, h as f64),
                Err(e) => {
                    self.events.open_failed(source.token(), e.to_string());
                    return;
                }
            },
        };

        let expected = match tiles_for_viewport(descriptor, level, viewport) {
            Ok(tiles) => tiles.len(),
            Err(e) => {
                self.events.open_failed(source.token(), e.to_string());
                return;
            }
        };

        info!(
            "Opened slide {} at level {} ({} tile(s) in view)",
            slide_id, level, expected
        );
        self.container.report.send_modify(|r| {
            r.level = Some(level);
            r.expected = expected;
        });
        self.events.viewport_changed(source.token(), level, viewport);
        self.source = Some(source);
    }

    fn close(&mut self) {
        if let Some(source) = self.source.take() {
            debug!("Closing slide {}", source.descriptor().slide_id());
        }
        self.drawn.clear();
        self.container.report.send_modify(|r| {
            r.closed += 1;
            r.slide_id = None;
            r.level = None;
            r.expected = 0;
            r.loaded = 0;
            r.placeholders = 0;
            r.bytes = 0;
        });
    }

    fn destroy(self) {
        debug!("Destroying headless surface '{}'", self.container.name);
    }

    fn tile_loaded(&mut self, coord: TileCoord, data: Bytes) {
        if self.drawn.insert(coord) {
            self.container.report.send_modify(|r| {
                r.loaded += 1;
                r.bytes += data.len();
            });
        }
    }

    fn tile_failed(&mut self, coord: TileCoord) {
        if self.drawn.insert(coord) {
            self.container.report.send_modify(|r| r.placeholders += 1);
        }
    }
}
