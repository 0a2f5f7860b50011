//! Events delivered to the viewer's control task.
//!
//! Everything that changes viewer state arrives as a [`ViewerEvent`] on a
//! single channel: selections from the application, descriptor and tile
//! completions from spawned tasks, and notifications from the drawing surface.
//! Events produced by asynchronous work carry the [`SessionToken`] they were
//! issued under.

use tokio::sync::{mpsc, watch};

use crate::error::DescriptorFetchError;
use crate::pyramid::{RawDescriptor, Rect, SlideId};
use crate::scheduler::TileSettled;

use super::session::SessionToken;

/// Input to the viewer controller.
#[derive(Debug)]
pub enum ViewerEvent {
    /// The application changed the selected slide
    Select(Option<SlideId>),

    /// A descriptor fetch completed
    DescriptorArrived {
        token: SessionToken,
        slide_id: SlideId,
        result: Result<RawDescriptor, DescriptorFetchError>,
    },

    /// The drawing surface reported something
    Surface(SurfaceEvent),

    /// A tile fetch attempt completed
    TileSettled(TileSettled),

    /// The application is tearing the viewer down
    Unmount,
}

/// Notifications from the drawing surface.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    /// The surface wants the tiles of `level` covering `viewport` (level pixels)
    ViewportChanged {
        token: SessionToken,
        level: u32,
        viewport: Rect,
    },

    /// The surface could not display the descriptor it was given
    OpenFailed { token: SessionToken, reason: String },
}

/// Sender handed to a drawing surface on creation.
#[derive(Debug, Clone)]
pub struct SurfaceEvents {
    tx: mpsc::UnboundedSender<ViewerEvent>,
}

impl SurfaceEvents {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ViewerEvent>) -> Self {
        Self { tx }
    }

    /// Report the region the surface is about to draw.
    pub fn viewport_changed(&self, token: SessionToken, level: u32, viewport: Rect) {
        self.send(SurfaceEvent::ViewportChanged {
            token,
            level,
            viewport,
        });
    }

    /// Report that the surface cannot display the current descriptor.
    pub fn open_failed(&self, token: SessionToken, reason: impl Into<String>) {
        self.send(SurfaceEvent::OpenFailed {
            token,
            reason: reason.into(),
        });
    }

    fn send(&self, event: SurfaceEvent) {
        // A closed channel means the viewer is gone; nothing left to notify
        let _ = self.tx.send(ViewerEvent::Surface(event));
    }
}

/// Handle the surrounding application uses to drive a running viewer.
///
/// A running viewer unmounts itself once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct ViewerHandle {
    tx: mpsc::UnboundedSender<ViewerEvent>,
    _presence: watch::Receiver<()>,
}

impl ViewerHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ViewerEvent>, presence: watch::Receiver<()>) -> Self {
        Self {
            tx,
            _presence: presence,
        }
    }

    /// Change the selected slide. `None` clears the viewer.
    ///
    /// Returns `false` once the viewer has stopped.
    pub fn select(&self, slide_id: Option<SlideId>) -> bool {
        self.tx.send(ViewerEvent::Select(slide_id)).is_ok()
    }

    /// Tear the viewer down.
    pub fn unmount(&self) -> bool {
        self.tx.send(ViewerEvent::Unmount).is_ok()
    }
}
