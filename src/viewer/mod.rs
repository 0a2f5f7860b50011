//! Viewer lifecycle.
//!
//! - [`ViewerController`]: owns the drawing surface and the current session
//! - [`ViewerEvent`]: everything the control task reacts to
//! - [`SessionToken`]: tags asynchronous work with the selection it belongs to
//! - [`ViewerHandle`], [`SurfaceEvents`]: senders for the application and the surface

mod controller;
mod events;
mod session;

pub use controller::{ViewerController, ViewerState};
pub use events::{SurfaceEvent, SurfaceEvents, ViewerEvent, ViewerHandle};
pub use session::SessionToken;
