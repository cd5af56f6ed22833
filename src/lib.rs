//! Scrim: client-side overlay lifecycle coordination.
//!
//! Dialog surfaces share one reference-counted backdrop, at most one of them
//! holds modal focus, and dependent actions run only once the rendering engine
//! reports a surface fully hidden. The host page is modelled by [`dom`]; the
//! rendering engine sits behind [`engine::RenderEngine`].

pub mod ack;
pub mod backdrop;
pub mod config;
pub mod coordinator;
pub mod dom;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod listeners;
pub mod sequencer;
pub mod surface;

pub use coordinator::{CleanupReport, OverlayCoordinator, SweepReport, UiAction};
pub use error::{OverlayError, OverlayResult};
pub use events::OverlayEvent;
pub use gate::{Precondition, PreconditionGate, PreconditionResult, ProceedReason};
pub use surface::{SurfaceContent, SurfaceId, SurfaceOutcome, SurfaceState};
