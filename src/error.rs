//! Error types for the overlay coordinator

use crate::surface::{SurfaceId, SurfaceState};

/// Result type for overlay operations
pub type OverlayResult<T> = std::result::Result<T, OverlayError>;

/// Overlay-specific error types
#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("Surface with ID '{0}' is already live")]
    DuplicateId(SurfaceId),

    #[error("Surface with ID '{0}' not found")]
    NotFound(SurfaceId),

    #[error("Template '{0}' is not available")]
    MissingTemplate(String),

    #[error("Precondition check failed: {0}")]
    PreconditionCheckFailed(String),

    #[error("Cannot {operation} surface '{id}' while it is {state}")]
    InvalidTransition {
        id: SurfaceId,
        state: SurfaceState,
        operation: &'static str,
    },

    #[error("Surface '{active}' already holds modal focus")]
    ModalBusy { active: SurfaceId },

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Rendering engine error: {0}")]
    Engine(#[from] anyhow::Error),
}
