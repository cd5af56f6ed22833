//! Overlay events for observers of the coordinator

use crate::backdrop::ReconcileReport;
use crate::gate::{PreconditionResult, ProceedReason};
use crate::surface::{SurfaceId, SurfaceOutcome};
use serde::{Deserialize, Serialize};

/// Events emitted while surfaces move through their lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverlayEvent {
    /// Markup for a surface was built
    SurfaceCreated { surface_id: SurfaceId },

    /// Show requested; waiting on the engine
    SurfaceOpening { surface_id: SurfaceId, generation: u64 },

    /// Surface is presented
    SurfaceOpened { surface_id: SurfaceId },

    /// Close requested; waiting on the engine
    SurfaceClosing {
        surface_id: SurfaceId,
        outcome: SurfaceOutcome,
    },

    /// Close completed and cleanup ran
    SurfaceClosed {
        surface_id: SurfaceId,
        outcome: SurfaceOutcome,
        backdrop_ref_count: usize,
    },

    /// The host removed a live surface's markup
    SurfaceEvicted { surface_id: SurfaceId },

    /// Subscribers from an earlier lifecycle were dropped
    StaleSubscribersDiscarded { surface_id: SurfaceId, count: usize },

    /// A reconcile sweep changed something
    BackdropReconciled {
        orphans_removed: usize,
        recreated: bool,
        corrected_from: Option<usize>,
    },

    /// A click landed on the backdrop and was swallowed
    BackdropClickSwallowed,

    /// User-visible notice
    Notice { message: String },

    /// Trigger activation was dropped
    TriggerIgnored { trigger: String, reason: String },

    /// Precondition check resolved
    PreconditionChecked { result: PreconditionResult },

    /// The dependent action ran
    Proceeded { reason: ProceedReason },

    /// Coordinator released everything it owned
    TornDown,
}

impl OverlayEvent {
    pub fn reconciled(report: &ReconcileReport) -> Self {
        OverlayEvent::BackdropReconciled {
            orphans_removed: report.orphans_removed,
            recreated: report.recreated,
            corrected_from: report.corrected_from,
        }
    }

    /// Get the surface ID associated with this event, if any
    pub fn surface_id(&self) -> Option<&SurfaceId> {
        match self {
            OverlayEvent::SurfaceCreated { surface_id }
            | OverlayEvent::SurfaceOpening { surface_id, .. }
            | OverlayEvent::SurfaceOpened { surface_id }
            | OverlayEvent::SurfaceClosing { surface_id, .. }
            | OverlayEvent::SurfaceClosed { surface_id, .. }
            | OverlayEvent::SurfaceEvicted { surface_id }
            | OverlayEvent::StaleSubscribersDiscarded { surface_id, .. } => Some(surface_id),
            _ => None,
        }
    }
}
