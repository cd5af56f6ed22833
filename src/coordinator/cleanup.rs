//! Idempotent surface cleanup
//!
//! Every close path ends here: engine-reported completion, host eviction,
//! failed show, failed hide, and direct calls from host code. Running it twice
//! for the same surface changes nothing the second time.

use super::{surface_namespace, OverlayCoordinator};
use crate::backdrop::ReconcileReport;
use crate::error::OverlayResult;
use crate::surface::SurfaceId;
use serde::Serialize;
use tracing::debug;

/// What a cleanup pass actually did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// The surface was not yet `Closed` when cleanup started
    pub was_live: bool,
    /// Its markup was still in the document and got removed
    pub unmounted: bool,
    /// A backdrop reference was given back
    pub released: bool,
    pub reconcile: ReconcileReport,
}

impl CleanupReport {
    /// Whether this pass found anything left to clean
    pub fn is_noop(&self) -> bool {
        !self.was_live && !self.unmounted && !self.released && self.reconcile.is_clean()
    }
}

impl OverlayCoordinator {
    /// Tear down the surface's markup, backdrop reference and listeners, then
    /// reconcile the backdrop.
    ///
    /// Leaves the surface record in place as `Closed` so it can be shown
    /// again. Close subscribers are not run from here. An unknown id only
    /// reconciles the backdrop.
    pub fn cleanup(&mut self, id: &SurfaceId) -> OverlayResult<CleanupReport> {
        let mut report = CleanupReport::default();

        if let Some(surface) = self.surfaces.get_mut(id) {
            report.was_live = surface.state().is_live();
            surface.force_closed();

            report.unmounted = surface.unmount(&mut self.doc);
            if surface.holds_backdrop() {
                surface.set_holds_backdrop(false);
                self.backdrop.release(&mut self.doc);
                report.released = true;
            }
            self.listeners.unbind_namespace(&surface_namespace(id));
        } else {
            debug!("Cleanup for unknown surface '{}'", id);
        }

        report.reconcile = self.reconcile_backdrop();
        if !report.is_noop() {
            debug!("Cleaned up '{}': {:?}", id, report);
        }
        Ok(report)
    }
}
