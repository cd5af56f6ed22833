//! Shared backdrop (dimming layer) ownership
//!
//! The backdrop is the only shared mutable resource in the overlay system.
//! Dialog surfaces never touch its node directly; they go through
//! [`BackdropManager::acquire`] and [`BackdropManager::release`].
//!
//! # Invariants
//!
//! - `ref_count` never underflows; extra releases clamp at zero.
//! - A tracked backdrop node exists iff `ref_count > 0`.
//! - After [`BackdropManager::reconcile`], at most one element carrying the
//!   backdrop class is in the document, and only while something is visible.

use crate::dom::{Document, ElementSpec, NodeId, Selector};
use crate::error::OverlayResult;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_BACKDROP_CLASS: &str = "modal-backdrop";

/// What a reconcile sweep changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Backdrop elements removed because nothing tracked them
    pub orphans_removed: usize,
    /// Whether the tracked backdrop was rebuilt after the host destroyed it
    pub recreated: bool,
    /// Reference count before correction, when it had drifted
    pub corrected_from: Option<usize>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.orphans_removed == 0 && !self.recreated && self.corrected_from.is_none()
    }
}

/// Reference-counted owner of the backdrop element
#[derive(Debug)]
pub struct BackdropManager {
    class: String,
    selector: Selector,
    ref_count: usize,
    node: Option<NodeId>,
}

impl BackdropManager {
    pub fn new(class: impl Into<String>) -> OverlayResult<Self> {
        let class = class.into();
        let selector = Selector::parse(&format!(".{class}"))?;
        Ok(Self {
            class,
            selector,
            ref_count: 0,
            node: None,
        })
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    /// Whether the tracked backdrop element is currently in the document
    pub fn is_present(&self, doc: &Document) -> bool {
        self.node.is_some_and(|n| doc.contains(n))
    }

    /// Take a reference; creates the backdrop on the 0 → 1 transition
    pub fn acquire(&mut self, doc: &mut Document) {
        self.ref_count += 1;
        if self.ref_count == 1 || !self.is_present(doc) {
            self.create(doc);
        }
        debug!("Backdrop acquired (ref_count={})", self.ref_count);
    }

    /// Drop a reference; removes the backdrop on the 1 → 0 transition.
    /// Releasing at zero is a no-op.
    pub fn release(&mut self, doc: &mut Document) {
        if self.ref_count == 0 {
            debug!("Backdrop release at zero ignored");
            self.destroy(doc);
            return;
        }
        self.ref_count -= 1;
        if self.ref_count == 0 {
            self.destroy(doc);
        }
        debug!("Backdrop released (ref_count={})", self.ref_count);
    }

    /// Bring the document and the count back in line with `visible`, the
    /// number of surfaces that currently depend on a backdrop.
    pub fn reconcile(&mut self, doc: &mut Document, visible: usize) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        if self.ref_count != visible {
            warn!(
                "Backdrop ref_count drifted: tracked {}, visible {}",
                self.ref_count, visible
            );
            report.corrected_from = Some(self.ref_count);
            self.ref_count = visible;
        }

        if visible > 0 && !self.is_present(doc) {
            self.create(doc);
            report.recreated = true;
        }
        if visible == 0 {
            self.node = None;
        }

        let keep = if visible > 0 { self.node } else { None };
        for orphan in doc.query_all(&self.selector) {
            if Some(orphan) != keep && doc.remove(orphan) {
                report.orphans_removed += 1;
            }
        }

        if !report.is_clean() {
            debug!("Backdrop reconcile: {:?}", report);
        }
        report
    }

    /// Forget everything and remove the tracked node
    pub fn teardown(&mut self, doc: &mut Document) {
        self.ref_count = 0;
        self.destroy(doc);
    }

    fn create(&mut self, doc: &mut Document) {
        let spec = ElementSpec::new("div")
            .with_class(self.class.clone())
            .with_attr("data-scrim", "backdrop");
        self.node = doc.append(doc.root(), spec);
    }

    fn destroy(&mut self, doc: &mut Document) {
        if let Some(node) = self.node.take() {
            doc.remove(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn backdrop_count(doc: &Document, manager: &BackdropManager) -> usize {
        doc.query_all(manager.selector()).len()
    }

    #[test]
    fn test_acquire_release_lifecycle() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();

        backdrop.acquire(&mut doc);
        backdrop.acquire(&mut doc);
        assert_eq!(backdrop.ref_count(), 2);
        assert_eq!(backdrop_count(&doc, &backdrop), 1);

        backdrop.release(&mut doc);
        assert!(backdrop.is_present(&doc));

        backdrop.release(&mut doc);
        assert_eq!(backdrop.ref_count(), 0);
        assert!(!backdrop.is_present(&doc));
        assert_eq!(backdrop_count(&doc, &backdrop), 0);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();

        for _ in 0..5 {
            backdrop.release(&mut doc);
        }
        assert_eq!(backdrop.ref_count(), 0);

        backdrop.acquire(&mut doc);
        assert_eq!(backdrop.ref_count(), 1);
        assert!(backdrop.is_present(&doc));
    }

    #[test]
    fn test_presence_tracks_ref_count_over_arbitrary_sequences() {
        let mut rng = StdRng::seed_from_u64(0x5c21);
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();
        let mut holders = 0usize;
        let mut host_removed = false;

        for _ in 0..1000 {
            match rng.gen_range(0..10u32) {
                0..=3 => {
                    backdrop.acquire(&mut doc);
                    holders += 1;
                    host_removed = false;
                }
                4..=6 => {
                    backdrop.release(&mut doc);
                    holders = holders.saturating_sub(1);
                }
                7 | 8 => {
                    // Host code wipes the node out from under the manager
                    if let Some(node) = backdrop.node() {
                        host_removed |= doc.remove(node);
                    }
                }
                _ => {
                    let report = backdrop.reconcile(&mut doc, holders);
                    assert_eq!(report.corrected_from, None);
                    assert_eq!(report.recreated, host_removed && holders > 0);
                    host_removed = false;
                }
            }

            assert_eq!(backdrop.ref_count(), holders);
            if holders == 0 {
                host_removed = false;
            }
            if !host_removed {
                assert_eq!(backdrop.is_present(&doc), holders > 0);
                assert_eq!(backdrop_count(&doc, &backdrop), usize::from(holders > 0));
            } else {
                assert_eq!(backdrop_count(&doc, &backdrop), 0);
            }
        }
    }

    #[test]
    fn test_reconcile_removes_orphans() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();

        // Host code left stray backdrops behind
        doc.append(doc.root(), ElementSpec::new("div").with_class(DEFAULT_BACKDROP_CLASS));
        doc.append(doc.root(), ElementSpec::new("div").with_class(DEFAULT_BACKDROP_CLASS));

        let report = backdrop.reconcile(&mut doc, 0);
        assert_eq!(report.orphans_removed, 2);
        assert_eq!(backdrop_count(&doc, &backdrop), 0);

        // While a surface is visible only the tracked node survives
        backdrop.acquire(&mut doc);
        doc.append(doc.root(), ElementSpec::new("div").with_class(DEFAULT_BACKDROP_CLASS));
        let report = backdrop.reconcile(&mut doc, 1);
        assert_eq!(report.orphans_removed, 1);
        assert!(backdrop.is_present(&doc));
        assert_eq!(backdrop_count(&doc, &backdrop), 1);
    }

    #[test]
    fn test_reconcile_corrects_drift() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();
        backdrop.acquire(&mut doc);
        backdrop.acquire(&mut doc);

        // Both surfaces were evicted without a release
        let report = backdrop.reconcile(&mut doc, 0);
        assert_eq!(report.corrected_from, Some(2));
        assert_eq!(backdrop.ref_count(), 0);
        assert!(!backdrop.is_present(&doc));
        assert_eq!(backdrop_count(&doc, &backdrop), 0);
    }

    #[test]
    fn test_reconcile_recreates_destroyed_backdrop() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();
        backdrop.acquire(&mut doc);

        let node = backdrop.node().unwrap();
        doc.remove(node);

        let report = backdrop.reconcile(&mut doc, 1);
        assert!(report.recreated);
        assert!(backdrop.is_present(&doc));
        assert_eq!(backdrop.ref_count(), 1);
    }

    #[test]
    fn test_reconcile_is_clean_when_consistent() {
        let mut doc = Document::new();
        let mut backdrop = BackdropManager::new(DEFAULT_BACKDROP_CLASS).unwrap();
        assert!(backdrop.reconcile(&mut doc, 0).is_clean());

        backdrop.acquire(&mut doc);
        assert!(backdrop.reconcile(&mut doc, 1).is_clean());
    }
}
