//! Close-completion sequencing
//!
//! Dependent actions must run after a surface has *finished* closing, not
//! when the close was requested. Subscriptions here are one-shot and scoped to
//! the surface generation they were registered against, so a dialog that is
//! rebuilt while an old close is still in flight never triggers the old
//! lifecycle's callbacks.

use crate::surface::{SurfaceId, SurfaceOutcome, SurfaceState};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Snapshot handed to `on_fully_hidden` callbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullyHidden {
    pub surface_id: SurfaceId,
    pub generation: u64,
    pub state: SurfaceState,
    pub outcome: SurfaceOutcome,
    pub backdrop_ref_count: usize,
}

/// One-shot callback run after a surface is fully hidden
pub type HiddenCallback = Box<dyn FnOnce(&FullyHidden)>;

struct Subscription {
    generation: u64,
    callback: HiddenCallback,
}

/// Registry of pending close-completion subscribers
#[derive(Default)]
pub struct LifecycleSequencer {
    subscriptions: HashMap<SurfaceId, Vec<Subscription>>,
}

impl LifecycleSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, id: &SurfaceId, generation: u64, callback: HiddenCallback) {
        self.subscriptions
            .entry(id.clone())
            .or_default()
            .push(Subscription {
                generation,
                callback,
            });
    }

    /// Drop subscriptions registered against generations older than
    /// `current`. Returns how many were discarded.
    pub fn discard_stale(&mut self, id: &SurfaceId, current: u64) -> usize {
        let Some(subs) = self.subscriptions.get_mut(id) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|s| s.generation >= current);
        let discarded = before - subs.len();
        if subs.is_empty() {
            self.subscriptions.remove(id);
        }
        if discarded > 0 {
            debug!(
                "Discarded {} stale close subscriber(s) for '{}' (generation {})",
                discarded, id, current
            );
        }
        discarded
    }

    /// Run every subscriber for the snapshot's surface and generation, then
    /// forget them. Returns how many ran.
    pub fn complete(&mut self, hidden: &FullyHidden) -> usize {
        debug_assert_eq!(hidden.state, SurfaceState::Closed);

        self.discard_stale(&hidden.surface_id, hidden.generation);
        let Some(subs) = self.subscriptions.remove(&hidden.surface_id) else {
            return 0;
        };

        let (ready, later): (Vec<_>, Vec<_>) = subs
            .into_iter()
            .partition(|s| s.generation == hidden.generation);
        if !later.is_empty() {
            self.subscriptions.insert(hidden.surface_id.clone(), later);
        }

        let count = ready.len();
        for sub in ready {
            (sub.callback)(hidden);
        }
        count
    }

    pub fn pending(&self, id: &SurfaceId) -> usize {
        self.subscriptions.get(id).map_or(0, Vec::len)
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }
}

impl fmt::Debug for LifecycleSequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: HashMap<&SurfaceId, usize> = self
            .subscriptions
            .iter()
            .map(|(id, subs)| (id, subs.len()))
            .collect();
        f.debug_struct("LifecycleSequencer")
            .field("pending", &pending)
            .finish()
    }
}
