//! Namespaced, delegated listener registry
//!
//! Every binding is keyed by `(selector, event type, namespace)` and lives at
//! document scope. Dispatch walks the event's propagation path and matches
//! selectors against whatever elements are there *now*, so a host re-render
//! that swaps out a button never leaves a stale or missing handler behind.

use crate::dom::{Document, DomEvent, Selector};
use crate::error::OverlayResult;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Deduplication key for a binding
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub selector: Selector,
    pub event_type: String,
    pub namespace: String,
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} @ {}", self.event_type, self.namespace, self.selector)
    }
}

/// What a call to [`ListenerRegistry::bind`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// No binding existed under the key
    Attached,
    /// A binding under the same key was removed first
    Replaced,
}

struct Binding<H> {
    key: BindingKey,
    handler: H,
}

/// Registry of delegated listeners
///
/// The handler type is left to the owner: the coordinator stores plain action
/// values and interprets them after dispatch.
pub struct ListenerRegistry<H> {
    bindings: Vec<Binding<H>>,
}

impl<H> ListenerRegistry<H> {
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Bind `handler`, replacing any binding under the same key
    pub fn bind(
        &mut self,
        selector: &str,
        event_type: &str,
        namespace: &str,
        handler: H,
    ) -> OverlayResult<BindOutcome> {
        let selector = Selector::parse(selector)?;
        Ok(self.bind_selector(selector, event_type, namespace, handler))
    }

    pub fn bind_selector(
        &mut self,
        selector: Selector,
        event_type: &str,
        namespace: &str,
        handler: H,
    ) -> BindOutcome {
        let key = BindingKey {
            selector,
            event_type: event_type.to_string(),
            namespace: namespace.to_string(),
        };

        let before = self.bindings.len();
        self.bindings.retain(|b| b.key != key);
        let outcome = if self.bindings.len() < before {
            BindOutcome::Replaced
        } else {
            BindOutcome::Attached
        };

        debug!("Listener {:?}: {}", outcome, key);
        self.bindings.push(Binding { key, handler });
        outcome
    }

    /// Remove the binding under exactly this key
    pub fn unbind(&mut self, selector: &str, event_type: &str, namespace: &str) -> bool {
        let Ok(selector) = Selector::parse(selector) else {
            return false;
        };
        let before = self.bindings.len();
        self.bindings.retain(|b| {
            !(b.key.selector == selector
                && b.key.event_type == event_type
                && b.key.namespace == namespace)
        });
        self.bindings.len() < before
    }

    /// Remove every binding in `namespace` or any of its sub-namespaces
    /// (`scrim` covers `scrim.surface.x`). Returns how many were removed.
    pub fn unbind_namespace(&mut self, namespace: &str) -> usize {
        let prefix = format!("{namespace}.");
        let before = self.bindings.len();
        self.bindings
            .retain(|b| b.key.namespace != namespace && !b.key.namespace.starts_with(&prefix));
        let removed = before - self.bindings.len();
        if removed > 0 {
            debug!("Removed {} listener(s) in namespace '{}'", removed, namespace);
        }
        removed
    }

    pub fn is_bound(&self, selector: &str, event_type: &str, namespace: &str) -> bool {
        let Ok(selector) = Selector::parse(selector) else {
            return false;
        };
        self.bindings.iter().any(|b| {
            b.key.selector == selector && b.key.event_type == event_type && b.key.namespace == namespace
        })
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Handlers that fire for `event`, in propagation order.
    ///
    /// Each binding fires at most once per event, at the nearest element of
    /// the path its selector matches. An event whose target is no longer in
    /// the document matches nothing.
    pub fn dispatch(&self, doc: &Document, event: &DomEvent) -> Vec<&H> {
        let mut fired = HashSet::new();
        let mut handlers = Vec::new();

        for node in doc.path(event.target) {
            for (index, binding) in self.bindings.iter().enumerate() {
                if binding.key.event_type != event.event_type || fired.contains(&index) {
                    continue;
                }
                if doc.matches(node, &binding.key.selector) {
                    fired.insert(index);
                    handlers.push(&binding.handler);
                }
            }
        }

        handlers
    }
}

impl<H> Default for ListenerRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
