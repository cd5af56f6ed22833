//! Overlay coordinator
//!
//! The coordinator is responsible for:
//! - Building dialog surfaces and keeping their controls bound
//! - Enforcing single modal focus
//! - Owning the shared backdrop through its reference count
//! - Sequencing dependent actions after close completion
//! - Cleaning up on every close path, including host eviction
//!
//! # Invariants
//!
//! - At most one surface is `Opening` or `Open` at a time.
//! - A surface holds at most one backdrop reference, taken on show and given
//!   back by cleanup.
//! - `on_fully_hidden` callbacks run after the surface is `Closed` and its
//!   backdrop reference has been released.

mod cleanup;

pub use cleanup::CleanupReport;

use crate::backdrop::{BackdropManager, ReconcileReport};
use crate::dom::{Document, DomEvent, Selector};
use crate::engine::{EngineNotification, RenderEngine};
use crate::error::{OverlayError, OverlayResult};
use crate::events::OverlayEvent;
use crate::listeners::{BindOutcome, ListenerRegistry};
use crate::sequencer::{FullyHidden, LifecycleSequencer};
use crate::surface::{
    Control, DialogSurface, MessageKind, SurfaceContent, SurfaceId, SurfaceOutcome, SurfaceState,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Root listener namespace; everything the coordinator binds lives under it
pub const NAMESPACE: &str = "scrim";

fn surface_namespace(id: &SurfaceId) -> String {
    format!("{NAMESPACE}.surface.{id}")
}

/// What a delegated listener asks for when it fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    /// A named trigger control was activated
    Trigger(String),
    /// A control inside a surface was activated
    Control { surface: SurfaceId, control: Control },
    /// The backdrop was clicked
    Backdrop,
}

/// Result of a full reconcile sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Surfaces whose markup the host removed while they were live
    pub evicted: Vec<SurfaceId>,
    pub backdrop: ReconcileReport,
}

/// Coordinates dialog surfaces over a shared backdrop
pub struct OverlayCoordinator {
    doc: Document,
    engine: Box<dyn RenderEngine>,
    listeners: ListenerRegistry<UiAction>,
    backdrop: BackdropManager,
    surfaces: BTreeMap<SurfaceId, DialogSurface>,
    sequencer: LifecycleSequencer,
    templates: HashMap<String, SurfaceContent>,
    notices: Vec<String>,
    event_sender: Option<mpsc::UnboundedSender<OverlayEvent>>,
}

impl OverlayCoordinator {
    /// Create a coordinator over an empty document
    pub fn new(engine: Box<dyn RenderEngine>, backdrop_class: &str) -> OverlayResult<Self> {
        Self::with_document(Document::new(), engine, backdrop_class)
    }

    /// Create a coordinator over an existing host document
    pub fn with_document(
        doc: Document,
        engine: Box<dyn RenderEngine>,
        backdrop_class: &str,
    ) -> OverlayResult<Self> {
        let backdrop = BackdropManager::new(backdrop_class)?;
        let mut listeners = ListenerRegistry::new();
        listeners.bind_selector(
            backdrop.selector().clone(),
            "click",
            &format!("{NAMESPACE}.backdrop"),
            UiAction::Backdrop,
        );

        Ok(Self {
            doc,
            engine,
            listeners,
            backdrop,
            surfaces: BTreeMap::new(),
            sequencer: LifecycleSequencer::new(),
            templates: HashMap::new(),
            notices: Vec::new(),
            event_sender: None,
        })
    }

    /// Set the event sender for overlay events
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<OverlayEvent>) {
        self.event_sender = Some(sender);
    }

    pub(crate) fn event_sender(&self) -> Option<mpsc::UnboundedSender<OverlayEvent>> {
        self.event_sender.clone()
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutable access for the host page. Anything done here is picked up by
    /// the next dispatch or reconcile.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn backdrop(&self) -> &BackdropManager {
        &self.backdrop
    }

    pub fn listeners(&self) -> &ListenerRegistry<UiAction> {
        &self.listeners
    }

    pub fn surface(&self, id: &SurfaceId) -> Option<&DialogSurface> {
        self.surfaces.get(id)
    }

    pub fn state(&self, id: &SurfaceId) -> Option<SurfaceState> {
        self.surfaces.get(id).map(DialogSurface::state)
    }

    /// The surface currently holding modal focus, if any
    pub fn active_surface(&self) -> Option<&SurfaceId> {
        self.surfaces
            .values()
            .find(|s| s.state().holds_focus())
            .map(DialogSurface::id)
    }

    /// Notices surfaced to the user so far
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn pending_subscribers(&self, id: &SurfaceId) -> usize {
        self.sequencer.pending(id)
    }

    pub fn register_template(&mut self, name: impl Into<String>, content: SurfaceContent) {
        self.templates.insert(name.into(), content);
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Bind a delegated listener under a namespace of the coordinator's own
    pub fn bind(
        &mut self,
        selector: &str,
        event_type: &str,
        namespace: &str,
        action: UiAction,
    ) -> OverlayResult<BindOutcome> {
        let namespace = format!("{NAMESPACE}.{namespace}");
        self.listeners.bind(selector, event_type, &namespace, action)
    }

    /// Remove every binding under one of the coordinator's namespaces
    pub fn unbind_namespace(&mut self, namespace: &str) -> usize {
        self.listeners
            .unbind_namespace(&format!("{NAMESPACE}.{namespace}"))
    }

    /// Build the markup for `id`.
    ///
    /// Fails with [`OverlayError::DuplicateId`] while a surface with the same
    /// id is live. Re-creating a closed surface discards close subscribers
    /// left over from its earlier lifecycles.
    pub fn create(&mut self, id: impl Into<SurfaceId>, content: SurfaceContent) -> OverlayResult<()> {
        let id = id.into();
        Selector::id(id.as_str())?;

        let discarded = match self.surfaces.get_mut(&id) {
            Some(existing) if existing.state().is_live() => {
                return Err(OverlayError::DuplicateId(id));
            }
            Some(existing) => {
                existing.set_content(content);
                self.sequencer.discard_stale(&id, existing.generation() + 1)
            }
            None => {
                self.surfaces
                    .insert(id.clone(), DialogSurface::new(id.clone(), content));
                0
            }
        };
        if discarded > 0 {
            self.emit(OverlayEvent::StaleSubscribersDiscarded {
                surface_id: id.clone(),
                count: discarded,
            });
        }

        self.mount(&id)?;
        debug!("Created surface '{}'", id);
        self.emit(OverlayEvent::SurfaceCreated { surface_id: id });
        Ok(())
    }

    /// Create the surface from a registered template and show it.
    ///
    /// Fails with [`OverlayError::DuplicateId`] while the surface is live,
    /// before the template is looked up. A missing template runs `on_cancel`,
    /// surfaces a notice, and leaves no surface or backdrop behind.
    pub fn open_from_template<F>(
        &mut self,
        id: impl Into<SurfaceId>,
        template: &str,
        on_cancel: F,
    ) -> OverlayResult<()>
    where
        F: FnOnce(&OverlayError),
    {
        let id = id.into();
        if self.state(&id).is_some_and(SurfaceState::is_live) {
            return Err(OverlayError::DuplicateId(id));
        }
        let Some(content) = self.templates.get(template).cloned() else {
            let err = OverlayError::MissingTemplate(template.to_string());
            warn!("Cannot open '{}': {}", id, err);
            if self.surfaces.contains_key(&id) {
                self.cleanup(&id)?;
            }
            self.notice(format!("The dialog '{template}' could not be loaded."));
            on_cancel(&err);
            return Err(err);
        };

        self.create(id.clone(), content)?;
        self.show(&id)
    }

    /// Present a closed surface.
    ///
    /// Rejected while any surface holds modal focus, and while this surface is
    /// anything but `Closed`. Markup removed by an earlier cleanup or by the
    /// host is rebuilt from the stored content.
    pub fn show(&mut self, id: &SurfaceId) -> OverlayResult<()> {
        if let Some(active) = self.active_surface() {
            if active != id {
                return Err(OverlayError::ModalBusy {
                    active: active.clone(),
                });
            }
        }

        let surface = self
            .surfaces
            .get_mut(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        surface.transition(SurfaceState::Opening, "show")?;
        let generation = surface.begin_lifecycle();

        let discarded = self.sequencer.discard_stale(id, generation);
        if discarded > 0 {
            self.emit(OverlayEvent::StaleSubscribersDiscarded {
                surface_id: id.clone(),
                count: discarded,
            });
        }

        self.mount(id)?;
        self.emit(OverlayEvent::SurfaceOpening {
            surface_id: id.clone(),
            generation,
        });

        if let Err(e) = self.engine.show(id) {
            warn!("Engine failed to show '{}': {}", id, e);
            self.cleanup(id)?;
            self.notice(format!("The dialog '{id}' could not be shown."));
            return Err(OverlayError::Engine(e));
        }

        self.backdrop.acquire(&mut self.doc);
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.set_holds_backdrop(true);
        }

        if !self.engine.confirms_show() {
            self.mark_open(id);
        }
        Ok(())
    }

    /// Ask the engine to hide an open surface.
    ///
    /// A no-op while the surface is already `Closing` or `Closed`. The
    /// surface only reaches `Closed` when the engine reports completion.
    pub fn request_close(&mut self, id: &SurfaceId, outcome: SurfaceOutcome) -> OverlayResult<()> {
        let surface = self
            .surfaces
            .get_mut(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;

        match surface.state() {
            SurfaceState::Closing | SurfaceState::Closed => {
                debug!("Close for '{}' ignored: already {}", id, surface.state());
                return Ok(());
            }
            _ => {}
        }

        surface.transition(SurfaceState::Closing, "close")?;
        if surface.outcome() == SurfaceOutcome::Pending {
            surface.set_outcome(outcome);
        }
        let outcome = surface.outcome();
        self.emit(OverlayEvent::SurfaceClosing {
            surface_id: id.clone(),
            outcome,
        });

        if let Err(e) = self.engine.hide(id) {
            // Nothing will ever report completion; close out now so the
            // overlay cannot get stuck on screen.
            warn!("Engine failed to hide '{}': {}", id, e);
            self.finish_hidden(id)?;
            return Err(OverlayError::Engine(e));
        }
        if let Some(surface) = self.surfaces.get_mut(id) {
            surface.hide_sent();
        }
        Ok(())
    }

    /// Register a one-shot callback for when `id` has fully closed.
    ///
    /// While the surface is live the callback belongs to the current
    /// lifecycle; on a closed surface it waits for the next one.
    pub fn on_fully_hidden<F>(&mut self, id: &SurfaceId, callback: F) -> OverlayResult<()>
    where
        F: FnOnce(&FullyHidden) + 'static,
    {
        let surface = self
            .surfaces
            .get(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        let generation = if surface.state().is_live() {
            surface.generation()
        } else {
            surface.generation() + 1
        };
        self.sequencer.subscribe(id, generation, Box::new(callback));
        Ok(())
    }

    /// Record the outcome of the current lifecycle without closing
    pub fn set_outcome(&mut self, id: &SurfaceId, outcome: SurfaceOutcome) -> OverlayResult<()> {
        let surface = self
            .surfaces
            .get_mut(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        surface.set_outcome(outcome);
        Ok(())
    }

    pub fn show_message(&mut self, id: &SurfaceId, kind: MessageKind, text: &str) -> OverlayResult<bool> {
        let surface = self
            .surfaces
            .get(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        Ok(surface.show_message(&mut self.doc, kind, text))
    }

    pub fn hide_message(&mut self, id: &SurfaceId) -> OverlayResult<bool> {
        let surface = self
            .surfaces
            .get(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        Ok(surface.hide_message(&mut self.doc))
    }

    /// Feed a completion signal from the rendering engine.
    ///
    /// The engine reports every accepted hide exactly once, in the order the
    /// hides were requested. A lifecycle that was closed out early (cleanup,
    /// eviction) still has its hide in flight, so only the report that
    /// drains the surface's last outstanding hide completes the current close.
    pub fn handle_engine_notification(&mut self, notification: EngineNotification) -> OverlayResult<()> {
        let id = notification.surface_id().clone();
        let Some(state) = self.state(&id) else {
            debug!("Engine notification for unknown surface '{}'", id);
            return Ok(());
        };

        match (notification, state) {
            (EngineNotification::Shown(_), SurfaceState::Opening) => {
                self.mark_open(&id);
                Ok(())
            }
            (EngineNotification::Hidden(_), state) => {
                let remaining = self.surfaces.get_mut(&id).and_then(|s| s.hide_landed());
                match remaining {
                    Some(0) if state == SurfaceState::Closing => self.finish_hidden(&id),
                    Some(remaining) => {
                        debug!(
                            "Hide of an earlier lifecycle of '{}' landed while {} ({} in flight)",
                            id, state, remaining
                        );
                        Ok(())
                    }
                    None => {
                        debug!("Unexpected hide report for '{}' while {}", id, state);
                        Ok(())
                    }
                }
            }
            (notification, state) => {
                debug!("Ignoring {:?} for '{}' while {}", notification, id, state);
                Ok(())
            }
        }
    }

    /// Route a DOM event through the delegated listeners.
    ///
    /// Close/cancel controls and backdrop clicks are handled here; the
    /// remaining actions are returned for the caller.
    pub fn dispatch(&mut self, event: &DomEvent) -> Vec<UiAction> {
        let actions: Vec<UiAction> = self
            .listeners
            .dispatch(&self.doc, event)
            .into_iter()
            .cloned()
            .collect();

        let mut unhandled = Vec::new();
        for action in actions {
            match action {
                UiAction::Control {
                    surface,
                    control: Control::Close | Control::Cancel,
                } => {
                    if let Err(e) = self.request_close(&surface, SurfaceOutcome::Dismissed) {
                        warn!("Close control on '{}' failed: {}", surface, e);
                    }
                }
                UiAction::Backdrop => self.backdrop_clicked(),
                other => unhandled.push(other),
            }
        }
        unhandled
    }

    /// Full reconcile sweep: clean up surfaces the host evicted, then bring
    /// the backdrop in line with what is still visible.
    pub fn reconcile(&mut self) -> OverlayResult<SweepReport> {
        let evicted: Vec<SurfaceId> = self
            .surfaces
            .values()
            .filter(|s| s.state().is_live() && !s.is_mounted(&self.doc))
            .map(|s| s.id().clone())
            .collect();

        for id in &evicted {
            info!("Surface '{}' was removed by the host", id);
            self.emit(OverlayEvent::SurfaceEvicted {
                surface_id: id.clone(),
            });
            self.finish_hidden(id)?;
        }

        let backdrop = self.reconcile_backdrop();
        Ok(SweepReport { evicted, backdrop })
    }

    /// Release everything: surfaces, subscriptions, bindings, backdrop
    pub fn teardown(&mut self) {
        for surface in self.surfaces.values() {
            surface.unmount(&mut self.doc);
        }
        self.surfaces.clear();
        self.sequencer.clear();
        self.listeners.unbind_namespace(NAMESPACE);
        self.backdrop.teardown(&mut self.doc);
        self.reconcile_backdrop();
        info!("Overlay coordinator torn down");
        self.emit(OverlayEvent::TornDown);
    }

    /// Surface a user-visible notice
    pub fn notice(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("Notice: {}", message);
        self.notices.push(message.clone());
        self.emit(OverlayEvent::Notice { message });
    }

    pub(crate) fn emit(&self, event: OverlayEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    fn mount(&mut self, id: &SurfaceId) -> OverlayResult<()> {
        let surface = self
            .surfaces
            .get(id)
            .ok_or_else(|| OverlayError::NotFound(id.clone()))?;
        surface.mount(&mut self.doc);

        let namespace = surface_namespace(id);
        for control in Control::ALL {
            self.listeners.bind_selector(
                control.selector(id)?,
                "click",
                &namespace,
                UiAction::Control {
                    surface: id.clone(),
                    control,
                },
            );
        }
        Ok(())
    }

    fn mark_open(&mut self, id: &SurfaceId) {
        if let Some(surface) = self.surfaces.get_mut(id) {
            if surface.transition(SurfaceState::Open, "show").is_ok() {
                info!("Surface '{}' open", id);
                self.emit(OverlayEvent::SurfaceOpened {
                    surface_id: id.clone(),
                });
            }
        }
    }

    /// Close-completion path: cleanup first, then the one-shot subscribers
    fn finish_hidden(&mut self, id: &SurfaceId) -> OverlayResult<()> {
        self.cleanup(id)?;

        let Some(surface) = self.surfaces.get(id) else {
            return Ok(());
        };
        let hidden = FullyHidden {
            surface_id: id.clone(),
            generation: surface.generation(),
            state: surface.state(),
            outcome: surface.outcome(),
            backdrop_ref_count: self.backdrop.ref_count(),
        };

        info!("Surface '{}' closed ({:?})", id, hidden.outcome);
        self.emit(OverlayEvent::SurfaceClosed {
            surface_id: id.clone(),
            outcome: hidden.outcome,
            backdrop_ref_count: hidden.backdrop_ref_count,
        });

        let fired = self.sequencer.complete(&hidden);
        if fired > 0 {
            debug!("Ran {} close subscriber(s) for '{}'", fired, id);
        }
        Ok(())
    }

    fn backdrop_clicked(&mut self) {
        if self.visible_count() == 0 {
            // Nothing is showing, so this backdrop is an orphan
            self.reconcile_backdrop();
        }
        debug!("Backdrop click swallowed");
        self.emit(OverlayEvent::BackdropClickSwallowed);
    }

    /// Number of surfaces currently holding a backdrop reference
    pub fn visible_count(&self) -> usize {
        self.surfaces.values().filter(|s| s.holds_backdrop()).count()
    }

    fn reconcile_backdrop(&mut self) -> ReconcileReport {
        let visible = self.visible_count();
        let report = self.backdrop.reconcile(&mut self.doc, visible);
        if !report.is_clean() {
            self.emit(OverlayEvent::reconciled(&report));
        }
        report
    }
}

impl std::fmt::Debug for OverlayCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayCoordinator")
            .field("surfaces", &self.surfaces)
            .field("backdrop", &self.backdrop)
            .field("listeners", &self.listeners.len())
            .field("sequencer", &self.sequencer)
            .finish()
    }
}
