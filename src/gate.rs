//! Precondition gate
//!
//! Wires a trigger control to the overlay flow:
//!
//! trigger click → precondition check → (not satisfied) dialog → accept →
//! acknowledge → close → engine reports hidden → proceed.
//!
//! A satisfied precondition proceeds straight away without showing anything.
//! A failed check is treated as not satisfied. The dependent action only ever
//! runs from the close-completion callback, so it observes the dialog closed
//! and the backdrop released.

use crate::coordinator::{OverlayCoordinator, UiAction};
use crate::dom::DomEvent;
use crate::engine::EngineNotification;
use crate::error::{OverlayError, OverlayResult};
use crate::events::OverlayEvent;
use crate::surface::{Control, MessageKind, SurfaceId, SurfaceOutcome, SurfaceState};
use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const TRIGGER_NAMESPACE: &str = "trigger";

/// Result of a precondition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionResult {
    Valid,
    Expired,
    Missing,
}

impl PreconditionResult {
    pub fn is_satisfied(self) -> bool {
        self == PreconditionResult::Valid
    }
}

/// Why the dependent action ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProceedReason {
    /// The precondition already held; no dialog was shown
    AlreadyAcknowledged,
    /// The user accepted the dialog and the acknowledgment was saved
    Acknowledged,
}

/// Collaborator that knows whether the gated action may run
#[async_trait(?Send)]
pub trait Precondition {
    async fn check(&self) -> anyhow::Result<PreconditionResult>;

    /// Persist the user's acceptance
    async fn acknowledge(&self) -> anyhow::Result<()>;
}

/// Inputs driving the gate's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Dom(DomEvent),
    Engine(EngineNotification),
    Shutdown,
}

/// Whether the loop should keep going after an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Shutdown,
}

/// What the gate is wired to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateSettings {
    pub trigger_selector: String,
    pub surface_id: SurfaceId,
    pub template: String,
    pub reconcile_interval: Duration,
}

enum GateTask {
    Checked(anyhow::Result<PreconditionResult>),
    Saved {
        generation: u64,
        result: anyhow::Result<()>,
    },
}

/// Drives the trigger → precondition → dialog → proceed flow
pub struct PreconditionGate<P: Precondition + 'static> {
    coordinator: OverlayCoordinator,
    precondition: Rc<P>,
    settings: GateSettings,
    proceed: Rc<dyn Fn(ProceedReason)>,
    tasks: FuturesUnordered<LocalBoxFuture<'static, GateTask>>,
    checking: bool,
    saving: bool,
}

impl<P: Precondition + 'static> PreconditionGate<P> {
    pub fn new<F>(
        coordinator: OverlayCoordinator,
        precondition: P,
        settings: GateSettings,
        proceed: F,
    ) -> Self
    where
        F: Fn(ProceedReason) + 'static,
    {
        Self {
            coordinator,
            precondition: Rc::new(precondition),
            settings,
            proceed: Rc::new(proceed),
            tasks: FuturesUnordered::new(),
            checking: false,
            saving: false,
        }
    }

    pub fn coordinator(&self) -> &OverlayCoordinator {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut OverlayCoordinator {
        &mut self.coordinator
    }

    pub fn precondition(&self) -> &P {
        &self.precondition
    }

    pub fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Whether async work is still outstanding
    pub fn is_busy(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Bind the trigger control. Safe to call any number of times.
    pub fn install(&mut self) -> OverlayResult<()> {
        let selector = self.settings.trigger_selector.clone();
        let outcome = self.coordinator.bind(
            &selector,
            "click",
            TRIGGER_NAMESPACE,
            UiAction::Trigger(selector.clone()),
        )?;
        debug!("Trigger '{}' {:?}", selector, outcome);
        Ok(())
    }

    pub fn handle_input(&mut self, input: Input) -> OverlayResult<Flow> {
        match input {
            Input::Dom(event) => {
                for action in self.coordinator.dispatch(&event) {
                    self.handle_action(action);
                }
            }
            Input::Engine(notification) => {
                self.coordinator.handle_engine_notification(notification)?;
            }
            Input::Shutdown => return Ok(Flow::Shutdown),
        }
        Ok(Flow::Continue)
    }

    /// Run until every in-flight check and save has been handled
    pub async fn drain(&mut self) -> OverlayResult<()> {
        while let Some(task) = self.tasks.next().await {
            self.handle_task(task)?;
        }
        Ok(())
    }

    /// Event loop: inputs, finished tasks, and a periodic reconcile sweep.
    /// Tears the coordinator down on shutdown or when the channel closes.
    pub async fn run(&mut self, mut inputs: mpsc::UnboundedReceiver<Input>) -> OverlayResult<()> {
        if self.settings.reconcile_interval.is_zero() {
            return Err(OverlayError::InvalidSetting(
                "reconcile interval must be greater than zero".to_string(),
            ));
        }
        self.install()?;

        let mut reconcile = tokio::time::interval(self.settings.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Gate running for trigger '{}'", self.settings.trigger_selector);
        loop {
            tokio::select! {
                biased;

                Some(task) = self.tasks.next(), if !self.tasks.is_empty() => {
                    self.handle_task(task)?;
                }
                input = inputs.recv() => match input {
                    Some(input) => {
                        if self.handle_input(input)? == Flow::Shutdown {
                            info!("Shutting down gate");
                            break;
                        }
                    }
                    None => {
                        debug!("Input channel closed");
                        break;
                    }
                },
                _ = reconcile.tick() => {
                    let report = self.coordinator.reconcile()?;
                    if !report.evicted.is_empty() {
                        debug!("Reconcile evicted {:?}", report.evicted);
                    }
                }
            }
        }

        self.coordinator.teardown();
        Ok(())
    }

    fn handle_action(&mut self, action: UiAction) {
        match action {
            UiAction::Trigger(selector) if selector == self.settings.trigger_selector => {
                self.on_trigger();
            }
            UiAction::Control {
                surface,
                control: Control::Accept,
            } if surface == self.settings.surface_id => {
                self.on_accept();
            }
            other => debug!("Unhandled action {:?}", other),
        }
    }

    fn on_trigger(&mut self) {
        if self.checking {
            self.ignore_trigger("precondition check in flight");
            return;
        }
        if self
            .coordinator
            .state(&self.settings.surface_id)
            .is_some_and(SurfaceState::is_live)
        {
            self.ignore_trigger("dialog already showing");
            return;
        }

        debug!("Checking precondition");
        self.checking = true;
        let precondition = Rc::clone(&self.precondition);
        self.tasks.push(
            async move { GateTask::Checked(precondition.check().await) }.boxed_local(),
        );
    }

    fn ignore_trigger(&self, reason: &str) {
        debug!("Trigger ignored: {}", reason);
        self.coordinator.emit(OverlayEvent::TriggerIgnored {
            trigger: self.settings.trigger_selector.clone(),
            reason: reason.to_string(),
        });
    }

    fn on_accept(&mut self) {
        let id = self.settings.surface_id.clone();
        let Some(surface) = self.coordinator.surface(&id) else {
            return;
        };
        if self.saving
            || surface.state() != SurfaceState::Open
            || surface.outcome() != SurfaceOutcome::Pending
        {
            debug!("Accept on '{}' ignored", id);
            return;
        }
        let generation = surface.generation();

        self.saving = true;
        if let Err(e) = self.coordinator.show_message(&id, MessageKind::Info, "Saving...") {
            debug!("No message region for '{}': {}", id, e);
        }

        let precondition = Rc::clone(&self.precondition);
        self.tasks.push(
            async move {
                GateTask::Saved {
                    generation,
                    result: precondition.acknowledge().await,
                }
            }
            .boxed_local(),
        );
    }

    fn handle_task(&mut self, task: GateTask) -> OverlayResult<()> {
        match task {
            GateTask::Checked(result) => self.on_checked(result),
            GateTask::Saved { generation, result } => self.on_saved(generation, result),
        }
    }

    fn on_checked(&mut self, result: anyhow::Result<PreconditionResult>) -> OverlayResult<()> {
        self.checking = false;

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                let err = OverlayError::PreconditionCheckFailed(format!("{e:#}"));
                warn!("{}; asking again", err);
                PreconditionResult::Missing
            }
        };
        self.coordinator
            .emit(OverlayEvent::PreconditionChecked { result });

        if result.is_satisfied() {
            self.run_proceed(ProceedReason::AlreadyAcknowledged);
            return Ok(());
        }

        let id = self.settings.surface_id.clone();
        let template = self.settings.template.clone();
        let opened = self.coordinator.open_from_template(id.clone(), &template, |err| {
            debug!("Flow cancelled: {}", err);
        });
        if let Err(e) = opened {
            warn!("Could not open '{}': {}", id, e);
        }
        Ok(())
    }

    fn on_saved(&mut self, generation: u64, result: anyhow::Result<()>) -> OverlayResult<()> {
        self.saving = false;
        let id = self.settings.surface_id.clone();

        let current = self
            .coordinator
            .surface(&id)
            .filter(|s| s.generation() == generation && s.state() == SurfaceState::Open);
        if current.is_none() {
            debug!("Save for '{}' finished after the dialog moved on", id);
            return Ok(());
        }

        match result {
            Ok(()) => {
                info!("Acknowledgment saved");
                self.coordinator.set_outcome(&id, SurfaceOutcome::Accepted)?;
                self.coordinator.hide_message(&id)?;

                let proceed = Rc::clone(&self.proceed);
                let sender = self.coordinator.event_sender();
                self.coordinator.on_fully_hidden(&id, move |hidden| {
                    if hidden.outcome != SurfaceOutcome::Accepted {
                        return;
                    }
                    if let Some(sender) = sender {
                        let _ = sender.send(OverlayEvent::Proceeded {
                            reason: ProceedReason::Acknowledged,
                        });
                    }
                    proceed(ProceedReason::Acknowledged);
                })?;
                self.coordinator.request_close(&id, SurfaceOutcome::Accepted)
            }
            Err(e) => {
                warn!("Saving acknowledgment failed: {:#}", e);
                self.coordinator
                    .notice("Your acknowledgment could not be saved. Please try again.");
                self.coordinator.request_close(&id, SurfaceOutcome::Dismissed)
            }
        }
    }

    fn run_proceed(&self, reason: ProceedReason) {
        info!("Proceeding ({:?})", reason);
        self.coordinator.emit(OverlayEvent::Proceeded { reason });
        (self.proceed)(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backdrop::DEFAULT_BACKDROP_CLASS;
    use crate::dom::{ElementSpec, Selector};
    use crate::engine::{HideCompletion, ScriptedEngine};
    use crate::surface::SurfaceContent;
    use anyhow::anyhow;
    use std::cell::{Cell, RefCell};

    struct StubPrecondition {
        result: Option<PreconditionResult>,
        save_ok: bool,
        checks: Cell<usize>,
        saves: Cell<usize>,
    }

    impl StubPrecondition {
        fn new(result: Option<PreconditionResult>, save_ok: bool) -> Self {
            Self {
                result,
                save_ok,
                checks: Cell::new(0),
                saves: Cell::new(0),
            }
        }
    }

    #[async_trait(?Send)]
    impl Precondition for StubPrecondition {
        async fn check(&self) -> anyhow::Result<PreconditionResult> {
            self.checks.set(self.checks.get() + 1);
            self.result.ok_or_else(|| anyhow!("service unavailable"))
        }

        async fn acknowledge(&self) -> anyhow::Result<()> {
            self.saves.set(self.saves.get() + 1);
            if self.save_ok {
                Ok(())
            } else {
                Err(anyhow!("disk full"))
            }
        }
    }

    type Proceeded = Rc<RefCell<Vec<ProceedReason>>>;

    fn gate(precondition: StubPrecondition) -> (PreconditionGate<StubPrecondition>, Proceeded) {
        let engine = ScriptedEngine::new(HideCompletion::Manual);
        let mut coordinator =
            OverlayCoordinator::new(Box::new(engine), DEFAULT_BACKDROP_CLASS).unwrap();
        coordinator.register_template(
            "attestation",
            SurfaceContent::new("Before you scan", "Confirm you are authorized."),
        );
        let root = coordinator.document().root();
        coordinator
            .document_mut()
            .append(root, ElementSpec::new("button").with_id("start-scan"));

        let settings = GateSettings {
            trigger_selector: "#start-scan".to_string(),
            surface_id: SurfaceId::new("scan-attest"),
            template: "attestation".to_string(),
            reconcile_interval: Duration::from_secs(60),
        };
        let proceeded: Proceeded = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&proceeded);
        let mut gate = PreconditionGate::new(coordinator, precondition, settings, move |r| {
            sink.borrow_mut().push(r)
        });
        gate.install().unwrap();
        (gate, proceeded)
    }

    fn click(gate: &mut PreconditionGate<StubPrecondition>, selector: &Selector) {
        let node = gate.coordinator().document().query(selector).unwrap();
        gate.handle_input(Input::Dom(DomEvent::click(node))).unwrap();
    }

    fn click_trigger(gate: &mut PreconditionGate<StubPrecondition>) {
        click(gate, &Selector::id("start-scan").unwrap());
    }

    fn click_accept(gate: &mut PreconditionGate<StubPrecondition>) {
        let selector = Control::Accept.selector(&gate.settings().surface_id).unwrap();
        click(gate, &selector);
    }

    fn complete_hide(gate: &mut PreconditionGate<StubPrecondition>) {
        let id = gate.settings().surface_id.clone();
        gate.handle_input(Input::Engine(EngineNotification::Hidden(id)))
            .unwrap();
    }

    fn surface_state(gate: &PreconditionGate<StubPrecondition>) -> Option<SurfaceState> {
        gate.coordinator().state(&gate.settings().surface_id)
    }

    #[tokio::test]
    async fn test_valid_precondition_proceeds_without_dialog() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Valid), true));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();

        assert_eq!(*proceeded.borrow(), vec![ProceedReason::AlreadyAcknowledged]);
        assert_eq!(surface_state(&gate), None);
        assert_eq!(gate.coordinator().backdrop().ref_count(), 0);
    }

    #[tokio::test]
    async fn test_accept_proceeds_after_close_completes() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Missing), true));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        assert_eq!(surface_state(&gate), Some(SurfaceState::Open));

        click_accept(&mut gate);
        gate.drain().await.unwrap();
        assert_eq!(gate.precondition().saves.get(), 1);
        assert_eq!(surface_state(&gate), Some(SurfaceState::Closing));
        assert!(proceeded.borrow().is_empty());

        complete_hide(&mut gate);
        assert_eq!(*proceeded.borrow(), vec![ProceedReason::Acknowledged]);
        assert_eq!(surface_state(&gate), Some(SurfaceState::Closed));
        assert_eq!(gate.coordinator().backdrop().ref_count(), 0);

        // A stray second completion does not proceed again
        complete_hide(&mut gate);
        assert_eq!(proceeded.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_check_failure_shows_dialog() {
        let (mut gate, proceeded) = gate(StubPrecondition::new(None, true));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();

        assert_eq!(surface_state(&gate), Some(SurfaceState::Open));
        assert!(proceeded.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_ignored_while_check_in_flight_or_dialog_live() {
        let (mut gate, _) =
            gate(StubPrecondition::new(Some(PreconditionResult::Expired), true));

        click_trigger(&mut gate);
        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        assert_eq!(gate.precondition().checks.get(), 1);

        click_trigger(&mut gate);
        assert!(!gate.is_busy());
        assert_eq!(gate.precondition().checks.get(), 1);
    }

    #[tokio::test]
    async fn test_accept_is_honored_once() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Missing), true));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        click_accept(&mut gate);
        click_accept(&mut gate);
        gate.drain().await.unwrap();
        assert_eq!(gate.precondition().saves.get(), 1);

        complete_hide(&mut gate);
        assert_eq!(proceeded.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_save_failure_closes_without_proceeding() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Missing), false));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        click_accept(&mut gate);
        gate.drain().await.unwrap();

        assert_eq!(gate.coordinator().notices().len(), 1);
        let id = gate.settings().surface_id.clone();
        assert_eq!(
            gate.coordinator().surface(&id).unwrap().outcome(),
            SurfaceOutcome::Dismissed
        );

        complete_hide(&mut gate);
        assert!(proceeded.borrow().is_empty());
        assert_eq!(gate.coordinator().backdrop().ref_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_then_retrigger_shows_fresh_dialog() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Missing), true));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        let cancel = Control::Cancel.selector(&gate.settings().surface_id).unwrap();
        click(&mut gate, &cancel);
        complete_hide(&mut gate);
        assert_eq!(surface_state(&gate), Some(SurfaceState::Closed));

        click_trigger(&mut gate);
        gate.drain().await.unwrap();
        assert_eq!(surface_state(&gate), Some(SurfaceState::Open));
        assert_eq!(gate.precondition().checks.get(), 2);
        assert!(proceeded.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_missing_template_leaves_nothing_behind() {
        let (mut gate, _) =
            gate(StubPrecondition::new(Some(PreconditionResult::Missing), true));
        gate.settings.template = "gone".to_string();

        click_trigger(&mut gate);
        gate.drain().await.unwrap();

        assert_eq!(surface_state(&gate), None);
        assert_eq!(gate.coordinator().notices().len(), 1);
        assert_eq!(gate.coordinator().backdrop().ref_count(), 0);
    }

    #[tokio::test]
    async fn test_run_rejects_zero_reconcile_interval() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Valid), true));
        gate.settings.reconcile_interval = Duration::ZERO;

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Input::Shutdown).unwrap();

        let err = gate.run(rx).await.unwrap_err();
        assert!(matches!(err, OverlayError::InvalidSetting(_)));
        assert!(proceeded.borrow().is_empty());
        // Nothing was torn down: the trigger installed by the fixture stays bound
        assert_eq!(gate.coordinator().listeners().len(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_tears_down() {
        let (mut gate, proceeded) =
            gate(StubPrecondition::new(Some(PreconditionResult::Valid), true));
        let trigger = gate
            .coordinator()
            .document()
            .get_element_by_id("start-scan")
            .unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Input::Dom(DomEvent::click(trigger))).unwrap();
        tx.send(Input::Shutdown).unwrap();

        gate.run(rx).await.unwrap();
        assert!(gate.coordinator().listeners().is_empty());
        assert_eq!(*proceeded.borrow(), vec![ProceedReason::AlreadyAcknowledged]);
    }
}
