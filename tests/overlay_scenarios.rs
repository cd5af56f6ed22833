//! End-to-end overlay scenarios through the public API

use async_trait::async_trait;
use scrim::backdrop::DEFAULT_BACKDROP_CLASS;
use scrim::dom::{DomEvent, ElementSpec, Selector};
use scrim::engine::{EngineNotification, EngineProbe, HideCompletion, ScriptedEngine};
use scrim::gate::{GateSettings, Input};
use scrim::listeners::ListenerRegistry;
use scrim::surface::Control;
use scrim::{
    OverlayCoordinator, OverlayError, Precondition, PreconditionGate, PreconditionResult,
    ProceedReason, SurfaceContent, SurfaceId, SurfaceOutcome, SurfaceState,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;
use tempfile::TempDir;

fn coordinator() -> (OverlayCoordinator, EngineProbe) {
    let engine = ScriptedEngine::new(HideCompletion::Manual);
    let probe = engine.probe();
    let coordinator = OverlayCoordinator::new(Box::new(engine), DEFAULT_BACKDROP_CLASS).unwrap();
    (coordinator, probe)
}

fn content() -> SurfaceContent {
    SurfaceContent::new("Before you scan", "Confirm you are authorized.")
}

fn backdrop_nodes(coordinator: &OverlayCoordinator) -> usize {
    coordinator
        .document()
        .query_all(coordinator.backdrop().selector())
        .len()
}

/// Deliver every hide the engine has been asked for
fn complete_hides(coordinator: &mut OverlayCoordinator, probe: &EngineProbe) {
    for id in probe.take_pending_hides() {
        coordinator
            .handle_engine_notification(EngineNotification::Hidden(id))
            .unwrap();
    }
}

#[test]
fn backdrop_exists_iff_ref_count_positive() {
    let (mut coordinator, probe) = coordinator();
    let ids: Vec<SurfaceId> = ["a", "b", "c"].into_iter().map(SurfaceId::new).collect();
    for id in &ids {
        coordinator.create(id.clone(), content()).unwrap();
    }

    // Cycle the surfaces through overlapping lifecycles
    for round in 0..12 {
        let id = &ids[round % ids.len()];
        if coordinator.show(id).is_ok() {
            coordinator
                .request_close(id, SurfaceOutcome::Dismissed)
                .unwrap();
        }
        if round % 2 == 1 {
            complete_hides(&mut coordinator, &probe);
        }
        let count = coordinator.backdrop().ref_count();
        assert_eq!(backdrop_nodes(&coordinator), usize::from(count > 0));
        assert_eq!(count, coordinator.visible_count());
    }

    complete_hides(&mut coordinator, &probe);
    assert_eq!(coordinator.backdrop().ref_count(), 0);
    assert_eq!(backdrop_nodes(&coordinator), 0);
}

#[test]
fn repeated_cleanup_equals_single_cleanup() {
    let (mut coordinator, _) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    coordinator.cleanup(&id).unwrap();
    let after_once = (
        coordinator.document().len(),
        coordinator.backdrop().ref_count(),
        coordinator.listeners().len(),
        coordinator.state(&id),
    );

    for _ in 0..3 {
        assert!(coordinator.cleanup(&id).unwrap().is_noop());
    }
    let after_many = (
        coordinator.document().len(),
        coordinator.backdrop().ref_count(),
        coordinator.listeners().len(),
        coordinator.state(&id),
    );
    assert_eq!(after_once, after_many);
}

#[test]
fn fully_hidden_never_runs_before_closed() {
    let (mut coordinator, probe) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    let observed = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&observed);
    coordinator
        .on_fully_hidden(&id, move |hidden| {
            *sink.borrow_mut() = Some((hidden.state, hidden.backdrop_ref_count));
        })
        .unwrap();

    coordinator
        .request_close(&id, SurfaceOutcome::Accepted)
        .unwrap();
    assert!(observed.borrow().is_none());

    complete_hides(&mut coordinator, &probe);
    assert_eq!(*observed.borrow(), Some((SurfaceState::Closed, 0)));
}

#[test]
fn rebinding_many_times_fires_once() {
    let (mut coordinator, _) = coordinator();
    let root = coordinator.document().root();
    let button = coordinator
        .document_mut()
        .append(root, ElementSpec::new("button").with_id("start-scan"))
        .unwrap();

    let mut registry = ListenerRegistry::new();
    for _ in 0..10 {
        registry
            .bind("#start-scan", "click", "scrim.trigger", "scan")
            .unwrap();
    }

    let fired = registry.dispatch(coordinator.document(), &DomEvent::click(button));
    assert_eq!(fired, vec![&"scan"]);
}

#[test]
fn reopen_while_close_pending_cancels_stale_callback() {
    let (mut coordinator, probe) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    let fired = Rc::new(Cell::new(0));
    let f = Rc::clone(&fired);
    coordinator
        .on_fully_hidden(&id, move |_| f.set(f.get() + 1))
        .unwrap();
    coordinator
        .request_close(&id, SurfaceOutcome::Dismissed)
        .unwrap();

    // Host tears down and rebuilds before the engine finishes hiding
    coordinator.cleanup(&id).unwrap();
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    complete_hides(&mut coordinator, &probe);
    assert_eq!(fired.get(), 0);
    assert_eq!(coordinator.state(&id), Some(SurfaceState::Open));
}

#[test]
fn stale_hide_never_completes_the_reopened_close() {
    let (mut coordinator, probe) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();
    coordinator
        .request_close(&id, SurfaceOutcome::Dismissed)
        .unwrap();

    // Host code closes the first lifecycle out before the engine reports
    coordinator.cleanup(&id).unwrap();
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    let fired = Rc::new(Cell::new(0));
    let f = Rc::clone(&fired);
    coordinator
        .on_fully_hidden(&id, move |_| f.set(f.get() + 1))
        .unwrap();
    coordinator
        .request_close(&id, SurfaceOutcome::Accepted)
        .unwrap();

    let mut pending = probe.take_pending_hides().into_iter();
    coordinator
        .handle_engine_notification(EngineNotification::Hidden(pending.next().unwrap()))
        .unwrap();
    assert_eq!(fired.get(), 0);
    assert_eq!(coordinator.state(&id), Some(SurfaceState::Closing));
    assert_eq!(backdrop_nodes(&coordinator), 1);

    coordinator
        .handle_engine_notification(EngineNotification::Hidden(pending.next().unwrap()))
        .unwrap();
    assert_eq!(fired.get(), 1);
    assert_eq!(coordinator.state(&id), Some(SurfaceState::Closed));
    assert_eq!(backdrop_nodes(&coordinator), 0);
    assert!(pending.next().is_none());
}

#[test]
fn second_show_before_close_completes_is_rejected() {
    let (mut coordinator, probe) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    assert!(coordinator.show(&id).is_err());
    assert!(matches!(
        coordinator.create(id.clone(), content()),
        Err(OverlayError::DuplicateId(_))
    ));

    coordinator
        .request_close(&id, SurfaceOutcome::Dismissed)
        .unwrap();
    assert!(coordinator.show(&id).is_err());

    complete_hides(&mut coordinator, &probe);
    coordinator.show(&id).unwrap();
    assert_eq!(coordinator.backdrop().ref_count(), 1);
}

#[test]
fn host_eviction_is_cleaned_up_by_reconcile() {
    let (mut coordinator, _) = coordinator();
    let id = SurfaceId::new("s");
    coordinator.create(id.clone(), content()).unwrap();
    coordinator.show(&id).unwrap();

    let root = coordinator
        .surface(&id)
        .and_then(|s| s.root(coordinator.document()))
        .unwrap();
    coordinator.document_mut().remove(root);

    let report = coordinator.reconcile().unwrap();
    assert_eq!(report.evicted, vec![id.clone()]);
    assert_eq!(coordinator.backdrop().ref_count(), 0);
    assert_eq!(backdrop_nodes(&coordinator), 0);
}

struct FileBacked {
    store: scrim::ack::AckStore,
    checks: Cell<usize>,
}

#[async_trait(?Send)]
impl Precondition for FileBacked {
    async fn check(&self) -> anyhow::Result<PreconditionResult> {
        self.checks.set(self.checks.get() + 1);
        self.store.check().await
    }

    async fn acknowledge(&self) -> anyhow::Result<()> {
        self.store.acknowledge().await
    }
}

struct Harness {
    gate: PreconditionGate<FileBacked>,
    probe: EngineProbe,
    proceeded: Rc<RefCell<Vec<ProceedReason>>>,
    _dir: TempDir,
}

fn harness() -> Harness {
    harness_with_trigger("#start-scan")
}

fn harness_with_trigger(trigger_selector: &str) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = scrim::ack::AckStore::new(
        dir.path().join("ack.json"),
        Duration::from_secs(3600),
        1,
    );

    let engine = ScriptedEngine::new(HideCompletion::Manual);
    let probe = engine.probe();
    let mut coordinator =
        OverlayCoordinator::new(Box::new(engine), DEFAULT_BACKDROP_CLASS).unwrap();
    coordinator.register_template("attestation", content());
    let root = coordinator.document().root();
    let toolbar = coordinator
        .document_mut()
        .append(root, ElementSpec::new("div").with_class("toolbar"))
        .unwrap();
    coordinator
        .document_mut()
        .append(toolbar, ElementSpec::new("button").with_id("start-scan"));

    let proceeded = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&proceeded);
    let gate = PreconditionGate::new(
        coordinator,
        FileBacked {
            store,
            checks: Cell::new(0),
        },
        GateSettings {
            trigger_selector: trigger_selector.to_string(),
            surface_id: SurfaceId::new("scan-attest"),
            template: "attestation".to_string(),
            reconcile_interval: Duration::from_secs(60),
        },
        move |reason| sink.borrow_mut().push(reason),
    );

    Harness {
        gate,
        probe,
        proceeded,
        _dir: dir,
    }
}

impl Harness {
    fn click(&mut self, selector: &Selector) {
        let node = self.gate.coordinator().document().query(selector).unwrap();
        self.gate
            .handle_input(Input::Dom(DomEvent::click(node)))
            .unwrap();
    }

    fn surface_state(&self) -> Option<SurfaceState> {
        self.gate.coordinator().state(&SurfaceId::new("scan-attest"))
    }

    fn deliver_hides(&mut self) {
        for id in self.probe.take_pending_hides() {
            self.gate
                .handle_input(Input::Engine(EngineNotification::Hidden(id)))
                .unwrap();
        }
    }
}

#[tokio::test]
async fn trigger_accept_save_close_then_proceed_once() {
    let mut h = harness();
    h.gate.install().unwrap();
    let trigger = Selector::id("start-scan").unwrap();
    let accept = Control::Accept
        .selector(&SurfaceId::new("scan-attest"))
        .unwrap();

    h.click(&trigger);
    h.gate.drain().await.unwrap();
    assert_eq!(h.surface_state(), Some(SurfaceState::Open));

    h.click(&accept);
    h.gate.drain().await.unwrap();
    assert_eq!(h.surface_state(), Some(SurfaceState::Closing));
    assert!(h.proceeded.borrow().is_empty());

    h.deliver_hides();
    assert_eq!(*h.proceeded.borrow(), vec![ProceedReason::Acknowledged]);
    assert_eq!(h.gate.coordinator().backdrop().ref_count(), 0);
    assert_eq!(backdrop_nodes(h.gate.coordinator()), 0);

    // The acknowledgment is now on disk: the next click proceeds directly
    h.click(&trigger);
    h.gate.drain().await.unwrap();
    assert_eq!(
        *h.proceeded.borrow(),
        vec![ProceedReason::Acknowledged, ProceedReason::AlreadyAcknowledged]
    );
    assert_eq!(h.gate.precondition().checks.get(), 2);
}

#[tokio::test]
async fn trigger_accepts_any_css_selector() {
    let mut h = harness_with_trigger(".toolbar > button:not([disabled])");
    h.gate.install().unwrap();

    h.click(&Selector::id("start-scan").unwrap());
    h.gate.drain().await.unwrap();
    assert_eq!(h.gate.precondition().checks.get(), 1);
    assert_eq!(h.surface_state(), Some(SurfaceState::Open));
}

#[tokio::test]
async fn replaced_trigger_fires_exactly_one_handler() {
    let mut h = harness();
    for _ in 0..5 {
        h.gate.install().unwrap();
    }

    // Host re-renders the toolbar with an identical trigger
    let page = h.gate.coordinator_mut().document_mut();
    let toolbar = page.query(&Selector::parse(".toolbar").unwrap()).unwrap();
    page.replace(
        toolbar,
        ElementSpec::new("div")
            .with_class("toolbar")
            .with_child(ElementSpec::new("button").with_id("start-scan")),
    );

    h.click(&Selector::id("start-scan").unwrap());
    h.gate.drain().await.unwrap();
    assert_eq!(h.gate.precondition().checks.get(), 1);
    assert_eq!(h.surface_state(), Some(SurfaceState::Open));
}
