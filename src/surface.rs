//! Dialog surface records
//!
//! A [`DialogSurface`] is the logical dialog, not its markup. The markup can be
//! destroyed and rebuilt by the host at any time; the record resolves its
//! elements by id on every use, so a re-rendered dialog is picked up without
//! any rebinding.

use crate::dom::{Document, ElementSpec, NodeId, Selector};
use crate::error::{OverlayError, OverlayResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix appended to a surface id to name its message region
pub const MESSAGE_REGION_SUFFIX: &str = "-message";

/// Attribute carried by every control the coordinator binds
pub const CONTROL_ATTR: &str = "data-scrim-control";

/// Stable identifier of a logical dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(String);

impl SurfaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of this surface's message region
    pub fn message_region_id(&self) -> String {
        format!("{}{}", self.0, MESSAGE_REGION_SUFFIX)
    }
}

impl From<&str> for SurfaceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SurfaceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl SurfaceState {
    /// Whether the surface is on screen or on its way there
    pub fn holds_focus(self) -> bool {
        matches!(self, SurfaceState::Opening | SurfaceState::Open)
    }

    pub fn is_live(self) -> bool {
        self != SurfaceState::Closed
    }

    fn can_transition_to(self, next: SurfaceState) -> bool {
        use SurfaceState::*;
        matches!(
            (self, next),
            (Closed, Opening) | (Opening, Open) | (Open, Closing) | (Closing, Closed)
        )
    }
}

impl fmt::Display for SurfaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SurfaceState::Closed => "closed",
            SurfaceState::Opening => "opening",
            SurfaceState::Open => "open",
            SurfaceState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// How the user left the dialog during the current lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceOutcome {
    #[default]
    Pending,
    Accepted,
    Dismissed,
}

/// Controls rendered into every surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Control {
    Accept,
    Cancel,
    Close,
}

impl Control {
    pub const ALL: [Control; 3] = [Control::Accept, Control::Cancel, Control::Close];

    pub fn as_str(self) -> &'static str {
        match self {
            Control::Accept => "accept",
            Control::Cancel => "cancel",
            Control::Close => "close",
        }
    }

    /// Delegated selector for this control inside `surface`
    pub fn selector(self, surface: &SurfaceId) -> OverlayResult<Selector> {
        Selector::parse(&format!("#{} [{}={}]", surface, CONTROL_ATTR, self.as_str()))
    }
}

/// Severity of a message shown in a surface's message region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Info,
    Success,
    Error,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Info => "info",
            MessageKind::Success => "success",
            MessageKind::Error => "error",
        }
    }
}

/// Text content of a dialog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceContent {
    pub title: String,
    pub body: String,
    #[serde(default = "default_accept_label")]
    pub accept_label: String,
    #[serde(default = "default_cancel_label")]
    pub cancel_label: String,
}

fn default_accept_label() -> String {
    "Accept".to_string()
}

fn default_cancel_label() -> String {
    "Cancel".to_string()
}

impl SurfaceContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            accept_label: default_accept_label(),
            cancel_label: default_cancel_label(),
        }
    }

    pub fn with_accept_label(mut self, label: impl Into<String>) -> Self {
        self.accept_label = label.into();
        self
    }

    pub fn with_cancel_label(mut self, label: impl Into<String>) -> Self {
        self.cancel_label = label.into();
        self
    }
}

/// One logical modal dialog
#[derive(Debug, Clone)]
pub struct DialogSurface {
    id: SurfaceId,
    state: SurfaceState,
    message_region_id: String,
    content: SurfaceContent,
    generation: u64,
    outcome: SurfaceOutcome,
    holds_backdrop: bool,
    hides_in_flight: u32,
}

impl DialogSurface {
    pub(crate) fn new(id: SurfaceId, content: SurfaceContent) -> Self {
        let message_region_id = id.message_region_id();
        Self {
            id,
            state: SurfaceState::Closed,
            message_region_id,
            content,
            generation: 0,
            outcome: SurfaceOutcome::Pending,
            holds_backdrop: false,
            hides_in_flight: 0,
        }
    }

    pub fn id(&self) -> &SurfaceId {
        &self.id
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn message_region_id(&self) -> &str {
        &self.message_region_id
    }

    pub fn content(&self) -> &SurfaceContent {
        &self.content
    }

    /// Lifecycle counter, bumped every time the surface starts showing
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn outcome(&self) -> SurfaceOutcome {
        self.outcome
    }

    pub fn holds_backdrop(&self) -> bool {
        self.holds_backdrop
    }

    /// Hide requests sent to the engine that have not reported back yet,
    /// across every lifecycle of this surface
    pub fn hides_in_flight(&self) -> u32 {
        self.hides_in_flight
    }

    /// Root element of the surface's markup, resolved by id
    pub fn root(&self, doc: &Document) -> Option<NodeId> {
        doc.get_element_by_id(self.id.as_str())
    }

    pub fn is_mounted(&self, doc: &Document) -> bool {
        self.root(doc).is_some()
    }

    pub(crate) fn transition(&mut self, next: SurfaceState, operation: &'static str) -> OverlayResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(OverlayError::InvalidTransition {
                id: self.id.clone(),
                state: self.state,
                operation,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Drop straight to `Closed`, whatever the current state
    pub(crate) fn force_closed(&mut self) {
        self.state = SurfaceState::Closed;
    }

    pub(crate) fn set_outcome(&mut self, outcome: SurfaceOutcome) {
        self.outcome = outcome;
    }

    pub(crate) fn set_holds_backdrop(&mut self, holds: bool) {
        self.holds_backdrop = holds;
    }

    pub(crate) fn hide_sent(&mut self) {
        self.hides_in_flight += 1;
    }

    /// Account for one `Hidden` report. Returns the number of hides still
    /// outstanding, or `None` if none was expected.
    pub(crate) fn hide_landed(&mut self) -> Option<u32> {
        self.hides_in_flight = self.hides_in_flight.checked_sub(1)?;
        Some(self.hides_in_flight)
    }

    pub(crate) fn set_content(&mut self, content: SurfaceContent) {
        self.content = content;
    }

    /// Start a new show/close lifecycle
    pub(crate) fn begin_lifecycle(&mut self) -> u64 {
        self.generation += 1;
        self.outcome = SurfaceOutcome::Pending;
        self.generation
    }

    /// Build this surface's markup under the document root, replacing any
    /// markup already present for the same id.
    pub(crate) fn mount(&self, doc: &mut Document) -> Option<NodeId> {
        let spec = self.markup();
        match self.root(doc) {
            Some(existing) => doc.replace(existing, spec),
            None => doc.append(doc.root(), spec),
        }
    }

    /// Remove the markup. Returns false if there was none.
    pub(crate) fn unmount(&self, doc: &mut Document) -> bool {
        match self.root(doc) {
            Some(root) => doc.remove(root),
            None => false,
        }
    }

    /// Show `text` in this surface's own message region
    pub fn show_message(&self, doc: &mut Document, kind: MessageKind, text: &str) -> bool {
        let Some(region) = doc.get_element_by_id(&self.message_region_id) else {
            return false;
        };
        doc.set_text(region, text);
        doc.set_attr(region, "data-kind", kind.as_str());
        doc.set_hidden(region, false)
    }

    pub fn hide_message(&self, doc: &mut Document) -> bool {
        let Some(region) = doc.get_element_by_id(&self.message_region_id) else {
            return false;
        };
        doc.set_text(region, "");
        doc.set_hidden(region, true)
    }

    fn markup(&self) -> ElementSpec {
        let button = |control: Control, class: &str, label: &str| {
            ElementSpec::new("button")
                .with_class(class)
                .with_attr(CONTROL_ATTR, control.as_str())
                .with_text(label)
        };

        let header = ElementSpec::new("div")
            .with_class("modal-header")
            .with_child(
                ElementSpec::new("h5")
                    .with_class("modal-title")
                    .with_text(self.content.title.clone()),
            )
            .with_child(button(Control::Close, "btn-close", ""));

        let footer = ElementSpec::new("div")
            .with_class("modal-footer")
            .with_child(button(Control::Cancel, "btn-secondary", &self.content.cancel_label))
            .with_child(button(Control::Accept, "btn-primary", &self.content.accept_label));

        ElementSpec::new("div")
            .with_id(self.id.as_str())
            .with_class("modal")
            .with_attr("role", "dialog")
            .with_attr("data-scrim-surface", self.id.as_str())
            .with_child(
                ElementSpec::new("div")
                    .with_class("modal-dialog")
                    .with_child(header)
                    .with_child(
                        ElementSpec::new("div")
                            .with_class("modal-body")
                            .with_text(self.content.body.clone()),
                    )
                    .with_child(
                        ElementSpec::new("div")
                            .with_id(self.message_region_id.clone())
                            .with_class("modal-message")
                            .hidden(true),
                    )
                    .with_child(footer),
            )
    }
}
