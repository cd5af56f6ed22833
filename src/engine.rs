//! Rendering engine boundary
//!
//! The widget library that animates dialogs in and out is not ours. The
//! coordinator only ever calls [`RenderEngine::show`] and
//! [`RenderEngine::hide`] and listens for [`EngineNotification`]s; it never
//! writes the engine's visual or accessibility state itself.

use crate::surface::SurfaceId;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// Completion signals emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "surface_id", rename_all = "snake_case")]
pub enum EngineNotification {
    /// Presentation finished
    Shown(SurfaceId),
    /// Hide animation and internal cleanup finished
    Hidden(SurfaceId),
}

impl EngineNotification {
    pub fn surface_id(&self) -> &SurfaceId {
        match self {
            EngineNotification::Shown(id) | EngineNotification::Hidden(id) => id,
        }
    }
}

/// Public surface of the rendering engine
pub trait RenderEngine {
    /// Start presenting the surface
    fn show(&mut self, id: &SurfaceId) -> Result<()>;

    /// Start hiding the surface. Completion is reported later through
    /// [`EngineNotification::Hidden`].
    fn hide(&mut self, id: &SurfaceId) -> Result<()>;

    /// Whether `show` is followed by [`EngineNotification::Shown`]. Engines
    /// that do not confirm presentation are treated as showing synchronously.
    fn confirms_show(&self) -> bool {
        false
    }
}

/// When a [`ScriptedEngine`] reports hide completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideCompletion {
    /// Never on its own; the driver delivers `Hidden` explicitly
    Manual,
    /// After a delay, through the notification channel
    After(Duration),
}

/// A call made into the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Show(SurfaceId),
    Hide(SurfaceId),
}

#[derive(Debug, Default)]
struct EngineLog {
    calls: Vec<EngineCall>,
    pending_hides: Vec<SurfaceId>,
    fail_show: bool,
}

/// Read-side handle onto a [`ScriptedEngine`]
#[derive(Debug, Clone)]
pub struct EngineProbe {
    log: Rc<RefCell<EngineLog>>,
}

impl EngineProbe {
    pub fn calls(&self) -> Vec<EngineCall> {
        self.log.borrow().calls.clone()
    }

    /// Hides that have been requested but not yet reported complete
    pub fn pending_hides(&self) -> Vec<SurfaceId> {
        self.log.borrow().pending_hides.clone()
    }

    /// Take the pending hides, as the driver about to report them complete
    pub fn take_pending_hides(&self) -> Vec<SurfaceId> {
        std::mem::take(&mut self.log.borrow_mut().pending_hides)
    }

    /// Make subsequent `show` calls fail
    pub fn set_fail_show(&self, fail: bool) {
        self.log.borrow_mut().fail_show = fail;
    }
}

/// Engine stand-in with scripted timing, used by the demo and by tests
pub struct ScriptedEngine {
    log: Rc<RefCell<EngineLog>>,
    notifier: Option<mpsc::UnboundedSender<EngineNotification>>,
    completion: HideCompletion,
    confirm_show: bool,
}

impl ScriptedEngine {
    pub fn new(completion: HideCompletion) -> Self {
        Self {
            log: Rc::new(RefCell::new(EngineLog::default())),
            notifier: None,
            completion,
            confirm_show: false,
        }
    }

    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<EngineNotification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_show_confirmation(mut self, confirm: bool) -> Self {
        self.confirm_show = confirm;
        self
    }

    pub fn probe(&self) -> EngineProbe {
        EngineProbe {
            log: Rc::clone(&self.log),
        }
    }

    fn notify(&self, notification: EngineNotification) {
        if let Some(notifier) = &self.notifier {
            let _ = notifier.send(notification);
        }
    }
}

impl RenderEngine for ScriptedEngine {
    fn show(&mut self, id: &SurfaceId) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.calls.push(EngineCall::Show(id.clone()));
        if log.fail_show {
            return Err(anyhow!("engine refused to show '{}'", id));
        }
        drop(log);

        debug!("Engine show: {}", id);
        if self.confirm_show {
            self.notify(EngineNotification::Shown(id.clone()));
        }
        Ok(())
    }

    fn hide(&mut self, id: &SurfaceId) -> Result<()> {
        self.log.borrow_mut().calls.push(EngineCall::Hide(id.clone()));
        debug!("Engine hide: {}", id);

        if let (HideCompletion::After(delay), Some(notifier)) = (self.completion, &self.notifier) {
            if tokio::runtime::Handle::try_current().is_ok() {
                let notifier = notifier.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = notifier.send(EngineNotification::Hidden(id));
                });
                return Ok(());
            }
        }

        self.log.borrow_mut().pending_hides.push(id.clone());
        Ok(())
    }

    fn confirms_show(&self) -> bool {
        self.confirm_show
    }
}
