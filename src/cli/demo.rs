use anyhow::{anyhow, Result};
use clap::{Args, ValueEnum};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use scrim::config::Config;
use scrim::dom::{Document, DomEvent, ElementSpec, Selector};
use scrim::engine::{HideCompletion, ScriptedEngine};
use scrim::gate::{Input, PreconditionGate};
use scrim::surface::Control;
use scrim::{OverlayCoordinator, OverlayEvent};

/// What the scripted user does once the dialog is up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Choice {
    /// Accept the dialog
    #[default]
    Accept,
    /// Dismiss it with the cancel button
    Cancel,
    /// Have the host page throw the dialog's markup away
    Evict,
}

/// Run a scripted session and print the overlay event stream
#[derive(Debug, Args)]
pub struct DemoCommand {
    /// What to do when the dialog appears
    #[arg(long, value_enum, default_value_t = Choice::Accept)]
    pub choice: Choice,

    /// Pause before acting on the dialog
    #[arg(long, value_parser = humantime::parse_duration, default_value = "300ms")]
    pub think: Duration,
}

impl Default for DemoCommand {
    fn default() -> Self {
        Self {
            choice: Choice::Accept,
            think: Duration::from_millis(300),
        }
    }
}

fn toolbar() -> ElementSpec {
    ElementSpec::new("div").with_class("toolbar").with_child(
        ElementSpec::new("button")
            .with_id("start-scan")
            .with_class("btn")
            .with_class("scan")
            .with_text("Start scan"),
    )
}

const DEMO_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head><title>scrim demo</title></head>
  <body>
    <div class="toolbar">
      <button id="start-scan" class="btn scan">Start scan</button>
    </div>
    <main id="results"></main>
  </body>
</html>"#;

impl DemoCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        let settings = config.gate_settings();
        let surface_id = settings.surface_id.clone();
        let trigger_selector = Selector::parse(&settings.trigger_selector)?;

        let (engine_tx, mut engine_rx) = mpsc::unbounded_channel();
        let engine = ScriptedEngine::new(HideCompletion::After(config.hide_delay))
            .with_notifier(engine_tx)
            .with_show_confirmation(config.confirm_show);

        let mut coordinator =
            OverlayCoordinator::with_document(Document::parse(DEMO_PAGE), Box::new(engine), &config.backdrop_class)?;
        for (name, content) in &config.templates {
            coordinator.register_template(name.clone(), content.clone());
        }

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        coordinator.set_event_sender(event_tx);

        // Print the event stream; stop the loop once the flow has finished
        let shutdown = input_tx.clone();
        let watched = surface_id.clone();
        let printer = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => warn!("Failed to encode event: {}", e),
                }
                let finished = match &event {
                    OverlayEvent::SurfaceClosed { .. } => event.surface_id() == Some(&watched),
                    OverlayEvent::Proceeded { .. } => true,
                    _ => false,
                };
                if finished {
                    let _ = shutdown.send(Input::Shutdown);
                }
            }
        });

        let mut gate = PreconditionGate::new(
            coordinator,
            config.ack_store(),
            settings,
            |reason| info!("Gated action running ({:?})", reason),
        );
        gate.install()?;

        // The host re-renders its toolbar before the user gets to it
        let page = gate.coordinator_mut().document_mut();
        if let Some(old) = page.query(&Selector::parse(".toolbar")?) {
            page.replace(old, toolbar());
        }

        let trigger = gate
            .coordinator()
            .document()
            .query(&trigger_selector)
            .ok_or_else(|| anyhow!("Trigger '{}' matches nothing on the demo page", trigger_selector))?;
        gate.handle_input(Input::Dom(DomEvent::click(trigger)))?;
        gate.drain().await?;

        while let Ok(notification) = engine_rx.try_recv() {
            gate.handle_input(Input::Engine(notification))?;
        }

        if gate.coordinator().state(&surface_id).is_some_and(|s| s.is_live()) {
            tokio::time::sleep(self.think).await;
            self.act(&mut gate, &surface_id).await?;

            let forward = input_tx.clone();
            tokio::spawn(async move {
                while let Some(notification) = engine_rx.recv().await {
                    if forward.send(Input::Engine(notification)).is_err() {
                        break;
                    }
                }
            });

            let deadline = config.hide_delay * 4 + config.reconcile_interval + Duration::from_secs(2);
            if tokio::time::timeout(deadline, gate.run(input_rx)).await.is_err() {
                warn!("'{}' never finished closing; tearing down", surface_id);
                gate.coordinator_mut().teardown();
            }
        } else {
            debug!("No dialog to act on");
            gate.coordinator_mut().teardown();
        }

        drop(gate);
        drop(input_tx);
        printer.await?;
        Ok(())
    }

    async fn act<P>(&self, gate: &mut PreconditionGate<P>, surface_id: &scrim::SurfaceId) -> Result<()>
    where
        P: scrim::Precondition + 'static,
    {
        let control = match self.choice {
            Choice::Accept => Control::Accept,
            Choice::Cancel => Control::Cancel,
            Choice::Evict => {
                info!("Host removes '{}' from the page", surface_id);
                let coordinator = gate.coordinator_mut();
                if let Some(root) = coordinator
                    .surface(surface_id)
                    .and_then(|s| s.root(coordinator.document()))
                {
                    coordinator.document_mut().remove(root);
                }
                return Ok(());
            }
        };

        let node = gate
            .coordinator()
            .document()
            .query(&control.selector(surface_id)?)
            .ok_or_else(|| anyhow!("'{}' has no {} control", surface_id, control.as_str()))?;
        info!("User clicks {}", control.as_str());
        gate.handle_input(Input::Dom(DomEvent::click(node)))?;
        gate.drain().await?;
        Ok(())
    }
}
