use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use super::ack::{ResetCommand, StatusCommand};
use super::demo::DemoCommand;
use scrim::config::Config;

/// Scrim - modal overlays that clean up after themselves
#[derive(Parser)]
#[command(
    name = "scrim",
    version,
    about = "Modal overlays that clean up after themselves",
    long_about = r#"Scrim coordinates modal dialogs over a shared backdrop: one dialog holds focus at a time,
the backdrop is reference counted, and gated actions run only after a dialog has fully closed.

Examples:
  scrim                           # Run the scripted demo
  scrim demo --choice cancel      # Dismiss the dialog instead of accepting
  scrim status                    # Show the stored acknowledgment
  scrim reset                     # Forget the stored acknowledgment"#
)]
pub struct Cli {
    /// Configuration file (defaults to ./.scrim.json, ./scrim.json, then the user config dir)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'd', long = "debug", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted session and print the overlay event stream
    Demo(DemoCommand),
    /// Print the effective configuration
    Config,
    /// Forget the stored acknowledgment
    Reset(ResetCommand),
    /// Show the stored acknowledgment
    Status(StatusCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        if self.debug {
            debug!("Debug logging enabled");
        }

        let config = Config::init(self.config.as_deref()).await?;
        debug!("Configuration initialized");

        match self.command {
            Some(Commands::Demo(demo)) => demo.execute(&config).await,
            Some(Commands::Config) => {
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            Some(Commands::Reset(reset)) => reset.execute(&config).await,
            Some(Commands::Status(status)) => status.execute(&config).await,
            None => DemoCommand::default().execute(&config).await,
        }
    }
}
