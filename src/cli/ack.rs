use anyhow::Result;
use clap::Args;
use tracing::debug;

use scrim::config::Config;

/// Forget the stored acknowledgment
#[derive(Debug, Args)]
pub struct ResetCommand {}

impl ResetCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        let store = config.ack_store();
        debug!("Resetting acknowledgment at {}", store.path().display());

        if store.reset().await? {
            println!("Removed acknowledgment at {}", store.path().display());
        } else {
            println!("No acknowledgment stored at {}", store.path().display());
        }
        Ok(())
    }
}

/// Show the stored acknowledgment
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Print the status as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCommand {
    pub async fn execute(&self, config: &Config) -> Result<()> {
        let store = config.ack_store();
        let status = store.status().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!("Path:    {}", status.path.display());
        println!("Status:  {:?}", status.result);
        println!("TTL:     {}", humantime::format_duration(store.ttl()));
        if let Some(record) = &status.record {
            println!("Since:   {}", record.acknowledged_at.to_rfc3339());
            println!("Version: {} (required {})", record.version, config.ack_version);
        }
        if let Some(expires_at) = status.expires_at {
            println!("Expires: {}", expires_at.to_rfc3339());
        }
        Ok(())
    }
}
