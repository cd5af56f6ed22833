use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ack::AckStore;
use crate::dom::Selector;
use crate::gate::GateSettings;
use crate::surface::{SurfaceContent, SurfaceId};

/// Durations are written the way people say them: "30d", "250ms"
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Selector of the control that starts the gated action
    pub trigger_selector: String,

    /// Id of the gating dialog
    pub surface_id: String,

    /// Template the dialog is built from
    pub template: String,

    /// Dialog templates by name
    pub templates: HashMap<String, SurfaceContent>,

    /// Class carried by the backdrop element
    pub backdrop_class: String,

    /// Where the acknowledgment record lives
    pub ack_path: PathBuf,

    /// How long an acknowledgment stays valid
    #[serde(with = "duration_str")]
    pub ack_ttl: Duration,

    /// Acknowledgments recorded under an older version are expired
    pub ack_version: u32,

    /// Hide animation length of the scripted engine
    #[serde(with = "duration_str")]
    pub hide_delay: Duration,

    /// Period of the backdrop/eviction reconcile sweep
    #[serde(with = "duration_str")]
    pub reconcile_interval: Duration,

    /// Whether the engine confirms presentation before a surface counts as open
    pub confirm_show: bool,
}

impl Default for Config {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "attestation".to_string(),
            SurfaceContent::new(
                "Before you scan",
                "Confirm that you are authorized to scan the selected targets.",
            )
            .with_accept_label("I am authorized"),
        );

        Self {
            trigger_selector: "#start-scan".to_string(),
            surface_id: "scan-attest".to_string(),
            template: "attestation".to_string(),
            templates,
            backdrop_class: crate::backdrop::DEFAULT_BACKDROP_CLASS.to_string(),
            ack_path: default_ack_path(),
            ack_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            ack_version: 1,
            hide_delay: Duration::from_millis(250),
            reconcile_interval: Duration::from_secs(5),
            confirm_show: false,
        }
    }
}

fn default_ack_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("scrim"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .join("ack.json")
}

impl Config {
    /// Initialize configuration: defaults, then the first config file found,
    /// then `SCRIM_*` environment variables
    pub async fn init(explicit: Option<&Path>) -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = match explicit {
            Some(path) => Self::load_file(path).await?,
            None => Self::load_from_file().await?.unwrap_or_default(),
        };
        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from the usual locations
    pub async fn load_from_file() -> Result<Option<Self>> {
        // Priority:
        // 1. ./.scrim.json
        // 2. ./scrim.json
        // 3. $CONFIG/scrim/scrim.json
        let mut config_paths = vec![PathBuf::from("./.scrim.json"), PathBuf::from("./scrim.json")];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("scrim").join("scrim.json"));
        }

        for path in config_paths {
            if path.exists() {
                return Self::load_file(&path).await.map(Some);
            }
        }
        Ok(None)
    }

    pub async fn load_file(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Load configuration from environment variables
    pub fn load_from_env(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply `SCRIM_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(trigger) = lookup("SCRIM_TRIGGER") {
            self.trigger_selector = trigger;
        }
        if let Some(id) = lookup("SCRIM_SURFACE_ID") {
            self.surface_id = id;
        }
        if let Some(template) = lookup("SCRIM_TEMPLATE") {
            self.template = template;
        }
        if let Some(class) = lookup("SCRIM_BACKDROP_CLASS") {
            self.backdrop_class = class;
        }
        if let Some(path) = lookup("SCRIM_ACK_PATH") {
            self.ack_path = PathBuf::from(path);
        }
        if let Some(ttl) = lookup("SCRIM_ACK_TTL") {
            self.ack_ttl = parse_duration("SCRIM_ACK_TTL", &ttl)?;
        }
        if let Some(version) = lookup("SCRIM_ACK_VERSION") {
            self.ack_version = version
                .parse()
                .with_context(|| format!("SCRIM_ACK_VERSION must be a number, got '{version}'"))?;
        }
        if let Some(delay) = lookup("SCRIM_HIDE_DELAY") {
            self.hide_delay = parse_duration("SCRIM_HIDE_DELAY", &delay)?;
        }
        if let Some(interval) = lookup("SCRIM_RECONCILE_INTERVAL") {
            self.reconcile_interval = parse_duration("SCRIM_RECONCILE_INTERVAL", &interval)?;
        }
        if let Some(confirm) = lookup("SCRIM_CONFIRM_SHOW") {
            self.confirm_show = confirm.to_lowercase() == "true";
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        Selector::parse(&self.trigger_selector).context("trigger_selector")?;
        Selector::id(&self.surface_id).context("surface_id")?;
        Selector::parse(&format!(".{}", self.backdrop_class)).context("backdrop_class")?;

        if !self.templates.contains_key(&self.template) {
            return Err(anyhow!(
                "Template '{}' is not defined in templates",
                self.template
            ));
        }
        if self.reconcile_interval.is_zero() {
            return Err(anyhow!("reconcile_interval must be greater than 0"));
        }
        if self.ack_version == 0 {
            return Err(anyhow!("ack_version must be at least 1"));
        }
        Ok(())
    }

    pub fn gate_settings(&self) -> GateSettings {
        GateSettings {
            trigger_selector: self.trigger_selector.clone(),
            surface_id: SurfaceId::new(self.surface_id.clone()),
            template: self.template.clone(),
            reconcile_interval: self.reconcile_interval,
        }
    }

    pub fn ack_store(&self) -> AckStore {
        AckStore::new(self.ack_path.clone(), self.ack_ttl, self.ack_version)
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("{key} is not a duration: '{value}'"))
}
