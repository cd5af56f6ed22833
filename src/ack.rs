//! File-backed acknowledgment store
//!
//! Remembers that the user accepted the gating dialog. The record is a small
//! JSON file; it goes stale after a time-to-live, or when the required
//! acknowledgment version moves past the one that was recorded.

use crate::gate::{Precondition, PreconditionResult};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Stored acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckRecord {
    pub acknowledged_at: DateTime<Utc>,
    pub version: u32,
}

/// Acknowledgment state as reported by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckStatus {
    pub path: PathBuf,
    pub result: PreconditionResult,
    pub record: Option<AckRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AckStore {
    path: PathBuf,
    ttl: Duration,
    version: u32,
}

impl AckStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration, version: u32) -> Self {
        Self {
            path: path.into(),
            ttl,
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the record; `None` when nothing has been stored yet
    pub async fn load(&self) -> Result<Option<AckRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read acknowledgment from {}", self.path.display())
                })
            }
        };

        let record = serde_json::from_str(&content).with_context(|| {
            format!("Malformed acknowledgment record in {}", self.path.display())
        })?;
        Ok(Some(record))
    }

    /// Classify a record against the current version and time
    pub fn evaluate(&self, record: Option<&AckRecord>, now: DateTime<Utc>) -> PreconditionResult {
        let Some(record) = record else {
            return PreconditionResult::Missing;
        };
        if record.version < self.version {
            return PreconditionResult::Expired;
        }
        // Timestamps from the future count as fresh
        let age = (now - record.acknowledged_at).to_std().unwrap_or_default();
        if age > self.ttl {
            PreconditionResult::Expired
        } else {
            PreconditionResult::Valid
        }
    }

    /// Store a fresh acknowledgment, creating parent directories as needed
    pub async fn record(&self, now: DateTime<Utc>) -> Result<AckRecord> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let record = AckRecord {
            acknowledged_at: now,
            version: self.version,
        };
        let content = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&self.path, content)
            .await
            .with_context(|| format!("Failed to write {}", self.path.display()))?;

        info!("Acknowledgment recorded at {}", self.path.display());
        Ok(record)
    }

    /// Forget the stored acknowledgment. Returns whether there was one.
    pub async fn reset(&self) -> Result<bool> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Removed acknowledgment {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }

    pub async fn status(&self) -> Result<AckStatus> {
        let record = self.load().await?;
        let result = self.evaluate(record.as_ref(), Utc::now());
        let expires_at = record.as_ref().and_then(|r| {
            chrono::Duration::from_std(self.ttl)
                .ok()
                .and_then(|ttl| r.acknowledged_at.checked_add_signed(ttl))
        });

        Ok(AckStatus {
            path: self.path.clone(),
            result,
            record,
            expires_at,
        })
    }
}

#[async_trait(?Send)]
impl Precondition for AckStore {
    async fn check(&self) -> anyhow::Result<PreconditionResult> {
        let record = self.load().await?;
        let result = self.evaluate(record.as_ref(), Utc::now());
        debug!("Acknowledgment check: {:?}", result);
        Ok(result)
    }

    async fn acknowledge(&self) -> anyhow::Result<()> {
        self.record(Utc::now()).await?;
        Ok(())
    }
}
