use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Marker for the most recent listing seen in a successful run.
///
/// Owned by the driver: read once at startup to derive the `published_after`
/// bound, written once at the end of a run. The provider never touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_fetched: DateTime<Utc>,
    pub last_seen_id: Option<String>,
}

/// Loads the checkpoint, or `None` on the first run.
pub async fn load(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read checkpoint {}", path.display()))?;
    let checkpoint = serde_json::from_str(&raw)
        .with_context(|| format!("Malformed checkpoint {}", path.display()))?;
    Ok(Some(checkpoint))
}

pub async fn store(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    let json = serde_json::to_string_pretty(checkpoint)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write checkpoint {}", path.display()))
}
