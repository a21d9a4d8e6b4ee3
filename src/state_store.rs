use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::types::{ActiveSignal, OpenPosition};

const SNAPSHOT_VERSION: u32 = 1;

/// The state-store tree persisted to disk (§6.4 "State snapshots").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateTree {
    pub daily_pnl: rust_decimal::Decimal,
    pub daily_pnl_date: Option<chrono::NaiveDate>,
    pub active_signal: Option<ActiveSignal>,
    pub active_monitors: Vec<OpenPosition>,
    pub execution_armed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    snapshot_at: DateTime<Utc>,
    state: StateTree,
}

/// Writes and prunes JSON state snapshots (§6.4). File naming:
/// `snapshot_<YYYYMMDD_HHMMSS>.json`; the N most recent are retained.
pub struct StateStore {
    dir: PathBuf,
    retention: usize,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention,
        }
    }

    pub async fn save(&self, state: &StateTree, at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).await?;
        let filename = format!("snapshot_{}.json", at.format("%Y%m%d_%H%M%S"));
        let path = self.dir.join(filename);

        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            snapshot_at: at,
            state: state.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        fs::write(&path, json).await.context("writing state snapshot")?;
        info!(path = %path.display(), "state snapshot written");

        self.prune().await?;
        Ok(path)
    }

    pub async fn load_latest(&self) -> Result<Option<(StateTree, DateTime<Utc>)>> {
        let mut entries = self.list_snapshots().await?;
        entries.sort();
        let Some(latest) = entries.last() else {
            return Ok(None);
        };
        let bytes = fs::read(latest).await?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Some((snapshot.state, snapshot.snapshot_at)))
    }

    async fn list_snapshots(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut read_dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                out.push(path);
            }
        }
        Ok(out)
    }

    async fn prune(&self) -> Result<()> {
        let mut entries = self.list_snapshots().await?;
        entries.sort();
        if entries.len() > self.retention {
            let to_remove = entries.len() - self.retention;
            for path in &entries[..to_remove] {
                fs::remove_file(path).await.ok();
            }
        }
        Ok(())
    }
}

/// Appends events to a JSONL log for restore-and-replay (§6.4): restore the
/// latest snapshot, then replay events whose `timestamp > snapshot.snapshot_at`.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn append(&self, envelope: &crate::events::EventEnvelope) -> Result<()> {
        let line = serde_json::to_string(envelope)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        Ok(())
    }

    /// Events after `since` (exclusive), for replay atop a restored snapshot.
    pub async fn replay_since(&self, since: DateTime<Utc>) -> Result<Vec<ReplayedEvent>> {
        if !Path::new(&self.path).exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        let mut out = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let parsed: ReplayedEvent = serde_json::from_str(line)?;
            if parsed.timestamp > since {
                out.push(parsed);
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("state-store-test-{}", uuid::Uuid::new_v4()));
        let store = StateStore::new(&dir, 100);
        let mut state = StateTree::default();
        state.execution_armed = true;

        let at = Utc::now();
        store.save(&state, at).await.unwrap();

        let (loaded, snapshot_at) = store.load_latest().await.unwrap().unwrap();
        assert!(loaded.execution_armed);
        assert_eq!(snapshot_at.timestamp(), at.timestamp());

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn prune_keeps_only_retention_count() {
        let dir = std::env::temp_dir().join(format!("state-store-prune-{}", uuid::Uuid::new_v4()));
        let store = StateStore::new(&dir, 2);
        let state = StateTree::default();

        for i in 0..4 {
            let at = Utc::now() + chrono::Duration::seconds(i);
            store.save(&state, at).await.unwrap();
        }

        let remaining = store.list_snapshots().await.unwrap();
        assert_eq!(remaining.len(), 2);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
