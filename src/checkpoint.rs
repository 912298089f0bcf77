//! Pipeline checkpoints
//!
//! A [`Checkpoint`] is the persisted snapshot of the orchestrator's state. It
//! is written after discrete milestones (account finished, phase change,
//! pause) rather than on every mutation, and read back once at startup.
//! Checkpoints older than the configured maximum age are discarded.

use crate::error::Result;
use crate::sync::SyncCursor;
use crate::types::{AccountId, LogEntry, Phase, PhaseProgress};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Persisted snapshot of the pipeline state
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The pipeline loop was running
    pub running: bool,
    /// The pipeline was paused
    pub paused: bool,
    /// Phase at the time of the snapshot
    pub current_phase: Phase,
    /// Account being worked on
    pub current_account_id: Option<AccountId>,
    /// Sync phase counters
    pub sync_progress: PhaseProgress,
    /// Download phase counters
    pub download_progress: PhaseProgress,
    /// Export phase counters
    pub export_progress: PhaseProgress,
    /// Accounts finished in the current round
    pub processed_account_ids: Vec<AccountId>,
    /// Round failures in a row
    pub consecutive_error_count: u32,
    /// Privileged-path pagination cursors
    #[serde(default)]
    pub sync_cursors: HashMap<AccountId, SyncCursor>,
    /// Newest log entries, most recent first
    pub logs: Vec<LogEntry>,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Whether the snapshot is older than `max_age` at `now`
    pub fn is_stale(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.saved_at);
        age.to_std().is_ok_and(|age| age > max_age)
    }

    /// Whether a restart should offer to continue this run
    pub fn is_resumable(&self) -> bool {
        self.running && !self.paused
    }
}

/// Durable storage for the pipeline checkpoint
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Replace the stored checkpoint
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Read the stored checkpoint, if any
    async fn load(&self) -> Result<Option<Checkpoint>>;

    /// Remove the stored checkpoint
    async fn clear(&self) -> Result<()>;
}

/// Load the stored checkpoint, discarding it if it is stale
///
/// A stale checkpoint is also removed from the store.
pub async fn load_fresh(
    store: &dyn CheckpointStore,
    max_age: Duration,
) -> Result<Option<Checkpoint>> {
    let Some(checkpoint) = store.load().await? else {
        return Ok(None);
    };

    if checkpoint.is_stale(max_age, Utc::now()) {
        tracing::info!(
            saved_at = %checkpoint.saved_at,
            max_age_secs = max_age.as_secs(),
            "discarding stale checkpoint"
        );
        store.clear().await?;
        return Ok(None);
    }

    Ok(Some(checkpoint))
}

/// Checkpoint store that lives only as long as the process
#[derive(Default)]
pub struct MemoryCheckpointStore {
    slot: Mutex<Option<Checkpoint>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.slot.lock().await = Some(checkpoint.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        Ok(self.slot.lock().await.clone())
    }

    async fn clear(&self) -> Result<()> {
        *self.slot.lock().await = None;
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_checkpoint(saved_at: DateTime<Utc>) -> Checkpoint {
        Checkpoint {
            running: true,
            paused: false,
            current_phase: Phase::Download,
            current_account_id: Some(AccountId::from("a")),
            sync_progress: PhaseProgress {
                current: 2,
                total: 5,
                detail: "Alpha".to_string(),
            },
            download_progress: PhaseProgress::default(),
            export_progress: PhaseProgress::default(),
            processed_account_ids: vec![AccountId::from("x"), AccountId::from("y")],
            consecutive_error_count: 1,
            sync_cursors: HashMap::new(),
            logs: Vec::new(),
            saved_at,
        }
    }

    #[test]
    fn staleness_uses_max_age() {
        let now = Utc::now();
        let day = Duration::from_secs(24 * 60 * 60);

        let fresh = sample_checkpoint(now - chrono::Duration::hours(23));
        let stale = sample_checkpoint(now - chrono::Duration::hours(25));

        assert!(!fresh.is_stale(day, now));
        assert!(stale.is_stale(day, now));
    }

    #[test]
    fn resumable_requires_running_and_not_paused() {
        let mut checkpoint = sample_checkpoint(Utc::now());
        assert!(checkpoint.is_resumable());

        checkpoint.paused = true;
        assert!(!checkpoint.is_resumable());

        checkpoint.paused = false;
        checkpoint.running = false;
        assert!(!checkpoint.is_resumable());
    }

    #[tokio::test]
    async fn load_fresh_discards_and_clears_stale() {
        let store = MemoryCheckpointStore::new();
        let stale = sample_checkpoint(Utc::now() - chrono::Duration::days(2));
        store.persist(&stale).await.unwrap();

        let loaded = load_fresh(&store, Duration::from_secs(86_400)).await.unwrap();

        assert!(loaded.is_none());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_fresh_returns_recent_checkpoint() {
        let store = MemoryCheckpointStore::new();
        let recent = sample_checkpoint(Utc::now());
        store.persist(&recent).await.unwrap();

        let loaded = load_fresh(&store, Duration::from_secs(86_400)).await.unwrap();

        assert_eq!(loaded, Some(recent));
    }
}
