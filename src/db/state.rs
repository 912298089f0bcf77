//! Runtime state: the persisted pipeline checkpoint.

use crate::checkpoint::Checkpoint;
use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

/// runtime_state key holding the JSON-encoded checkpoint
const CHECKPOINT_KEY: &str = "pipeline_checkpoint";

impl Database {
    /// Write the checkpoint, replacing any previous one
    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let value = serde_json::to_string(checkpoint)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(CHECKPOINT_KEY)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save checkpoint: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Read the checkpoint, if one was saved
    ///
    /// A checkpoint that no longer deserializes is logged and treated as absent.
    pub async fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(CHECKPOINT_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to load checkpoint: {}",
                        e
                    )))
                })?;

        let Some(value) = value else {
            return Ok(None);
        };

        match serde_json::from_str(&value) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable checkpoint");
                Ok(None)
            }
        }
    }

    /// Remove the saved checkpoint
    pub async fn delete_checkpoint(&self) -> Result<()> {
        sqlx::query("DELETE FROM runtime_state WHERE key = ?")
            .bind(CHECKPOINT_KEY)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear checkpoint: {}",
                    e
                )))
            })?;

        Ok(())
    }
}
