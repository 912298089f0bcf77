//! Item metadata: insert-if-absent, boundary queries, deletion and reassignment.

use crate::error::DatabaseError;
use crate::types::{AccountId, Item};
use crate::{Error, Result};

use super::{Database, ItemRow};

impl Database {
    /// Insert an item unless its `(account_id, item_id)` already exists
    ///
    /// Returns true if a row was inserted.
    pub async fn insert_item_if_absent(&self, item: &Item) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO items (
                account_id, item_id, title, canonical_link,
                create_time, sequence_index, deleted
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account_id, item_id) DO NOTHING
            "#,
        )
        .bind(&item.account_id)
        .bind(&item.item_id)
        .bind(&item.title)
        .bind(&item.canonical_link)
        .bind(item.create_time)
        .bind(i64::from(item.sequence_index))
        .bind(item.deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert item {}: {}",
                item.item_id, e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Get all items of an account, newest first
    pub async fn list_items(&self, account_id: &AccountId) -> Result<Vec<Item>> {
        let rows = sqlx::query_as::<_, ItemRow>(
            r#"
            SELECT account_id, item_id, title, canonical_link,
                   create_time, sequence_index, deleted
            FROM items
            WHERE account_id = ?
            ORDER BY create_time DESC, sequence_index ASC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list items: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Item::from).collect())
    }

    /// Whether any item of the account was created before `timestamp`
    pub async fn has_item_before(&self, account_id: &AccountId, timestamp: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM items WHERE account_id = ? AND create_time < ?",
        )
        .bind(account_id)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to check cache boundary: {}",
                e
            )))
        })?;

        Ok(count > 0)
    }

    /// Creation time of the newest item of the account
    pub async fn newest_create_time(&self, account_id: &AccountId) -> Result<Option<i64>> {
        let newest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(create_time) FROM items WHERE account_id = ?")
                .bind(account_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query newest item: {}",
                        e
                    )))
                })?;

        Ok(newest)
    }

    /// Flag items with this canonical link as deleted
    pub async fn set_item_deleted(&self, url: &str) -> Result<u64> {
        let result =
            sqlx::query("UPDATE items SET deleted = 1 WHERE canonical_link = ? AND deleted = 0")
                .bind(url)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to mark item deleted: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected())
    }

    /// Move the item with this canonical link to another account
    ///
    /// Leaves the cache unchanged if the target already holds the link.
    pub async fn move_item(&self, url: &str, account_id: &AccountId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE items SET account_id = ?
            WHERE rowid = (
                SELECT rowid FROM items WHERE canonical_link = ? AND account_id != ? LIMIT 1
            )
            AND NOT EXISTS (
                SELECT 1 FROM items WHERE canonical_link = ? AND account_id = ?
            )
            "#,
        )
        .bind(account_id)
        .bind(url)
        .bind(account_id)
        .bind(url)
        .bind(account_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reassign item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }
}
