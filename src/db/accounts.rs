//! Account records: listing, upsert, import and cascading removal.

use crate::error::DatabaseError;
use crate::types::{Account, AccountId};
use crate::{Error, Result};

use super::{AccountRow, Database, to_i64};

impl Database {
    /// List all accounts in import order
    pub async fn all_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, display_name, completed, message_count, item_count,
                   total_count, last_sync_time, searchable
            FROM accounts
            ORDER BY position ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list accounts: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(Account::from).collect())
    }

    /// Get one account by id
    pub async fn find_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, display_name, completed, message_count, item_count,
                   total_count, last_sync_time, searchable
            FROM accounts
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get account: {}",
                e
            )))
        })?;

        Ok(row.map(Account::from))
    }

    /// Insert an account or replace its fields, keeping its list position
    pub async fn upsert_account(&self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (
                id, position, display_name, completed, message_count,
                item_count, total_count, last_sync_time, searchable
            )
            VALUES (?, (SELECT COALESCE(MAX(position), 0) + 1 FROM accounts), ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                completed = excluded.completed,
                message_count = excluded.message_count,
                item_count = excluded.item_count,
                total_count = excluded.total_count,
                last_sync_time = excluded.last_sync_time,
                searchable = excluded.searchable
            "#,
        )
        .bind(&account.id)
        .bind(&account.display_name)
        .bind(account.completed)
        .bind(to_i64(account.message_count))
        .bind(to_i64(account.item_count))
        .bind(to_i64(account.total_count))
        .bind(account.last_sync_time)
        .bind(account.searchable)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to save account {}: {}",
                account.id, e
            )))
        })?;

        Ok(())
    }

    /// Delete an account, its items, and the payloads of those items
    ///
    /// Runs in one transaction.
    pub async fn delete_account(&self, id: &AccountId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            DELETE FROM payloads
            WHERE url IN (SELECT canonical_link FROM items WHERE account_id = ?)
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to delete payloads of {}: {}",
                id, e
            )))
        })?;

        sqlx::query("DELETE FROM items WHERE account_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete items of {}: {}",
                    id, e
                )))
            })?;

        sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete account {}: {}",
                    id, e
                )))
            })?;

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit account removal: {}",
                e
            )))
        })?;

        tracing::info!(account_id = %id, "account removed");
        Ok(())
    }
}
