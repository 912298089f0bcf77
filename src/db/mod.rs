//! Database layer for pubsync
//!
//! Handles SQLite persistence for accounts, items, payloads and the pipeline
//! checkpoint.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`accounts`] - Account records and import/removal
//! - [`items`] - Item metadata, boundary queries, deletion and reassignment
//! - [`payloads`] - Downloaded payload bodies
//! - [`state`] - Runtime state (pipeline checkpoint)
//!
//! [`Database`] implements both [`ItemCache`](crate::cache::ItemCache) and
//! [`CheckpointStore`](crate::checkpoint::CheckpointStore), see [`cache`].

use crate::types::{Account, AccountId, FetchMode, Item, Payload};
use sqlx::{FromRow, sqlite::SqlitePool};

mod accounts;
mod cache;
mod items;
mod migrations;
mod payloads;
mod state;

/// Account record from database
#[derive(Debug, Clone, FromRow)]
pub(crate) struct AccountRow {
    pub id: String,
    pub display_name: String,
    pub completed: bool,
    pub message_count: i64,
    pub item_count: i64,
    pub total_count: i64,
    pub last_sync_time: Option<i64>,
    pub searchable: bool,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: AccountId(row.id),
            display_name: row.display_name,
            completed: row.completed,
            message_count: u64::try_from(row.message_count).unwrap_or(0),
            item_count: u64::try_from(row.item_count).unwrap_or(0),
            total_count: u64::try_from(row.total_count).unwrap_or(0),
            last_sync_time: row.last_sync_time,
            searchable: row.searchable,
        }
    }
}

/// Item record from database
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ItemRow {
    pub account_id: String,
    pub item_id: String,
    pub title: String,
    pub canonical_link: String,
    pub create_time: i64,
    pub sequence_index: i64,
    pub deleted: bool,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            item_id: row.item_id,
            account_id: AccountId(row.account_id),
            title: row.title,
            canonical_link: row.canonical_link,
            create_time: row.create_time,
            sequence_index: u32::try_from(row.sequence_index).unwrap_or(0),
            deleted: row.deleted,
        }
    }
}

/// Payload record from database
#[derive(Debug, Clone, FromRow)]
pub(crate) struct PayloadRow {
    pub url: String,
    pub mode: String,
    pub body: String,
    pub corrected_account_id: Option<String>,
    pub fetched_at: i64,
}

impl PayloadRow {
    fn into_payload(self) -> Option<Payload> {
        Some(Payload {
            mode: FetchMode::parse(&self.mode)?,
            url: self.url,
            body: self.body,
            corrected_account_id: self.corrected_account_id.map(AccountId),
            fetched_at: chrono::DateTime::from_timestamp(self.fetched_at, 0).unwrap_or_default(),
        })
    }
}

/// Clamp an unsigned counter into SQLite's integer range
fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Database handle for pubsync
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
