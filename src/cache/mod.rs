//! Item cache interface
//!
//! The cache stores account records, item metadata and downloaded payloads.
//! Two interchangeable backends implement [`ItemCache`]:
//! - [`MemoryCache`] - in-process maps, for tests and short-lived runs
//! - [`Database`](crate::db::Database) - SQLite via sqlx
//!
//! The pipeline picks one at construction time and only talks to the trait.
//! Writes are insert-if-absent so repeated or concurrent syncs of the same
//! page redo work without corrupting state.

use crate::error::Result;
use crate::types::{Account, AccountId, FetchMode, Item, Payload};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

mod memory;

pub use memory::MemoryCache;

/// Storage for accounts, items and payloads
#[async_trait]
pub trait ItemCache: Send + Sync {
    /// All tracked accounts, in import order
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Look up one account
    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// Insert or replace an account record
    async fn save_account(&self, account: &Account) -> Result<()>;

    /// Register accounts from an external list
    ///
    /// Counters and `completed` are reset for every imported account. This
    /// is the only operation that turns `completed` back off.
    async fn import_accounts(&self, accounts: &[Account]) -> Result<()>;

    /// Remove an account together with its items and their payloads
    async fn remove_account(&self, id: &AccountId) -> Result<()>;

    /// Whether any cached item of the account was created before `timestamp`
    async fn has_item_older_than(&self, account_id: &AccountId, timestamp: i64) -> Result<bool>;

    /// Creation time of the newest cached item of the account
    async fn latest_create_time(&self, account_id: &AccountId) -> Result<Option<i64>>;

    /// Insert an item unless `(account_id, item_id)` is already cached
    ///
    /// Returns whether the item was inserted. Existing records are never
    /// overwritten.
    async fn insert_if_absent(&self, item: &Item) -> Result<bool>;

    /// All cached items of the account, newest first
    async fn get_items(&self, account_id: &AccountId) -> Result<Vec<Item>>;

    /// Flag every item with this canonical link as deleted
    ///
    /// Returns the number of items changed.
    async fn mark_deleted(&self, url: &str) -> Result<u64>;

    /// Move the item with this canonical link to another account
    ///
    /// Returns whether an item was moved. An item already cached under the
    /// target account is left alone.
    async fn reassign_item(&self, url: &str, account_id: &AccountId) -> Result<bool>;

    /// Subset of `urls` that already have a payload of this mode
    async fn batch_exists(&self, urls: &[String], mode: FetchMode) -> Result<HashSet<String>>;

    /// Store a payload, replacing any previous one for the same url and mode
    async fn store_payload(&self, payload: &Payload) -> Result<()>;

    /// Payloads of this mode for the given urls, keyed by url
    async fn get_payloads(
        &self,
        urls: &[String],
        mode: FetchMode,
    ) -> Result<HashMap<String, Payload>>;
}

/// Reset the sync counters of an account being (re)imported
pub(crate) fn reset_for_import(account: &Account) -> Account {
    Account {
        completed: false,
        message_count: 0,
        item_count: 0,
        total_count: 0,
        last_sync_time: None,
        ..account.clone()
    }
}
