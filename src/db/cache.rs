//! [`ItemCache`] and [`CheckpointStore`] over SQLite.

use crate::Result;
use crate::cache::{ItemCache, reset_for_import};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::types::{Account, AccountId, FetchMode, Item, Payload};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

use super::Database;

#[async_trait]
impl ItemCache for Database {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.all_accounts().await
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        self.find_account(id).await
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        self.upsert_account(account).await
    }

    async fn import_accounts(&self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            self.upsert_account(&reset_for_import(account)).await?;
        }
        tracing::info!(count = accounts.len(), "accounts imported");
        Ok(())
    }

    async fn remove_account(&self, id: &AccountId) -> Result<()> {
        self.delete_account(id).await
    }

    async fn has_item_older_than(&self, account_id: &AccountId, timestamp: i64) -> Result<bool> {
        self.has_item_before(account_id, timestamp).await
    }

    async fn latest_create_time(&self, account_id: &AccountId) -> Result<Option<i64>> {
        self.newest_create_time(account_id).await
    }

    async fn insert_if_absent(&self, item: &Item) -> Result<bool> {
        self.insert_item_if_absent(item).await
    }

    async fn get_items(&self, account_id: &AccountId) -> Result<Vec<Item>> {
        self.list_items(account_id).await
    }

    async fn mark_deleted(&self, url: &str) -> Result<u64> {
        self.set_item_deleted(url).await
    }

    async fn reassign_item(&self, url: &str, account_id: &AccountId) -> Result<bool> {
        self.move_item(url, account_id).await
    }

    async fn batch_exists(&self, urls: &[String], mode: FetchMode) -> Result<HashSet<String>> {
        self.existing_payload_urls(urls, mode).await
    }

    async fn store_payload(&self, payload: &Payload) -> Result<()> {
        self.upsert_payload(payload).await
    }

    async fn get_payloads(
        &self,
        urls: &[String],
        mode: FetchMode,
    ) -> Result<HashMap<String, Payload>> {
        self.load_payloads(urls, mode).await
    }
}

#[async_trait]
impl CheckpointStore for Database {
    async fn persist(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.save_checkpoint(checkpoint).await
    }

    async fn load(&self) -> Result<Option<Checkpoint>> {
        self.load_checkpoint().await
    }

    async fn clear(&self) -> Result<()> {
        self.delete_checkpoint().await
    }
}
