//! In-memory [`ItemCache`] backend.

use super::{ItemCache, reset_for_import};
use crate::error::Result;
use crate::types::{Account, AccountId, FetchMode, Item, Payload};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    accounts: Vec<Account>,
    items: HashMap<AccountId, Vec<Item>>,
    payloads: HashMap<(String, FetchMode), Payload>,
}

/// Cache backed by in-process maps
///
/// Nothing survives the process. Useful for tests and dry runs.
#[derive(Default)]
pub struct MemoryCache {
    inner: RwLock<Inner>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ItemCache for MemoryCache {
    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.inner.read().await.accounts.clone())
    }

    async fn get_account(&self, id: &AccountId) -> Result<Option<Account>> {
        let inner = self.inner.read().await;
        Ok(inner.accounts.iter().find(|a| &a.id == id).cloned())
    }

    async fn save_account(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account.clone(),
            None => inner.accounts.push(account.clone()),
        }
        Ok(())
    }

    async fn import_accounts(&self, accounts: &[Account]) -> Result<()> {
        for account in accounts {
            self.save_account(&reset_for_import(account)).await?;
        }
        Ok(())
    }

    async fn remove_account(&self, id: &AccountId) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.accounts.retain(|a| &a.id != id);
        let removed = inner.items.remove(id).unwrap_or_default();
        let links: HashSet<String> = removed.into_iter().map(|i| i.canonical_link).collect();
        inner.payloads.retain(|(url, _), _| !links.contains(url));
        Ok(())
    }

    async fn has_item_older_than(&self, account_id: &AccountId, timestamp: i64) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .items
            .get(account_id)
            .is_some_and(|items| items.iter().any(|i| i.create_time < timestamp)))
    }

    async fn latest_create_time(&self, account_id: &AccountId) -> Result<Option<i64>> {
        let inner = self.inner.read().await;
        Ok(inner
            .items
            .get(account_id)
            .and_then(|items| items.iter().map(|i| i.create_time).max()))
    }

    async fn insert_if_absent(&self, item: &Item) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let items = inner.items.entry(item.account_id.clone()).or_default();
        if items.iter().any(|i| i.item_id == item.item_id) {
            return Ok(false);
        }
        items.push(item.clone());
        Ok(true)
    }

    async fn get_items(&self, account_id: &AccountId) -> Result<Vec<Item>> {
        let inner = self.inner.read().await;
        let mut items = inner.items.get(account_id).cloned().unwrap_or_default();
        items.sort_by(|a, b| {
            b.create_time
                .cmp(&a.create_time)
                .then(a.sequence_index.cmp(&b.sequence_index))
        });
        Ok(items)
    }

    async fn mark_deleted(&self, url: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut changed = 0;
        for item in inner.items.values_mut().flatten() {
            if item.canonical_link == url && !item.deleted {
                item.deleted = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn reassign_item(&self, url: &str, account_id: &AccountId) -> Result<bool> {
        let mut inner = self.inner.write().await;

        let already_there = inner
            .items
            .get(account_id)
            .is_some_and(|items| items.iter().any(|i| i.canonical_link == url));
        if already_there {
            return Ok(false);
        }

        let mut moved = None;
        for items in inner.items.values_mut() {
            if let Some(pos) = items.iter().position(|i| i.canonical_link == url) {
                moved = Some(items.remove(pos));
                break;
            }
        }

        match moved {
            Some(mut item) => {
                item.account_id = account_id.clone();
                inner.items.entry(account_id.clone()).or_default().push(item);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn batch_exists(&self, urls: &[String], mode: FetchMode) -> Result<HashSet<String>> {
        let inner = self.inner.read().await;
        Ok(urls
            .iter()
            .filter(|url| inner.payloads.contains_key(&((*url).clone(), mode)))
            .cloned()
            .collect())
    }

    async fn store_payload(&self, payload: &Payload) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .payloads
            .insert((payload.url.clone(), payload.mode), payload.clone());
        Ok(())
    }

    async fn get_payloads(
        &self,
        urls: &[String],
        mode: FetchMode,
    ) -> Result<HashMap<String, Payload>> {
        let inner = self.inner.read().await;
        Ok(urls
            .iter()
            .filter_map(|url| {
                inner
                    .payloads
                    .get(&(url.clone(), mode))
                    .map(|p| (url.clone(), p.clone()))
            })
            .collect())
    }
}
