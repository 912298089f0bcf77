//! Incremental account synchronization
//!
//! [`IncrementalSyncEngine`] walks an account's paginated listing from its
//! resume point and merges every item into the cache with insert-if-absent
//! semantics. It stops when:
//! - the remote reports the listing exhausted (the account becomes `completed`)
//! - a page of a completed account reaches items the cache already covers
//!   (cache boundary)
//! - a completed account's newest page is already cached (newest-page check)
//! - the caller cancels between pages
//!
//! Pages of one account are fetched strictly in cursor order with a fixed
//! delay between them.

use crate::cache::ItemCache;
use crate::error::{Error, Result};
use crate::fetcher::PageFetcher;
use crate::types::{Account, FetchPath, Item, Page};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod cursor;

pub use cursor::SyncCursor;

/// Result of one account sync
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Items inserted into the cache by this sync
    pub new_items: Vec<Item>,
    /// The remote reported no further pages
    pub exhausted: bool,
    /// Total reported by the remote on the last page
    pub total_count: u64,
    /// Pages requested from the remote
    pub pages_fetched: u32,
    /// Stopped because the newest page was already cached
    pub caught_up: bool,
    /// Stopped at the cache boundary
    pub boundary_hit: bool,
    /// Stopped because the caller cancelled
    pub interrupted: bool,
}

/// Per-account pagination driver
pub struct IncrementalSyncEngine {
    fetcher: Arc<dyn PageFetcher>,
    cache: Arc<dyn ItemCache>,
    page_delay: Duration,
    fetch_timeout: Duration,
    keyword: Option<String>,
}

impl IncrementalSyncEngine {
    /// Create an engine
    ///
    /// `page_delay` is slept between successive page fetches of one account;
    /// every fetch is abandoned after `fetch_timeout`.
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        cache: Arc<dyn ItemCache>,
        page_delay: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            cache,
            page_delay,
            fetch_timeout,
            keyword: None,
        }
    }

    /// Restrict public listings to items matching `keyword`
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Synchronize one account into the cache
    ///
    /// `account` is updated in place and saved to the cache after every page.
    /// `cursor` carries the privileged-path position between calls.
    ///
    /// # Errors
    ///
    /// - [`Error::SessionExpired`] when the remote rejects the credentials
    /// - [`Error::AccessRestricted`] when public pagination is refused; the
    ///   account is saved with `searchable = false` first, so the next attempt
    ///   uses the privileged path
    /// - any fetch or cache error, after saving progress made so far
    pub async fn sync(
        &self,
        account: &mut Account,
        cursor: &mut SyncCursor,
        token: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let path = if account.searchable {
            FetchPath::Public
        } else {
            FetchPath::Privileged
        };

        let mut offset = match (account.completed, path) {
            (true, _) => 0,
            (false, FetchPath::Public) => account.message_count,
            (false, FetchPath::Privileged) => cursor.next_offset,
        };
        if offset == 0 && path == FetchPath::Privileged {
            cursor.reset();
        }

        tracing::debug!(
            account_id = %account.id,
            ?path,
            offset,
            completed = account.completed,
            "starting account sync"
        );

        let mut outcome = SyncOutcome::default();
        let mut pending = None;

        if account.completed {
            if token.is_cancelled() {
                outcome.interrupted = true;
                return Ok(outcome);
            }

            let head = self.fetch(account, 0, path).await?;
            outcome.pages_fetched += 1;

            if self.is_caught_up(account, &head).await? {
                tracing::debug!(account_id = %account.id, "newest page already cached");
                self.ingest(account, cursor, 0, path, &head, &mut outcome)
                    .await?;
                outcome.caught_up = true;
                return Ok(outcome);
            }

            pending = Some(head);
        }

        loop {
            let page = match pending.take() {
                Some(page) => page,
                None => {
                    if outcome.pages_fetched > 0 && !self.pause_between_pages(token).await {
                        outcome.interrupted = true;
                        break;
                    }
                    if token.is_cancelled() {
                        outcome.interrupted = true;
                        break;
                    }
                    let page = self.fetch(account, offset, path).await?;
                    outcome.pages_fetched += 1;
                    page
                }
            };

            if page.exhausted || page.items.is_empty() {
                self.ingest(account, cursor, offset, path, &page, &mut outcome)
                    .await?;
                outcome.exhausted = true;
                break;
            }

            let boundary = match page.items.last() {
                Some(last) => {
                    self.cache
                        .has_item_older_than(&account.id, last.create_time.saturating_add(1))
                        .await?
                }
                _ => false,
            };

            offset = self
                .ingest(account, cursor, offset, path, &page, &mut outcome)
                .await?;

            if boundary {
                tracing::debug!(account_id = %account.id, offset, "reached cache boundary");
                outcome.boundary_hit = true;
                break;
            }
        }

        Ok(outcome)
    }

    /// Fetch one page, flagging the account when public access is refused
    async fn fetch(&self, account: &mut Account, offset: u64, path: FetchPath) -> Result<Page> {
        let request = self
            .fetcher
            .fetch_page(&account.id, offset, path, self.keyword.as_deref());

        let result = match tokio::time::timeout(self.fetch_timeout, request).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.fetch_timeout)),
        };

        match result {
            Err(Error::AccessRestricted { account_id }) if path == FetchPath::Public => {
                tracing::warn!(
                    account_id = %account_id,
                    "public listing refused, switching account to privileged path"
                );
                account.searchable = false;
                self.cache.save_account(account).await?;
                Err(Error::AccessRestricted { account_id })
            }
            other => other,
        }
    }

    /// Whether the cache already holds the newest item of `head`
    async fn is_caught_up(&self, account: &Account, head: &Page) -> Result<bool> {
        let Some(first) = head.items.first() else {
            return Ok(true);
        };
        let newest = self.cache.latest_create_time(&account.id).await?;
        Ok(newest.is_some_and(|newest| newest >= first.create_time))
    }

    /// Merge a page into the cache and account counters
    ///
    /// Returns the offset of the next page.
    async fn ingest(
        &self,
        account: &mut Account,
        cursor: &mut SyncCursor,
        offset: u64,
        path: FetchPath,
        page: &Page,
        outcome: &mut SyncOutcome,
    ) -> Result<u64> {
        let mut new_messages = HashSet::new();
        let mut new_items = 0u64;

        for raw in &page.items {
            let item = Item::from_raw(&account.id, raw);
            if self.cache.insert_if_absent(&item).await? {
                new_messages.insert(raw.message_id.as_str());
                new_items += 1;
                outcome.new_items.push(item);
            }
        }

        let update = Account {
            completed: page.exhausted || page.items.is_empty(),
            message_count: new_messages.len() as u64,
            item_count: new_items,
            total_count: page.total_count,
            last_sync_time: (offset == 0).then(|| chrono::Utc::now().timestamp()),
            ..Account::new(account.id.clone(), account.display_name.clone())
        };
        account.merge_counters(&update);
        outcome.total_count = page.total_count;

        let next = match path {
            FetchPath::Public => {
                offset + page.items.iter().filter(|i| i.starts_message()).count() as u64
            }
            FetchPath::Privileged => {
                cursor.advance(offset, page.items.len(), page.next_offset);
                cursor.next_offset
            }
        };

        self.cache.save_account(account).await?;

        tracing::info!(
            account_id = %account.id,
            offset = next,
            new_items,
            new_messages = new_messages.len(),
            "page synced"
        );

        Ok(next)
    }

    /// Sleep the inter-page delay; false if cancelled meanwhile
    async fn pause_between_pages(&self, token: &CancellationToken) -> bool {
        tokio::select! {
            _ = token.cancelled() => false,
            _ = tokio::time::sleep(self.page_delay) => true,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
