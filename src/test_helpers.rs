//! Scripted collaborators shared by the unit tests.

use crate::error::{Error, Result};
use crate::fetcher::{PageFetcher, PayloadFetcher};
use crate::types::{AccountId, FetchMode, FetchPath, Page, PayloadResponse, RawItem};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// A raw item with a link derived from its identity
pub(crate) fn raw(message_id: &str, seq: u32, create_time: i64) -> RawItem {
    RawItem {
        message_id: message_id.to_string(),
        sequence_index: seq,
        title: format!("Post {message_id}-{seq}"),
        link: format!("https://example.com/s/{message_id}/{seq}?utm_source=feed"),
        create_time,
    }
}

/// A page of items
pub(crate) fn page(items: Vec<RawItem>, exhausted: bool, total_count: u64) -> Page {
    Page {
        items,
        exhausted,
        total_count,
        next_offset: None,
    }
}

/// One recorded `fetch_page` call
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PageCall {
    pub account_id: AccountId,
    pub cursor: u64,
    pub path: FetchPath,
}

/// [`PageFetcher`] that replays per-account scripts
///
/// Accounts without a remaining script get an empty, exhausted page.
#[derive(Default)]
pub(crate) struct ScriptedPageFetcher {
    scripts: Mutex<HashMap<AccountId, VecDeque<Result<Page>>>>,
    calls: Mutex<Vec<PageCall>>,
}

impl ScriptedPageFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, account: &str, response: Result<Page>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(AccountId::from(account))
            .or_default()
            .push_back(response);
    }

    pub(crate) fn calls(&self) -> Vec<PageCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_for(&self, account: &str) -> Vec<PageCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.account_id.as_str() == account)
            .collect()
    }
}

#[async_trait]
impl PageFetcher for ScriptedPageFetcher {
    async fn fetch_page(
        &self,
        account_id: &AccountId,
        cursor: u64,
        path: FetchPath,
        _keyword: Option<&str>,
    ) -> Result<Page> {
        self.calls.lock().unwrap().push(PageCall {
            account_id: account_id.clone(),
            cursor,
            path,
        });

        self.scripts
            .lock()
            .unwrap()
            .get_mut(account_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(page(Vec::new(), true, 0)))
    }
}

/// [`PayloadFetcher`] that replays per-url scripts
///
/// Urls without a remaining script succeed with a body naming the url.
#[derive(Default)]
pub(crate) struct ScriptedPayloadFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<PayloadResponse>>>>,
    calls: Mutex<Vec<(String, FetchMode)>>,
    delay: Option<Duration>,
}

impl ScriptedPayloadFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub(crate) fn push(&self, url: &str, response: Result<PayloadResponse>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(response);
    }

    pub(crate) fn calls_for(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PayloadFetcher for ScriptedPayloadFetcher {
    async fn fetch_payload(&self, url: &str, mode: FetchMode) -> Result<PayloadResponse> {
        self.calls.lock().unwrap().push((url.to_string(), mode));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);

        scripted.unwrap_or_else(|| {
            Ok(PayloadResponse::Success {
                body: format!("<div id=\"js_content\">{url}</div>"),
                corrected_account_id: None,
            })
        })
    }
}

/// A transient fetch failure
pub(crate) fn transient() -> Error {
    Error::Fetch(crate::error::FetchError::Http { status: 503 })
}
