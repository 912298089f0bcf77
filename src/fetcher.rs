//! Remote fetch interfaces
//!
//! [`PageFetcher`] paginates an account's listing and [`PayloadFetcher`]
//! retrieves the body behind one item link. Both are consumed by the sync
//! engine and the downloader; the HTTP proxy that actually talks to the
//! platform lives outside this crate. [`HttpPayloadFetcher`] is a direct
//! implementation for plain content pages.

use crate::error::{Error, FetchError, Result};
use crate::types::{AccountId, FetchMode, FetchPath, Page, PayloadResponse};
use async_trait::async_trait;
use regex::Regex;
use reqwest::StatusCode;
use std::sync::LazyLock;
use std::time::Duration;
use url::Url;

/// Paginated listing of an account's items
///
/// Implementations map platform responses onto the crate's error taxonomy:
/// invalid credentials become [`Error::SessionExpired`] and a refused public
/// listing becomes [`Error::AccessRestricted`].
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch one page starting at `cursor`
    ///
    /// On [`FetchPath::Public`] the cursor counts messages; on
    /// [`FetchPath::Privileged`] it counts items.
    async fn fetch_page(
        &self,
        account_id: &AccountId,
        cursor: u64,
        path: FetchPath,
        keyword: Option<&str>,
    ) -> Result<Page>;
}

/// Retrieval of the payload behind one item link
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    /// Fetch and classify the payload for `url`
    ///
    /// Returns [`PayloadResponse::Deleted`] when the remote reports the item
    /// gone. Every other failure is an `Err`.
    async fn fetch_payload(&self, url: &str, mode: FetchMode) -> Result<PayloadResponse>;
}

/// Phrases the platform renders in place of removed content
const DELETION_MARKERS: &[&str] = &[
    "该内容已被发布者删除",
    "此内容因违规无法查看",
    "此内容被多人投诉",
    "The content has been deleted by the author",
];

static BIZ_VAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"var\s+biz\s*=\s*"([^"]+)""#).ok());

static BIZ_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"__biz=([A-Za-z0-9+/=%_-]+)"#).ok());

/// [`PayloadFetcher`] that GETs content pages over HTTP
#[derive(Clone, Debug)]
pub struct HttpPayloadFetcher {
    client: reqwest::Client,
}

impl HttpPayloadFetcher {
    /// Create a fetcher whose requests time out after `timeout`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pubsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl PayloadFetcher for HttpPayloadFetcher {
    async fn fetch_payload(&self, url: &str, mode: FetchMode) -> Result<PayloadResponse> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                tracing::debug!(url, "payload fetch timed out");
            }
            Error::Network(e)
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(PayloadResponse::Deleted);
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.text().await?;
        if is_deleted_page(&body) {
            return Ok(PayloadResponse::Deleted);
        }

        let corrected_account_id = match mode {
            FetchMode::IdentityFix => Some(extract_account_id(&body, url).ok_or_else(|| {
                FetchError::Parse(format!("no account id found in page for {url}"))
            })?),
            _ => None,
        };

        Ok(PayloadResponse::Success {
            body,
            corrected_account_id,
        })
    }
}

/// Whether a content page is a placeholder for removed content
pub fn is_deleted_page(body: &str) -> bool {
    DELETION_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Find the owning account id in a content page
///
/// Looks for the `var biz = "..."` script assignment first, then a
/// `__biz=` parameter in the page, then in the request URL itself.
pub fn extract_account_id(body: &str, url: &str) -> Option<AccountId> {
    let from_var = BIZ_VAR
        .as_ref()
        .and_then(|re| re.captures(body))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|biz| !biz.is_empty());

    let from_param = || {
        BIZ_PARAM
            .as_ref()
            .and_then(|re| re.captures(body))
            .and_then(|caps| caps.get(1))
            .map(|m| decode_component(m.as_str()))
    };

    let from_url = || {
        Url::parse(url).ok().and_then(|u| {
            u.query_pairs()
                .find(|(key, _)| key == "__biz")
                .map(|(_, value)| value.into_owned())
        })
    };

    from_var
        .or_else(from_param)
        .or_else(from_url)
        .filter(|biz| !biz.is_empty())
        .map(AccountId::from)
}

fn decode_component(raw: &str) -> String {
    url::form_urlencoded::parse(format!("v={raw}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| raw.to_string())
}
