//! One worker of the download pool: fetch, classify and record a single URL.

use crate::cache::ItemCache;
use crate::config::RetryConfig;
use crate::error::{Error, Result};
use crate::fetcher::PayloadFetcher;
use crate::retry::{IsRetryable, backoff_delay};
use crate::types::{DownloadSummary, Event, FetchMode, Payload, PayloadResponse};
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Terminal classification of one URL
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Outcome {
    Completed,
    Deleted,
    Failed,
}

/// State shared by every worker of one batch
pub(super) struct WorkerContext {
    pub(super) fetcher: Arc<dyn PayloadFetcher>,
    pub(super) cache: Arc<dyn ItemCache>,
    pub(super) mode: FetchMode,
    pub(super) fetch_timeout: Duration,
    pub(super) retry: RetryConfig,
    pub(super) queue: Mutex<VecDeque<String>>,
    pub(super) summary: Mutex<DownloadSummary>,
    pub(super) events: mpsc::UnboundedSender<Event>,
    pub(super) token: CancellationToken,
}

impl WorkerContext {
    fn next_url(&self) -> Option<String> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub(super) fn summary(&self) -> DownloadSummary {
        *self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, outcome: Outcome) -> DownloadSummary {
        let mut summary = self.summary.lock().unwrap_or_else(PoisonError::into_inner);
        summary.pending = summary.pending.saturating_sub(1);
        match outcome {
            Outcome::Completed => summary.completed += 1,
            Outcome::Deleted => summary.deleted += 1,
            Outcome::Failed => summary.failed += 1,
        }
        *summary
    }

    fn emit(&self, event: Event) {
        // The receiver may be gone if the caller stopped listening
        let _ = self.events.send(event);
    }
}

/// Pull URLs off the shared queue until it is empty or the batch is stopped
pub(super) async fn run_worker(ctx: Arc<WorkerContext>, worker: usize) {
    loop {
        if ctx.token.is_cancelled() {
            tracing::debug!(worker, "worker observed stop");
            return;
        }

        let Some(url) = ctx.next_url() else {
            return;
        };

        let Some(outcome) = process_url(&ctx, &url).await else {
            // Stopped while waiting to retry; the url stays pending
            return;
        };

        let summary = ctx.record(outcome);
        ctx.emit(Event::DownloadProgress {
            url,
            success: outcome == Outcome::Completed,
            summary,
        });
    }
}

/// Fetch `url` until it reaches a terminal state
///
/// Returns `None` if the batch was stopped during a retry backoff.
async fn process_url(ctx: &WorkerContext, url: &str) -> Option<Outcome> {
    // First try plus the configured retries
    let max_attempts = ctx.retry.max_attempts.saturating_add(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match fetch_once(ctx, url).await {
            Ok(response) => match record_response(ctx, url, response).await {
                Ok(outcome) => return Some(outcome),
                Err(e) => e,
            },
            Err(e) => e,
        };

        ctx.emit(Event::DownloadException {
            url: url.to_string(),
            message: error.to_string(),
        });

        if !error.is_retryable() || attempt >= max_attempts {
            tracing::warn!(url = %url, attempt, error = %error, "download failed");
            return Some(Outcome::Failed);
        }

        let delay = backoff_delay(&ctx.retry, attempt - 1);
        tracing::debug!(
            url = %url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "retrying download"
        );

        tokio::select! {
            _ = ctx.token.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn fetch_once(ctx: &WorkerContext, url: &str) -> Result<PayloadResponse> {
    match tokio::time::timeout(ctx.fetch_timeout, ctx.fetcher.fetch_payload(url, ctx.mode)).await
    {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(ctx.fetch_timeout)),
    }
}

/// Apply a fetch result to the cache and emit its classification events
async fn record_response(
    ctx: &WorkerContext,
    url: &str,
    response: PayloadResponse,
) -> Result<Outcome> {
    match response {
        PayloadResponse::Deleted => {
            let marked = ctx.cache.mark_deleted(url).await?;
            tracing::info!(url = %url, marked, "item deleted upstream");
            ctx.emit(Event::DownloadDeleted {
                url: url.to_string(),
            });
            Ok(Outcome::Deleted)
        }
        PayloadResponse::Success {
            body,
            corrected_account_id,
        } => {
            ctx.cache
                .store_payload(&Payload {
                    url: url.to_string(),
                    mode: ctx.mode,
                    body,
                    corrected_account_id: corrected_account_id.clone(),
                    fetched_at: Utc::now(),
                })
                .await?;

            if ctx.mode == FetchMode::IdentityFix
                && let Some(account_id) = corrected_account_id
            {
                if ctx.cache.reassign_item(url, &account_id).await? {
                    tracing::info!(url = %url, account_id = %account_id, "item reassigned");
                }
                ctx.emit(Event::FixFakeid {
                    url: url.to_string(),
                    corrected_account_id: account_id,
                });
            }

            Ok(Outcome::Completed)
        }
    }
}
