//! Concurrent payload downloader
//!
//! [`ConcurrentDownloader::download`] spreads a batch of URLs over a fixed
//! pool of workers sharing one queue. Every URL ends in exactly one terminal
//! state (completed, deleted or failed) and produces exactly one
//! `download:progress` event; failed attempts before that emit
//! `download:exception` and are retried with exponential backoff.
//!
//! The downloader never consults the cache for existing payloads. Callers
//! filter the batch with [`ItemCache::batch_exists`] first.

use crate::cache::ItemCache;
use crate::config::{DownloadConfig, RetryConfig};
use crate::fetcher::PayloadFetcher;
use crate::types::{DownloadSummary, Event, FetchMode};
use futures::Stream;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

mod worker;

use worker::{WorkerContext, run_worker};

/// Worker pool fetching item payloads
pub struct ConcurrentDownloader {
    fetcher: Arc<dyn PayloadFetcher>,
    cache: Arc<dyn ItemCache>,
    concurrency: usize,
    fetch_timeout: Duration,
    retry: RetryConfig,
    /// Stop handle of the batch currently running
    active: Mutex<CancellationToken>,
}

impl ConcurrentDownloader {
    /// Create a downloader
    pub fn new(
        fetcher: Arc<dyn PayloadFetcher>,
        cache: Arc<dyn ItemCache>,
        config: &DownloadConfig,
        retry: RetryConfig,
    ) -> Self {
        Self {
            fetcher,
            cache,
            concurrency: config.concurrency.max(1),
            fetch_timeout: config.fetch_timeout,
            retry,
            active: Mutex::new(CancellationToken::new()),
        }
    }

    /// Worker pool width
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Download `urls` in `mode`, streaming events as they happen
    ///
    /// The stream starts with `download:begin` and ends with either
    /// `download:finish` or, after [`stop`](Self::stop), `download:stop`.
    /// Duplicate URLs in the batch are fetched once.
    pub fn download(&self, urls: Vec<String>, mode: FetchMode) -> impl Stream<Item = Event> + use<> {
        let token = CancellationToken::new();
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();

        let mut seen = std::collections::HashSet::new();
        let queue: VecDeque<String> = urls
            .into_iter()
            .filter(|url| seen.insert(url.clone()))
            .collect();
        let total = queue.len();
        let workers = self.concurrency.min(total).max(1);

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Event::DownloadBegin {
            concurrency: self.concurrency,
            total,
        });

        let ctx = Arc::new(WorkerContext {
            fetcher: Arc::clone(&self.fetcher),
            cache: Arc::clone(&self.cache),
            mode,
            fetch_timeout: self.fetch_timeout,
            retry: self.retry.clone(),
            queue: Mutex::new(queue),
            summary: Mutex::new(DownloadSummary {
                pending: total as u64,
                ..DownloadSummary::default()
            }),
            events: tx,
            token,
        });

        tracing::info!(total, workers, mode = mode.as_str(), "download batch started");

        tokio::spawn(async move {
            let started = Instant::now();
            let mut pool = JoinSet::new();
            for worker in 0..workers {
                pool.spawn(run_worker(Arc::clone(&ctx), worker));
            }
            while let Some(joined) = pool.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "download worker panicked");
                }
            }

            let summary = ctx.summary();
            let event = if ctx.token.is_cancelled() {
                tracing::info!(?summary, "download batch stopped");
                Event::DownloadStop { summary }
            } else {
                let elapsed_secs = started.elapsed().as_secs();
                tracing::info!(
                    elapsed = %crate::utils::format_elapsed(elapsed_secs),
                    completed = summary.completed,
                    failed = summary.failed,
                    deleted = summary.deleted,
                    "download batch finished"
                );
                Event::DownloadFinish {
                    elapsed_secs,
                    summary,
                }
            };
            let _ = ctx.events.send(event);
        });

        UnboundedReceiverStream::new(rx)
    }

    /// Stop the running batch
    ///
    /// In-flight fetches complete; no new URL is started. The batch's stream
    /// then ends with `download:stop`.
    pub fn stop(&self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }
}
