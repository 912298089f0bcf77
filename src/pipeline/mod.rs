//! Pipeline orchestrator split into focused submodules.
//!
//! The [`Pipeline`] drives rounds of sync → download → export over every
//! tracked account:
//! - [`control`] - start/stop/pause/resume, destination handling, shutdown
//! - [`round`] - the round loop and the per-account phases
//! - [`state`] - observable state and its checkpoint mapping

mod control;
mod round;
mod state;


pub use state::PipelineState;

use crate::cache::ItemCache;
use crate::checkpoint::{CheckpointStore, load_fresh};
use crate::config::Config;
use crate::db::Database;
use crate::downloader::ConcurrentDownloader;
use crate::error::Result;
use crate::export::{ExportDestination, Exporter, FrontMatterRenderer};
use crate::fetcher::{HttpPayloadFetcher, PageFetcher, PayloadFetcher};
use crate::sync::IncrementalSyncEngine;
use crate::types::{Event, LogEntry, LogLevel};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

/// Events buffered per subscriber before the oldest are dropped
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// The sync → download → export orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Pipeline {
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Accounts, items and payloads
    pub(crate) cache: Arc<dyn ItemCache>,
    /// Where run state is snapshotted
    pub(crate) checkpoints: Arc<dyn CheckpointStore>,
    /// Per-account pagination
    pub(crate) sync_engine: Arc<IncrementalSyncEngine>,
    /// Payload worker pool
    pub(crate) downloader: Arc<ConcurrentDownloader>,
    /// Document writer
    pub(crate) exporter: Arc<Exporter>,
    /// Export destination, attached by the operator
    pub(crate) destination: Arc<RwLock<Option<Arc<dyn ExportDestination>>>>,
    /// Observable state, mutated only by the control surface and the round loop
    pub(crate) state: Arc<Mutex<PipelineState>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Handle of the running round loop
    pub(crate) control: Arc<tokio::sync::Mutex<control::RunControl>>,
}

impl Pipeline {
    /// Create a pipeline from its collaborators
    ///
    /// A checkpoint left by an interrupted run is restored paused; it needs
    /// [`attach_destination`](Self::attach_destination) and
    /// [`resume`](Self::resume) to continue. A stale checkpoint is discarded.
    pub async fn new(
        config: Config,
        cache: Arc<dyn ItemCache>,
        checkpoints: Arc<dyn CheckpointStore>,
        pages: Arc<dyn PageFetcher>,
        payloads: Arc<dyn PayloadFetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let mut sync_engine = IncrementalSyncEngine::new(
            pages,
            Arc::clone(&cache),
            config.sync.page_delay,
            config.download.fetch_timeout,
        );
        if let Some(keyword) = &config.sync.keyword {
            sync_engine = sync_engine.with_keyword(keyword.clone());
        }

        let downloader = ConcurrentDownloader::new(
            payloads,
            Arc::clone(&cache),
            &config.download,
            config.retry.clone(),
        );
        let exporter = Exporter::new(
            Arc::clone(&cache),
            Arc::new(FrontMatterRenderer::new(config.export.utc_offset_minutes)),
            config.export.clone(),
        );

        let restored = load_fresh(checkpoints.as_ref(), config.persistence.checkpoint_max_age).await?;
        let state = restored.map(PipelineState::restore).unwrap_or_default();
        let needs_resume = state.needs_resume;

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let pipeline = Self {
            config: Arc::new(config),
            cache,
            checkpoints,
            sync_engine: Arc::new(sync_engine),
            downloader: Arc::new(downloader),
            exporter: Arc::new(exporter),
            destination: Arc::new(RwLock::new(None)),
            state: Arc::new(Mutex::new(state)),
            event_tx,
            control: Arc::new(tokio::sync::Mutex::new(control::RunControl::default())),
        };

        if needs_resume {
            pipeline.log(
                LogLevel::Warn,
                "unfinished run restored: attach an export destination, then resume",
            );
        }

        Ok(pipeline)
    }

    /// Create a pipeline backed by the SQLite database at
    /// `config.persistence.database_path` and the HTTP payload fetcher
    pub async fn open(config: Config, pages: Arc<dyn PageFetcher>) -> Result<Self> {
        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let payloads = Arc::new(HttpPayloadFetcher::new(config.download.fetch_timeout)?);
        Self::new(config, db.clone(), db, pages, payloads).await
    }

    /// Subscribe to pipeline and downloader events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> PipelineState {
        self.with_state(|s| s.clone())
    }

    /// Operator log, most recent first
    pub fn logs(&self) -> Vec<LogEntry> {
        self.with_state(|s| s.logs.iter().cloned().collect())
    }

    /// Empty the operator log
    pub fn clear_logs(&self) {
        self.with_state(|s| s.logs.clear());
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut PipelineState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub(crate) fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Append to the operator log and the structured log
    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => tracing::info!(?level, "{message}"),
            LogLevel::Warn => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        let capacity = self.config.persistence.log_tail_capacity;
        self.with_state(|s| s.push_log(level, message, capacity));
    }

    /// Snapshot the state to the checkpoint store
    pub(crate) async fn persist(&self) -> Result<()> {
        let entries = self.config.persistence.persisted_log_entries;
        let checkpoint = self.with_state(|s| s.to_checkpoint(entries));
        self.checkpoints.persist(&checkpoint).await
    }

    pub(crate) fn current_destination(&self) -> Option<Arc<dyn ExportDestination>> {
        self.destination
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
