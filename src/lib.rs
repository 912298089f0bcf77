//! # pubsync
//!
//! Resumable sync, download and export pipeline for paginated publishing feeds.
//!
//! ## Design Philosophy
//!
//! pubsync is designed to be:
//! - **Resumable** - Every step is checkpointed; a restart continues where the last run stopped
//! - **Idempotent** - Re-running a round re-fetches nothing that is already cached or exported
//! - **Library-first** - No CLI or UI; the embedding application supplies the page fetcher
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use pubsync::{Config, DirectoryDestination, PageFetcher, Pipeline};
//! use std::sync::Arc;
//!
//! async fn run(pages: Arc<dyn PageFetcher>) -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pipeline = Pipeline::open(config, pages).await?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     pipeline.attach_destination(Arc::new(DirectoryDestination::new("export")));
//!     if pipeline.state().needs_resume {
//!         pipeline.resume().await?;
//!     } else {
//!         pipeline.start().await?;
//!     }
//!
//!     pubsync::run_with_shutdown(pipeline).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Item cache interface and in-memory backend
pub mod cache;
/// Run-state checkpoints
pub mod checkpoint;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Concurrent payload downloader
pub mod downloader;
/// Error types
pub mod error;
/// Markdown export
pub mod export;
/// Remote fetcher interfaces
pub mod fetcher;
/// Pipeline orchestrator (decomposed into focused submodules)
pub mod pipeline;
/// Retry logic with exponential backoff
pub mod retry;
/// Incremental account synchronization
pub mod sync;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use cache::{ItemCache, MemoryCache};
pub use checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
pub use config::Config;
pub use db::Database;
pub use downloader::ConcurrentDownloader;
pub use error::{DatabaseError, Error, FetchError, Result, Severity};
pub use export::{
    DirectoryDestination, ExportDestination, ExportReport, Exporter, FrontMatterRenderer,
    Renderer,
};
pub use fetcher::{HttpPayloadFetcher, PageFetcher, PayloadFetcher};
pub use pipeline::{Pipeline, PipelineState};
pub use sync::{IncrementalSyncEngine, SyncCursor, SyncOutcome};
pub use types::{
    Account, AccountId, DownloadSummary, Event, FetchMode, FetchPath, Item, LogEntry, LogLevel,
    Page, Payload, PayloadResponse, Phase, PhaseProgress, RawItem,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's
/// [`suspend`](Pipeline::suspend) method, which checkpoints the run as paused
/// so the next process can resume it.
///
/// - **Unix:** listens for SIGTERM and SIGINT, falling back to whichever could be
///   registered, or to `ctrl_c` if neither could.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.suspend().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut term), Ok(mut int)) => {
            let name = tokio::select! {
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "shutdown signal received");
        }
        (Err(e), Ok(int)) => {
            tracing::warn!(error = %e, "no SIGTERM handler, waiting for SIGINT only");
            wait_for_one(int, "SIGINT").await;
        }
        (Ok(term), Err(e)) => {
            tracing::warn!(error = %e, "no SIGINT handler, waiting for SIGTERM only");
            wait_for_one(term, "SIGTERM").await;
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "no signal handlers, falling back to ctrl_c");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_one(mut stream: tokio::signal::unix::Signal, name: &'static str) {
    stream.recv().await;
    tracing::info!(signal = name, "shutdown signal received");
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for ctrl_c"),
    }
}
