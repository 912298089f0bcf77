//! Control surface: start, stop, pause, resume and shutdown.

use super::Pipeline;
use crate::checkpoint::load_fresh;
use crate::error::{Error, Result};
use crate::export::ExportDestination;
use crate::types::{Event, LogLevel};
use std::sync::{Arc, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The round loop currently spawned, if any
#[derive(Default)]
pub(crate) struct RunControl {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RunControl {
    /// Cancel the loop and wait for it to reach a yield point
    async fn halt(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::error!(error = %e, "round loop task failed");
        }
    }
}

impl Pipeline {
    /// Attach the export destination
    ///
    /// Required before [`start`](Self::start), and again before
    /// [`resume`](Self::resume) after a restart.
    pub fn attach_destination(&self, destination: Arc<dyn ExportDestination>) {
        let description = destination.describe();
        *self
            .destination
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(destination);
        self.log(LogLevel::Success, format!("export destination: {description}"));
    }

    /// Start a new run
    ///
    /// Does nothing if a run is already going.
    ///
    /// # Errors
    ///
    /// [`Error::NoDestination`] if no export destination is attached.
    pub async fn start(&self) -> Result<()> {
        let mut control = self.control.lock().await;

        if self.with_state(|s| s.running) {
            self.log(LogLevel::Warn, "pipeline is already running");
            return Ok(());
        }
        if self.current_destination().is_none() {
            return Err(Error::NoDestination);
        }

        self.with_state(|s| {
            let cursors = std::mem::take(&mut s.sync_cursors);
            s.reset();
            s.sync_cursors = cursors;
            s.running = true;
        });
        self.log(LogLevel::Info, "pipeline started");
        self.persist().await?;

        self.spawn_loop(&mut control);
        Ok(())
    }

    /// Stop the run and clear its state and checkpoint
    ///
    /// In-flight fetches finish; nothing new is scheduled.
    pub async fn stop(&self) -> Result<()> {
        let mut control = self.control.lock().await;

        if !self.with_state(|s| s.running) {
            return Ok(());
        }

        control.halt().await;
        self.with_state(|s| s.reset());
        self.checkpoints.clear().await?;

        self.log(LogLevel::Info, "pipeline stopped");
        self.emit(Event::Stopped);
        Ok(())
    }

    /// Freeze the run at the next yield point
    ///
    /// Progress and the accounts processed this round are kept.
    pub async fn pause(&self) -> Result<()> {
        let mut control = self.control.lock().await;

        let active = self.with_state(|s| {
            let active = s.running && !s.paused;
            if active {
                s.paused = true;
            }
            active
        });
        if !active {
            return Ok(());
        }

        control.halt().await;

        self.log(LogLevel::Info, "pipeline paused");
        self.emit(Event::Paused {
            reason: "requested".to_string(),
        });
        self.persist().await
    }

    /// Continue a paused run where it stopped
    ///
    /// # Errors
    ///
    /// [`Error::NoDestination`] if no export destination is attached, which
    /// is always the case right after restoring an interrupted run.
    pub async fn resume(&self) -> Result<()> {
        let mut control = self.control.lock().await;

        let (running, paused) = self.with_state(|s| (s.running, s.paused));
        if !running || !paused {
            return Ok(());
        }
        if self.current_destination().is_none() {
            self.log(LogLevel::Warn, "attach an export destination before resuming");
            return Err(Error::NoDestination);
        }

        self.with_state(|s| {
            s.paused = false;
            s.needs_resume = false;
        });
        self.log(LogLevel::Info, "pipeline resumed");
        self.emit(Event::Resumed);
        self.persist().await?;

        self.spawn_loop(&mut control);
        Ok(())
    }

    /// Halt the run for process shutdown, checkpointing it as paused
    pub async fn suspend(&self) -> Result<()> {
        let mut control = self.control.lock().await;

        if !self.with_state(|s| s.running) {
            return Ok(());
        }

        control.halt().await;
        self.with_state(|s| s.paused = true);
        self.log(LogLevel::Info, "pipeline suspended for shutdown");
        self.persist().await
    }

    /// Whether the stored checkpoint describes a run that is still going
    pub async fn has_resumable_task(&self) -> Result<bool> {
        let checkpoint = load_fresh(
            self.checkpoints.as_ref(),
            self.config.persistence.checkpoint_max_age,
        )
        .await?;
        Ok(checkpoint.is_some_and(|c| c.is_resumable()))
    }

    /// Pause from inside the round loop
    pub(super) async fn pause_from_loop(&self, reason: &str) {
        self.with_state(|s| s.paused = true);
        self.emit(Event::Paused {
            reason: reason.to_string(),
        });
        if let Err(e) = self.persist().await {
            tracing::error!(error = %e, "failed to persist checkpoint after pause");
        }
    }

    fn spawn_loop(&self, control: &mut RunControl) {
        let token = CancellationToken::new();
        control.token = token.clone();
        control.handle = Some(tokio::spawn(self.clone().run_loop(token)));
    }
}
