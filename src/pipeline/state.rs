//! Run-time state of the orchestrator and its checkpoint mapping.

use crate::checkpoint::Checkpoint;
use crate::sync::SyncCursor;
use crate::types::{AccountId, LogEntry, LogLevel, Phase, PhaseProgress};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Observable pipeline state
///
/// `current_phase` is [`Phase::Idle`] whenever `running` is false.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// A run has been started and not stopped
    pub running: bool,
    /// The run is frozen until resumed
    pub paused: bool,
    /// The run was restored from a checkpoint and waits for its destination
    pub needs_resume: bool,
    /// Phase being worked on
    pub current_phase: Phase,
    /// Account being worked on
    pub current_account_id: Option<AccountId>,
    /// Accounts visited in the current round
    pub sync_progress: PhaseProgress,
    /// Payloads of the current account
    pub download_progress: PhaseProgress,
    /// Documents of the current account
    pub export_progress: PhaseProgress,
    /// Accounts finished in the current round, in finishing order
    pub processed_account_ids: Vec<AccountId>,
    /// Round failures in a row
    pub consecutive_error_count: u32,
    /// Privileged-path cursors, one per account
    pub sync_cursors: HashMap<AccountId, SyncCursor>,
    /// Recent operator log, most recent first
    pub logs: VecDeque<LogEntry>,
}

impl PipelineState {
    /// Record an account as finished for this round
    ///
    /// Returns false if it already was.
    pub(crate) fn mark_processed(&mut self, id: &AccountId) -> bool {
        if self.processed_account_ids.contains(id) {
            return false;
        }
        self.processed_account_ids.push(id.clone());
        true
    }

    pub(crate) fn is_processed(&self, id: &AccountId) -> bool {
        self.processed_account_ids.contains(id)
    }

    pub(crate) fn push_log(&mut self, level: LogLevel, message: String, capacity: usize) {
        self.logs.push_front(LogEntry {
            time: Utc::now(),
            level,
            message,
        });
        self.logs.truncate(capacity.max(1));
    }

    /// Forget the run, keeping only the log
    pub(crate) fn reset(&mut self) {
        let logs = std::mem::take(&mut self.logs);
        *self = Self {
            logs,
            ..Self::default()
        };
    }

    pub(crate) fn to_checkpoint(&self, log_entries: usize) -> Checkpoint {
        Checkpoint {
            running: self.running,
            paused: self.paused,
            current_phase: self.current_phase,
            current_account_id: self.current_account_id.clone(),
            sync_progress: self.sync_progress.clone(),
            download_progress: self.download_progress.clone(),
            export_progress: self.export_progress.clone(),
            processed_account_ids: self.processed_account_ids.clone(),
            consecutive_error_count: self.consecutive_error_count,
            sync_cursors: self.sync_cursors.clone(),
            logs: self.logs.iter().take(log_entries).cloned().collect(),
            saved_at: Utc::now(),
        }
    }

    /// Rebuild state from a checkpoint
    ///
    /// A run that was still going comes back paused with `needs_resume` set:
    /// the export destination it held does not survive a restart.
    pub(crate) fn restore(checkpoint: Checkpoint) -> Self {
        let interrupted = checkpoint.running;
        Self {
            running: checkpoint.running,
            paused: checkpoint.paused || interrupted,
            needs_resume: interrupted,
            current_phase: if checkpoint.running {
                checkpoint.current_phase
            } else {
                Phase::Idle
            },
            current_account_id: checkpoint.current_account_id,
            sync_progress: checkpoint.sync_progress,
            download_progress: checkpoint.download_progress,
            export_progress: checkpoint.export_progress,
            processed_account_ids: checkpoint.processed_account_ids,
            consecutive_error_count: checkpoint.consecutive_error_count,
            sync_cursors: checkpoint.sync_cursors,
            logs: checkpoint.logs.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::tests::sample_checkpoint;

    #[test]
    fn running_checkpoint_restores_paused() {
        let state = PipelineState::restore(sample_checkpoint(Utc::now()));

        assert!(state.running);
        assert!(state.paused);
        assert!(state.needs_resume);
        assert_eq!(state.current_phase, Phase::Download);
        assert_eq!(state.processed_account_ids.len(), 2);
        assert_eq!(state.sync_progress.current, 2);
    }

    #[test]
    fn idle_checkpoint_restores_idle() {
        let mut checkpoint = sample_checkpoint(Utc::now());
        checkpoint.running = false;
        let state = PipelineState::restore(checkpoint);

        assert!(!state.paused);
        assert!(!state.needs_resume);
        assert_eq!(state.current_phase, Phase::Idle);
    }

    #[test]
    fn log_tail_is_bounded_and_newest_first() {
        let mut state = PipelineState::default();
        for i in 0..5 {
            state.push_log(LogLevel::Info, format!("entry {i}"), 3);
        }

        let messages: Vec<&str> = state.logs.iter().map(|l| l.message.as_str()).collect();
        assert_eq!(messages, vec!["entry 4", "entry 3", "entry 2"]);

        let checkpoint = state.to_checkpoint(2);
        assert_eq!(checkpoint.logs.len(), 2);
        assert_eq!(checkpoint.logs[0].message, "entry 4");
    }

    #[test]
    fn processed_ids_are_unique() {
        let mut state = PipelineState::default();
        let id = AccountId::from("a");

        assert!(state.mark_processed(&id));
        assert!(!state.mark_processed(&id));
        assert_eq!(state.processed_account_ids.len(), 1);
    }

    #[test]
    fn reset_keeps_logs_only() {
        let mut state = PipelineState::restore(sample_checkpoint(Utc::now()));
        state.push_log(LogLevel::Info, "kept".to_string(), 10);
        state.reset();

        assert!(!state.running);
        assert_eq!(state.current_phase, Phase::Idle);
        assert!(state.processed_account_ids.is_empty());
        assert_eq!(state.logs.len(), 1);
    }
}
