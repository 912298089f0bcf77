//! The round loop: every account through sync, download and export.

use super::Pipeline;
use crate::error::{Error, Result, Severity};
use crate::types::{Account, AccountId, Event, FetchMode, LogLevel, Phase, PhaseProgress};
use crate::utils::format_elapsed;
use futures::StreamExt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How a round ended without error
#[derive(Debug, PartialEq, Eq)]
pub(super) enum RoundEnd {
    /// Every account was visited
    Completed { accounts: usize },
    /// Paused or stopped part-way
    Interrupted,
}

/// How one account ended without error
#[derive(Debug, PartialEq, Eq)]
enum AccountEnd {
    Finished {
        new_items: u64,
        exported: u64,
        network: bool,
    },
    Interrupted,
}

impl Pipeline {
    /// Run rounds until paused, stopped or cancelled
    pub(super) async fn run_loop(self, token: CancellationToken) {
        tracing::info!("round loop started");

        while !token.is_cancelled() {
            match self.run_round(&token).await {
                Ok(RoundEnd::Completed { accounts }) => {
                    self.with_state(|s| {
                        s.processed_account_ids.clear();
                        s.consecutive_error_count = 0;
                        s.current_account_id = None;
                    });
                    let interval = self.config.sync.round_interval;
                    self.log(
                        LogLevel::Info,
                        format!(
                            "round finished over {accounts} accounts, next round in {}s",
                            interval.as_secs()
                        ),
                    );
                    self.emit(Event::RoundCompleted { accounts });
                    if let Err(e) = self.persist().await {
                        tracing::error!(error = %e, "failed to persist checkpoint");
                    }
                    if !sleep(interval, &token).await {
                        break;
                    }
                }
                Ok(RoundEnd::Interrupted) => break,
                Err(e) if e.severity() == Severity::Session => {
                    self.log(LogLevel::Error, "session expired: log in again, then resume");
                    self.pause_from_loop("session expired").await;
                    break;
                }
                Err(e) => {
                    let count = self.with_state(|s| {
                        s.consecutive_error_count += 1;
                        s.consecutive_error_count
                    });
                    self.log(LogLevel::Error, format!("round failed: {e}"));

                    let max = self.config.sync.max_consecutive_errors;
                    if count >= max {
                        self.log(
                            LogLevel::Error,
                            format!("{count} consecutive round failures, pausing"),
                        );
                        self.pause_from_loop("too many consecutive errors").await;
                        break;
                    }

                    let interval = self.config.sync.retry_interval;
                    self.log(
                        LogLevel::Warn,
                        format!("retrying in {}s", interval.as_secs()),
                    );
                    if let Err(e) = self.persist().await {
                        tracing::error!(error = %e, "failed to persist checkpoint");
                    }
                    if !sleep(interval, &token).await {
                        break;
                    }
                }
            }
        }

        self.with_state(|s| s.current_phase = Phase::Idle);
        tracing::info!("round loop exited");
    }

    /// One pass over every account
    ///
    /// Accounts already processed this round come first and are skipped,
    /// then incomplete accounts, then the rest. A round re-entered after a
    /// pause keeps its order and progress.
    pub(super) async fn run_round(&self, token: &CancellationToken) -> Result<RoundEnd> {
        let mut accounts = self.cache.list_accounts().await?;
        let processed = self.with_state(|s| s.processed_account_ids.clone());
        accounts.sort_by_key(|a| (!processed.contains(&a.id), a.completed));

        let total = accounts.len();
        let resumed = !processed.is_empty();
        self.with_state(|s| {
            if resumed {
                s.sync_progress.total = total as u64;
            } else {
                s.sync_progress = PhaseProgress::begin(total as u64);
            }
        });
        tracing::info!(accounts = total, resumed, "round started");

        for (position, mut account) in accounts.into_iter().enumerate() {
            if token.is_cancelled() {
                return Ok(RoundEnd::Interrupted);
            }

            let name = account_name(&account).to_string();
            let skip = self.with_state(|s| {
                s.sync_progress.current = position as u64 + 1;
                s.sync_progress.detail = name.clone();
                s.is_processed(&account.id)
            });
            if skip {
                self.log(
                    LogLevel::Info,
                    format!("skipping {name}: already processed this round"),
                );
                continue;
            }

            self.log(LogLevel::Info, format!("processing {name}"));

            match self.process_account(&mut account, token).await {
                Ok(AccountEnd::Finished {
                    new_items,
                    exported,
                    network,
                }) => {
                    self.with_state(|s| {
                        s.mark_processed(&account.id);
                        s.consecutive_error_count = 0;
                    });
                    self.log(LogLevel::Success, format!("{name} done"));
                    self.emit(Event::AccountCompleted {
                        account_id: account.id.clone(),
                        new_items,
                        exported,
                    });
                    self.persist().await?;

                    if network && !sleep(self.config.sync.account_interval, token).await {
                        return Ok(RoundEnd::Interrupted);
                    }
                }
                Ok(AccountEnd::Interrupted) => return Ok(RoundEnd::Interrupted),
                Err(e) => match e.severity() {
                    Severity::Session | Severity::Round => return Err(e),
                    Severity::Account | Severity::Transient => {
                        if let Error::AccessRestricted { .. } = e {
                            self.log(
                                LogLevel::Warn,
                                format!("{name}: public listing restricted, using the privileged path next round"),
                            );
                        } else {
                            self.log(LogLevel::Warn, format!("{name} failed: {e}"));
                        }
                    }
                },
            }
        }

        Ok(RoundEnd::Completed { accounts: total })
    }

    /// Sync, download and export one account
    async fn process_account(
        &self,
        account: &mut Account,
        token: &CancellationToken,
    ) -> Result<AccountEnd> {
        let name = account_name(account).to_string();

        // Sync
        self.enter_phase(Phase::Sync, &account.id).await?;
        let mut cursor = self.with_state(|s| {
            s.sync_cursors
                .get(&account.id)
                .copied()
                .unwrap_or_default()
        });
        let synced = self.sync_engine.sync(account, &mut cursor, token).await;
        self.with_state(|s| {
            s.sync_cursors.insert(account.id.clone(), cursor);
        });
        let outcome = synced?;
        if outcome.interrupted || token.is_cancelled() {
            return Ok(AccountEnd::Interrupted);
        }
        self.log(
            LogLevel::Info,
            format!(
                "{name}: {} new items, {} messages synced",
                outcome.new_items.len(),
                account.message_count
            ),
        );

        // Download
        self.enter_phase(Phase::Download, &account.id).await?;
        let items = self.cache.get_items(&account.id).await?;
        let urls: Vec<String> = items
            .iter()
            .filter(|i| !i.deleted)
            .map(|i| i.canonical_link.clone())
            .collect();
        let existing = self.cache.batch_exists(&urls, FetchMode::Content).await?;
        let missing: Vec<String> = urls.into_iter().filter(|u| !existing.contains(u)).collect();

        self.with_state(|s| s.download_progress = PhaseProgress::begin(missing.len() as u64));
        let downloaded = !missing.is_empty();
        if downloaded {
            self.log(
                LogLevel::Info,
                format!("{name}: downloading {} payloads", missing.len()),
            );
            if !self.download(missing, token).await {
                return Ok(AccountEnd::Interrupted);
            }
        } else {
            self.log(LogLevel::Info, format!("{name}: all payloads already downloaded"));
        }
        if token.is_cancelled() {
            return Ok(AccountEnd::Interrupted);
        }

        // Export
        self.enter_phase(Phase::Export, &account.id).await?;
        let destination = self.current_destination().ok_or(Error::NoDestination)?;
        let report = self
            .exporter
            .export_account(account, destination.as_ref(), token, |progress| {
                self.with_state(|s| s.export_progress = progress.clone());
            })
            .await?;
        if report.interrupted {
            return Ok(AccountEnd::Interrupted);
        }
        self.log(
            LogLevel::Success,
            format!(
                "{name}: exported {}, skipped {}",
                report.exported, report.skipped
            ),
        );
        if report.failed > 0 {
            self.log(
                LogLevel::Warn,
                format!("{name}: {} documents could not be exported", report.failed),
            );
        }

        Ok(AccountEnd::Finished {
            new_items: outcome.new_items.len() as u64,
            exported: report.exported,
            network: outcome.pages_fetched > 0 || downloaded,
        })
    }

    /// Run one download batch, forwarding its events
    ///
    /// Returns false if the batch was stopped before finishing.
    async fn download(&self, urls: Vec<String>, token: &CancellationToken) -> bool {
        let mut events = std::pin::pin!(self.downloader.download(urls, FetchMode::Content));
        let mut stop_sent = false;
        let mut finished = false;

        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = token.cancelled(), if !stop_sent => {
                    self.downloader.stop();
                    stop_sent = true;
                    continue;
                }
            };
            let Some(event) = event else {
                break;
            };

            match &event {
                Event::DownloadProgress { url, summary, .. } => {
                    self.with_state(|s| {
                        s.download_progress.current =
                            summary.completed + summary.failed + summary.deleted;
                        s.download_progress.detail = url.clone();
                    });
                }
                Event::DownloadException { url, message } => {
                    tracing::debug!(url = %url, error = %message, "payload fetch attempt failed");
                }
                Event::DownloadFinish {
                    elapsed_secs,
                    summary,
                } => {
                    finished = true;
                    self.log(
                        LogLevel::Info,
                        format!(
                            "download finished in {}: {} ok, {} failed, {} deleted",
                            format_elapsed(*elapsed_secs),
                            summary.completed,
                            summary.failed,
                            summary.deleted
                        ),
                    );
                }
                _ => {}
            }
            self.emit(event);
        }

        finished
    }

    async fn enter_phase(&self, phase: Phase, account_id: &AccountId) -> Result<()> {
        self.with_state(|s| {
            s.current_phase = phase;
            s.current_account_id = Some(account_id.clone());
            match phase {
                Phase::Download => s.download_progress = PhaseProgress::default(),
                Phase::Export => s.export_progress = PhaseProgress::default(),
                Phase::Idle | Phase::Sync => {}
            }
        });
        self.emit(Event::PhaseChanged {
            phase,
            account_id: Some(account_id.clone()),
        });
        self.persist().await
    }
}

fn account_name(account: &Account) -> &str {
    if account.display_name.is_empty() {
        account.id.as_str()
    } else {
        &account.display_name
    }
}

/// Sleep unless cancelled first; false if cancelled
async fn sleep(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
