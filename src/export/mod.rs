//! Export step: cached payloads to documents at a destination
//!
//! Each account's documents go to a folder named after the account. An item
//! is skipped when its payload has not been downloaded or when its document
//! already exists at the destination, so re-running an export only writes
//! what is missing.

use crate::cache::ItemCache;
use crate::config::ExportConfig;
use crate::error::Result;
use crate::types::{Account, FetchMode, PhaseProgress};
use crate::utils::{format_export_filename, sanitize_filename};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

mod destination;
mod markdown;

pub use destination::{DirectoryDestination, ExportDestination};
pub use markdown::{FrontMatterRenderer, Renderer, html_to_markdown};

/// Tallies of one account export
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Documents written
    pub exported: u64,
    /// Items without a payload or with an existing document
    pub skipped: u64,
    /// Items whose document could not be rendered or written
    pub failed: u64,
    /// Stopped before visiting every item
    pub interrupted: bool,
}

/// Writes an account's cached payloads as documents
pub struct Exporter {
    cache: Arc<dyn ItemCache>,
    renderer: Arc<dyn Renderer>,
    config: ExportConfig,
}

impl Exporter {
    /// Create an exporter
    pub fn new(cache: Arc<dyn ItemCache>, renderer: Arc<dyn Renderer>, config: ExportConfig) -> Self {
        Self {
            cache,
            renderer,
            config,
        }
    }

    /// Folder holding an account's documents
    pub fn account_folder(account: &Account) -> String {
        let name = if account.display_name.trim().is_empty() {
            account.id.as_str()
        } else {
            account.display_name.as_str()
        };
        sanitize_filename(name)
    }

    /// Document filename for an item
    pub fn filename(&self, title: &str, create_time: i64) -> String {
        let stem = format_export_filename(
            &self.config.filename_template,
            title,
            create_time,
            self.config.utc_offset_minutes,
        );
        if self.config.extension.is_empty() {
            stem
        } else {
            format!("{stem}.{}", self.config.extension)
        }
    }

    /// Export every cached item of `account` to `destination`
    ///
    /// Items are visited one at a time, newest first; `token` is checked
    /// before each. `progress` is called after every item.
    ///
    /// # Errors
    ///
    /// Cache failures and an unreadable destination abort the export.
    /// Per-item render and write failures are logged and counted in
    /// [`ExportReport::failed`].
    pub async fn export_account<F>(
        &self,
        account: &Account,
        destination: &dyn ExportDestination,
        token: &CancellationToken,
        mut progress: F,
    ) -> Result<ExportReport>
    where
        F: FnMut(&PhaseProgress) + Send,
    {
        let items = self.cache.get_items(&account.id).await?;
        let urls: Vec<String> = items.iter().map(|i| i.canonical_link.clone()).collect();
        let payloads = self.cache.get_payloads(&urls, FetchMode::Content).await?;
        let folder = Self::account_folder(account);

        tracing::debug!(
            account_id = %account.id,
            items = items.len(),
            payloads = payloads.len(),
            destination = %destination.describe(),
            folder = %folder,
            "exporting account"
        );

        let mut report = ExportReport::default();
        let mut state = PhaseProgress::begin(items.len() as u64);

        for item in &items {
            if token.is_cancelled() {
                report.interrupted = true;
                break;
            }

            state.current += 1;
            state.detail = format!("({}/{}) {}", state.current, state.total, item.title);

            let Some(payload) = payloads.get(&item.canonical_link) else {
                report.skipped += 1;
                progress(&state);
                continue;
            };

            let filename = self.filename(&item.title, item.create_time);
            if destination.exists(&folder, &filename).await? {
                report.skipped += 1;
                progress(&state);
                continue;
            }

            match self.renderer.render(account, item, payload) {
                Ok(Some(document)) => match destination.write(&folder, &filename, &document).await {
                    Ok(()) => report.exported += 1,
                    Err(e) => {
                        tracing::warn!(url = %item.canonical_link, filename = %filename, error = %e, "export write failed");
                        report.failed += 1;
                    }
                },
                Ok(None) => {
                    tracing::warn!(url = %item.canonical_link, "payload has no content to export");
                    report.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(url = %item.canonical_link, error = %e, "export render failed");
                    report.failed += 1;
                }
            }
            progress(&state);
        }

        tracing::info!(
            account_id = %account.id,
            exported = report.exported,
            skipped = report.skipped,
            failed = report.failed,
            "account exported"
        );

        Ok(report)
    }
}
