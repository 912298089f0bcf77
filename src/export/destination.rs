//! Export destinations.

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Where exported documents are written
///
/// Documents are grouped per account in a named folder. A destination is an
/// external resource held by the running pipeline; after a restart it has to
/// be attached again before the pipeline may resume.
#[async_trait]
pub trait ExportDestination: Send + Sync {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Whether `folder/filename` already exists
    async fn exists(&self, folder: &str, filename: &str) -> Result<bool>;

    /// Write `document` to `folder/filename`, creating the folder if needed
    async fn write(&self, folder: &str, filename: &str, document: &str) -> Result<()>;
}

/// Destination rooted at a local directory
#[derive(Clone, Debug)]
pub struct DirectoryDestination {
    root: PathBuf,
}

impl DirectoryDestination {
    /// Use `root` as the export directory; it is created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The export directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ExportDestination for DirectoryDestination {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn exists(&self, folder: &str, filename: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.root.join(folder).join(filename)).await?)
    }

    async fn write(&self, folder: &str, filename: &str, document: &str) -> Result<()> {
        let dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dir).await?;

        // A partially written file must never pass the exists check
        let target = dir.join(filename);
        let partial = dir.join(format!(".{filename}.part"));
        tokio::fs::write(&partial, document).await?;
        tokio::fs::rename(&partial, &target).await?;
        Ok(())
    }
}
