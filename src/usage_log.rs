//! UsageLog - append one line per completed unmute
//!
//! Used for "how many people pressed the button during each show" analytics.
//!
//! Features:
//! - Append-only CSV: `<local timestamp>, <item>`
//! - Best-effort: I/O errors are logged, never surfaced to the engine
//! - Never read back by the controller

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::adapters::traits::UsageRecorder;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// File-backed usage log
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Render one log line
    pub fn format_line(at: DateTime<Local>, item: &str) -> String {
        // Newlines in a sequence name would corrupt the one-line-per-press format
        let item = item.replace(['\r', '\n'], " ");
        format!("{}, {}\n", at.format(TIMESTAMP_FORMAT), item)
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl UsageRecorder for UsageLog {
    async fn record_unmute(&self, item: &str) {
        let line = Self::format_line(Local::now(), item);
        match self.append(&line).await {
            Ok(()) => debug!(item, "Recorded unmute"),
            Err(e) => warn!(
                "Failed to append to usage log {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
