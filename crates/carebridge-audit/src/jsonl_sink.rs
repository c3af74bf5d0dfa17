//! JSONL audit sink
//!
//! Appends one JSON object per line to `audit-YYYY-MM-DD.jsonl` (UTC day of
//! the event timestamp) under the configured directory.

use crate::sink::{AuditSink, SinkResult};
use async_trait::async_trait;
use carebridge_core::AuditEvent;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

pub struct JsonlAuditSink {
    directory: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File that receives events stamped on the given day
    fn file_path_for(&self, event: &AuditEvent) -> PathBuf {
        let day = event.timestamp.format("%Y-%m-%d");
        self.directory.join(format!("audit-{}.jsonl", day))
    }

    async fn open_append(&self, path: &Path) -> SinkResult<tokio::fs::File> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(file)
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn write_event(&self, event: &AuditEvent) -> SinkResult<()> {
        let path = self.file_path_for(event);
        let mut file = self.open_append(&path).await?;

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await?;

        Ok(())
    }

    async fn write_batch(&self, events: &[AuditEvent]) -> SinkResult<()> {
        // Group by destination file, preserving emission order within a file
        let mut by_file: BTreeMap<PathBuf, Vec<&AuditEvent>> = BTreeMap::new();
        for event in events {
            by_file.entry(self.file_path_for(event)).or_default().push(event);
        }

        for (path, file_events) in by_file {
            let mut file = self.open_append(&path).await?;

            for event in file_events {
                let mut line = serde_json::to_vec(event)?;
                line.push(b'\n');
                file.write_all(&line).await?;
            }

            file.flush().await?;
        }

        Ok(())
    }

    fn supports_batching(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}
