//! Append-only CSV archive of scored rows.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{ArchiveRecord, ArchiveSink};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};

/// Appends records to `{dir}/{output_file_name}.csv`, writing the header
/// only when the file is new or empty.
pub struct CsvArchive {
    path: PathBuf,
    // serializes appends so header detection and the write stay together
    lock: Mutex<()>,
}

impl CsvArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        let dir = Path::new(&config.archive_dir);
        Self::new(dir.join(format!("{}.csv", config.output_file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn needs_header(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        }
    }
}

fn encode(records: &[ArchiveRecord], header: bool) -> MonitorResult<Vec<u8>> {
    let mut writer = ::csv::Writer::from_writer(Vec::new());
    if header {
        if let Some(first) = records.first() {
            writer.write_record(first.header())?;
        }
    }
    for record in records {
        writer.write_record(record.cells())?;
    }
    writer
        .into_inner()
        .map_err(|e| MonitorError::Sink(format!("csv buffer: {}", e)))
}

#[async_trait]
impl ArchiveSink for CsvArchive {
    async fn append(&self, records: &[ArchiveRecord]) -> MonitorResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let bytes = encode(records, self.needs_header().await)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }

    fn name(&self) -> &str {
        "csv"
    }
}
