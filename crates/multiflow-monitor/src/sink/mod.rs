//! Verdict fan-out to a metrics sink and an archive sink.
//!
//! ## Architecture
//!
//! ```text
//!   engine ──verdicts──► DispatchHandle ──(bounded queue)──► SinkDispatcher task
//!                         try_send, drop if full                 │
//!                                                   ┌────────────┴────────────┐
//!                                                   ▼                         ▼
//!                                      MetricsSink::write_batch   ArchiveSink::append
//!                                      (one point per row)        (every `archive_batch` rows)
//! ```
//!
//! Dispatch is fire-and-forget: sink failures are logged and counted and
//! never reach the scoring path.

pub mod archive;
pub mod influx;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::MonitorResult;
use crate::row::column_name;
use crate::stats::{DispatchSnapshot, DispatchStats};
use crate::verdict::Verdict;

pub use self::archive::CsvArchive;
pub use self::influx::{InfluxConfig, InfluxSink};
pub use self::memory::{LogMetricsSink, MemoryArchive, MemoryMetricsSink};

// ── Records ─────────────────────────────────────────────────────────────

/// A time-series point: one tag (the verdict label) plus numeric fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, f64)>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// One point per row covered by `verdict`: the row's columns followed by
    /// the finite derived score fields.
    pub fn from_verdict(measurement: &str, verdict: &Verdict) -> Vec<Point> {
        let derived = verdict.payload.derived_fields();
        verdict
            .rows()
            .iter()
            .map(|row| Point {
                measurement: measurement.to_string(),
                tags: vec![(verdict.tag_name().to_string(), verdict.label().to_string())],
                fields: row
                    .named()
                    .chain(derived.iter().filter(|(_, v)| v.is_finite()).cloned())
                    .collect(),
                timestamp: verdict.timestamp,
            })
            .collect()
    }
}

/// One archived row with its derived scores and verdict label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub seq: u64,
    pub values: Vec<f64>,
    /// Derived score fields of the verdict, one archive column each.
    pub scores: Vec<(String, f64)>,
    /// Column name of the label (`is_anomalous`, `outliers`, `drift_detected`).
    pub tag: String,
    pub label: String,
}

impl ArchiveRecord {
    /// Every row of a batch verdict is archived with the batch scores and label.
    pub fn from_verdict(verdict: &Verdict) -> Vec<ArchiveRecord> {
        let scores = verdict.payload.derived_fields();
        verdict
            .rows()
            .iter()
            .map(|row| ArchiveRecord {
                seq: row.seq(),
                values: row.values().to_vec(),
                scores: scores.clone(),
                tag: verdict.tag_name().to_string(),
                label: verdict.label().to_string(),
            })
            .collect()
    }

    /// Header matching [`ArchiveRecord::cells`].
    pub fn header(&self) -> Vec<String> {
        std::iter::once("seq".to_string())
            .chain((0..self.values.len()).map(column_name))
            .chain(self.scores.iter().map(|(name, _)| name.clone()))
            .chain(std::iter::once(self.tag.clone()))
            .collect()
    }

    /// Non-finite scores are written as empty cells.
    pub fn cells(&self) -> Vec<String> {
        std::iter::once(self.seq.to_string())
            .chain(self.values.iter().map(|v| v.to_string()))
            .chain(self.scores.iter().map(|(_, v)| {
                if v.is_finite() {
                    v.to_string()
                } else {
                    String::new()
                }
            }))
            .chain(std::iter::once(self.label.clone()))
            .collect()
    }
}

// ── Sink traits ─────────────────────────────────────────────────────────

/// Time-series metrics sink.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Write one point to `bucket`.
    async fn write(&self, bucket: &str, point: &Point) -> MonitorResult<()>;

    /// Write several points; the default writes them one at a time and stops
    /// at the first failure.
    async fn write_batch(&self, bucket: &str, points: &[Point]) -> MonitorResult<()> {
        for point in points {
            self.write(bucket, point).await?;
        }
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Append-only archive of scored rows.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    async fn append(&self, records: &[ArchiveRecord]) -> MonitorResult<()>;

    fn name(&self) -> &str;
}

// ── Dispatcher ──────────────────────────────────────────────────────────

/// Sink wiring shared by every dispatch.
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    pub bucket: String,
    pub measurement: String,
    /// Archive once this many records are pending.
    pub archive_batch: usize,
    pub queue_capacity: usize,
}

impl DispatchConfig {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            bucket: config.influxdb_bucket.clone(),
            measurement: config.collection_name.clone(),
            archive_batch: config.archive_batch,
            queue_capacity: config.dispatch_queue,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            bucket: "faust_app".to_string(),
            measurement: "outlier_detection".to_string(),
            archive_batch: 100,
            queue_capacity: 1024,
        }
    }
}

/// Writes verdicts to the metrics sink and batches rows into the archive.
pub struct SinkDispatcher {
    metrics: Arc<dyn MetricsSink>,
    archive: Arc<dyn ArchiveSink>,
    config: DispatchConfig,
    pending: Vec<ArchiveRecord>,
    stats: Arc<DispatchStats>,
}

impl SinkDispatcher {
    pub fn new(
        metrics: Arc<dyn MetricsSink>,
        archive: Arc<dyn ArchiveSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            metrics,
            archive,
            config,
            pending: Vec::new(),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Records waiting for the next archive batch.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Write one set of verdicts. Never fails; errors are logged and counted.
    pub async fn dispatch(&mut self, verdicts: &[Verdict]) {
        if verdicts.is_empty() {
            return;
        }

        let points: Vec<Point> = verdicts
            .iter()
            .flat_map(|v| Point::from_verdict(&self.config.measurement, v))
            .collect();
        match self.metrics.write_batch(&self.config.bucket, &points).await {
            Ok(()) => self.stats.add_points_written(points.len() as u64),
            Err(e) => {
                self.stats.add_points_failed(points.len() as u64);
                warn!(sink = self.metrics.name(), error = %e, points = points.len(), "metrics write failed");
            }
        }

        self.pending
            .extend(verdicts.iter().flat_map(ArchiveRecord::from_verdict));
        if self.pending.len() >= self.config.archive_batch.max(1) {
            self.flush().await;
        }
    }

    /// Archive everything pending. On failure the batch is dropped.
    pub async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.pending);
        match self.archive.append(&batch).await {
            Ok(()) => {
                self.stats.add_records_archived(batch.len() as u64);
                debug!(sink = self.archive.name(), records = batch.len(), "archive batch written");
            }
            Err(e) => {
                self.stats.inc_archive_failures();
                warn!(sink = self.archive.name(), error = %e, records = batch.len(), "archive write failed");
            }
        }
    }

    /// Run on its own task. The task ends, after a final flush, once every
    /// handle has been dropped.
    pub fn spawn(mut self) -> (DispatchHandle, JoinHandle<DispatchSnapshot>) {
        let (tx, mut rx) = mpsc::channel::<Vec<Verdict>>(self.config.queue_capacity.max(1));
        let handle = DispatchHandle {
            tx,
            stats: self.stats(),
        };

        let task = tokio::spawn(async move {
            while let Some(verdicts) = rx.recv().await {
                self.dispatch(&verdicts).await;
            }
            self.flush().await;
            let snapshot = self.stats.snapshot();
            info!(
                points = snapshot.points_written,
                archived = snapshot.records_archived,
                dropped = snapshot.dropped_batches,
                "sink dispatcher stopped"
            );
            snapshot
        });

        (handle, task)
    }
}

/// Sending side of a spawned [`SinkDispatcher`].
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::Sender<Vec<Verdict>>,
    stats: Arc<DispatchStats>,
}

impl DispatchHandle {
    /// Queue verdicts without waiting. A full or closed queue drops them.
    pub fn send(&self, verdicts: Vec<Verdict>) -> bool {
        if verdicts.is_empty() {
            return true;
        }
        match self.tx.try_send(verdicts) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                self.stats.inc_dropped_batches();
                warn!(verdicts = dropped.len(), "sink queue full, dropping verdicts");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                self.stats.inc_dropped_batches();
                warn!(verdicts = dropped.len(), "sink dispatcher stopped, dropping verdicts");
                false
            }
        }
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }
}
