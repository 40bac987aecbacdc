//! In-process sinks: memory-backed ones for tests and a logging fallback for
//! running without a metrics backend.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::info;

use super::{ArchiveRecord, ArchiveSink, MetricsSink, Point};
use crate::error::MonitorResult;

/// In-memory metrics sink for testing
pub struct MemoryMetricsSink {
    points: RwLock<Vec<(String, Point)>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self {
            points: RwLock::new(Vec::new()),
        }
    }

    /// All points written so far, without their bucket.
    pub fn points(&self) -> Vec<Point> {
        self.points.read().iter().map(|(_, p)| p.clone()).collect()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.points.read().iter().map(|(b, _)| b.clone()).collect()
    }
}

impl Default for MemoryMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn write(&self, bucket: &str, point: &Point) -> MonitorResult<()> {
        self.points.write().push((bucket.to_string(), point.clone()));
        Ok(())
    }

    async fn write_batch(&self, bucket: &str, points: &[Point]) -> MonitorResult<()> {
        let mut stored = self.points.write();
        stored.extend(points.iter().map(|p| (bucket.to_string(), p.clone())));
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// In-memory archive that remembers batch boundaries.
pub struct MemoryArchive {
    batches: Mutex<Vec<Vec<ArchiveRecord>>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

impl Default for MemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn append(&self, records: &[ArchiveRecord]) -> MonitorResult<()> {
        self.batches.lock().push(records.to_vec());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Emits each point as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn write(&self, bucket: &str, point: &Point) -> MonitorResult<()> {
        let tags = point
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        let fields = point
            .fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        info!(
            bucket,
            measurement = %point.measurement,
            tags = %tags,
            fields = %fields,
            timestamp = %point.timestamp,
            "point"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
