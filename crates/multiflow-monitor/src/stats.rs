//! Ingestion and dispatch counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Counters owned by a single engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub accepted: u64,
    pub parse_errors: u64,
    pub schema_mismatches: u64,
    pub score_errors: u64,
    pub fit_attempts: u64,
    pub fit_failures: u64,
    pub verdicts: u64,
    pub anomalies: u64,
}

impl EngineStats {
    /// Count an error by kind. Sink and configuration errors never reach an
    /// engine and are ignored here.
    pub fn record_error(&mut self, kind: ErrorKind) {
        match kind {
            ErrorKind::Parse => self.parse_errors += 1,
            ErrorKind::SchemaMismatch => self.schema_mismatches += 1,
            ErrorKind::Score => self.score_errors += 1,
            ErrorKind::Fit => self.fit_failures += 1,
            ErrorKind::Sink | ErrorKind::InvalidConfig => {}
        }
    }

    pub fn rejected(&self) -> u64 {
        self.parse_errors + self.schema_mismatches
    }
}

/// Counters shared between the dispatcher task and its handles.
#[derive(Debug, Default)]
pub struct DispatchStats {
    points_written: AtomicU64,
    points_failed: AtomicU64,
    records_archived: AtomicU64,
    archive_failures: AtomicU64,
    dropped_batches: AtomicU64,
}

impl DispatchStats {
    pub fn add_points_written(&self, n: u64) {
        self.points_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_points_failed(&self, n: u64) {
        self.points_failed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_records_archived(&self, n: u64) {
        self.records_archived.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_archive_failures(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped_batches(&self) {
        self.dropped_batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            points_written: self.points_written.load(Ordering::Relaxed),
            points_failed: self.points_failed.load(Ordering::Relaxed),
            records_archived: self.records_archived.load(Ordering::Relaxed),
            archive_failures: self.archive_failures.load(Ordering::Relaxed),
            dropped_batches: self.dropped_batches.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub points_written: u64,
    pub points_failed: u64,
    pub records_archived: u64,
    pub archive_failures: u64,
    pub dropped_batches: u64,
}
