//! # multiflow-monitor
//!
//! Streaming anomaly and drift monitoring over numeric rows.
//!
//! Rows arrive one at a time as comma-separated text. Each engine keeps a
//! bounded window of recent rows, decides when its detector must be
//! (re)trained, and scores incoming rows (or batches) against the model in
//! service. Verdicts fan out to a time-series metrics sink and a CSV archive.
//!
//! ## Architecture
//!
//! ```text
//!   StreamEvent ──► MonitorService ──► MonitoringEngine
//!                                        │
//!                    ┌───────────────────┼─────────────────────┐
//!                    ▼                   ▼                     ▼
//!               RowParser             Window             RefreshPolicy
//!            (schema lock)       (ring buffer)     (cadence per detector)
//!                                        │ snapshot            │ MustRefit
//!                                        ▼                     ▼
//!                               DetectorStrategy::fit ──► ModelState (Arc swap)
//!                                                              │
//!                               DetectorStrategy::score ◄──────┘
//!                                        │
//!                                        ▼ Verdict
//!                                  SinkDispatcher
//!                              ┌─────────┴─────────┐
//!                              ▼                   ▼
//!                         MetricsSink         ArchiveSink
//!                       (InfluxDB line)         (CSV)
//! ```
//!
//! ## Detectors
//!
//! | Strategy              | Cadence                   | Scores     |
//! |-----------------------|---------------------------|------------|
//! | [`ForecastBounds`]    | exhaustion of the horizon | each row   |
//! | [`IsolationEnsemble`] | threshold, then periodic  | each row   |
//! | [`KernelBoundary`]    | threshold, then periodic  | each row   |
//! | [`DynamicIqr`]        | threshold, then periodic  | each row   |
//! | [`DistributionDrift`] | fixed reference           | each batch |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use multiflow_monitor::{DynamicIqr, MonitorConfig, MonitoringEngine, StrategyKind};
//!
//! let config = MonitorConfig {
//!     initial_block_size: 3,
//!     ..MonitorConfig::for_detector(StrategyKind::DynamicIqr)
//! };
//! let mut engine = MonitoringEngine::from_config(DynamicIqr::from_config(&config), &config)?;
//!
//! for raw in ["1.0,10", "1.2,11", "0.9,10", "50,10"] {
//!     let outcome = engine.process(raw)?;
//!     for verdict in &outcome.verdicts {
//!         println!("{} {}={}", verdict.rows()[0].seq(), verdict.tag_name(), verdict.label());
//!     }
//! }
//! # Ok::<(), multiflow_monitor::MonitorError>(())
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod refresh;
pub mod row;
pub mod service;
pub mod sink;
pub mod stats;
pub mod verdict;
pub mod window;

// ── Re-exports ──────────────────────────────────────────────────────────

pub use config::{IqrHistory, MonitorConfig, RefitMode};
pub use detector::{
    DetectorStrategy, DistributionDrift, DynamicIqr, ForecastBounds, IsolationEnsemble,
    KernelBoundary, ModelState, Provenance, ScoreTarget, StrategyKind,
};
pub use engine::{
    EngineSettings, FitOutcome, FitRequest, MonitoringEngine, Outcome, Phase, WindowSpec,
};
pub use error::{ErrorKind, MonitorError, MonitorResult};
pub use refresh::{Cadence, PolicyInput, RefreshDecision, RefreshPolicy};
pub use row::{Row, RowParser, SchemaPolicy};
pub use service::{MonitorService, StreamEvent};
pub use sink::{
    ArchiveRecord, ArchiveSink, CsvArchive, DispatchConfig, DispatchHandle, InfluxConfig,
    InfluxSink, LogMetricsSink, MemoryArchive, MemoryMetricsSink, MetricsSink, Point,
    SinkDispatcher,
};
pub use stats::{DispatchSnapshot, EngineStats};
pub use verdict::{ScorePayload, SeriesBound, Subject, Verdict, Violation};
pub use window::{RingBuffer, TimeIndex, Window};
