//! Monitoring engine: RowParser → Window → RefreshPolicy → DetectorStrategy → Verdict.
//!
//! The engine is a synchronous state machine owned by exactly one ingestion
//! path. Each call to [`MonitoringEngine::process`] fully absorbs one raw
//! record (window mutation, refresh decision, scoring) before returning, so
//! rows are observed in a total order.
//!
//! ```text
//!   Accumulating ──(initial fit ok)──► Ready ──(policy: refit)──► Refitting
//!        ▲    │                          ▲                            │
//!        └────┘ (fit failed)             └──── success or failure ────┘
//! ```
//!
//! A refit that fails leaves the previous model in service. Background refits
//! are handed out as a [`FitRequest`] carrying an immutable window snapshot;
//! the caller runs it anywhere and hands the [`FitOutcome`] back through
//! [`MonitoringEngine::install`]. At most one request is outstanding.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{IqrHistory, MonitorConfig, RefitMode};
use crate::detector::{DetectorStrategy, ModelState, Provenance, ScoreTarget, StrategyKind};
use crate::error::{MonitorError, MonitorResult};
use crate::refresh::{Cadence, PolicyInput, RefreshDecision, RefreshPolicy};
use crate::row::{Row, RowParser, SchemaPolicy};
use crate::stats::EngineStats;
use crate::verdict::Verdict;
use crate::window::Window;

// ── Settings ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Not enough rows for a first model; nothing is scored.
    Accumulating,
    /// A model is in service.
    Ready,
    /// A model is in service and a refit is in flight.
    Refitting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowSpec {
    Bounded(usize),
    Unbounded,
}

/// Engine wiring derived from a [`MonitorConfig`] for one detector.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub cadence: Cadence,
    pub window: WindowSpec,
    /// Fit on only the latest `n` window rows; `None` fits on the whole window.
    pub training_span: Option<usize>,
    pub schema_policy: SchemaPolicy,
    pub max_columns: Option<usize>,
    pub refit_mode: RefitMode,
    pub progress_log_interval: u64,
}

impl EngineSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        let cadence = config.cadence();
        let bounded = |floor: usize| WindowSpec::Bounded(config.window_capacity.max(floor));

        let (window, training_span) = match config.detector {
            StrategyKind::ForecastBounds => (bounded(config.initial_training_batch), None),
            StrategyKind::IsolationEnsemble | StrategyKind::KernelBoundary => (
                bounded(config.initial_block_size),
                Some(config.initial_block_size),
            ),
            StrategyKind::DynamicIqr => match config.iqr_history {
                IqrHistory::Unbounded => (WindowSpec::Unbounded, None),
                IqrHistory::Windowed => (bounded(config.initial_block_size), None),
            },
            StrategyKind::DistributionDrift => (bounded(config.batch_size), None),
        };

        Self {
            cadence,
            window,
            training_span,
            schema_policy: config.effective_schema_policy(),
            max_columns: config.effective_max_columns(),
            refit_mode: config.refit_mode,
            progress_log_interval: config.progress_log_interval,
        }
    }
}

// ── Fit hand-off ────────────────────────────────────────────────────────

/// A fit to run off the ingestion path, against an immutable snapshot.
pub struct FitRequest<D: DetectorStrategy> {
    detector: Arc<D>,
    rows: Arc<[Row]>,
    generation: u64,
}

impl<D: DetectorStrategy> FitRequest<D> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn kind(&self) -> StrategyKind {
        self.detector.kind()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Run the fit. Pure with respect to the engine; safe on any thread.
    pub fn run(self) -> FitOutcome<D::Model> {
        let started = Instant::now();
        let result = self.detector.fit(&self.rows).map(|model| {
            ModelState::new(
                model,
                Provenance {
                    fitted_at: Utc::now(),
                    rows_used: self.rows.len(),
                    kind: self.detector.kind(),
                    columns: self.rows.first().map(Row::arity).unwrap_or_default(),
                    generation: self.generation,
                },
            )
        });
        debug!(
            generation = self.generation,
            rows = self.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "fit finished"
        );
        FitOutcome {
            generation: self.generation,
            result,
        }
    }
}

/// Result of a [`FitRequest`], to be handed back to the engine.
pub struct FitOutcome<M> {
    generation: u64,
    result: MonitorResult<ModelState<M>>,
}

impl<M> FitOutcome<M> {
    /// An outcome for a fit that never produced a result (e.g. its worker died).
    pub fn failed(generation: u64, error: MonitorError) -> Self {
        Self {
            generation,
            result: Err(error),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// What one call into the engine produced.
pub struct Outcome<D: DetectorStrategy> {
    pub verdicts: Vec<Verdict>,
    /// A background refit the caller must run and [`install`](MonitoringEngine::install).
    pub fit: Option<FitRequest<D>>,
}

impl<D: DetectorStrategy> Outcome<D> {
    fn empty() -> Self {
        Self {
            verdicts: Vec::new(),
            fit: None,
        }
    }
}

// ── Engine ──────────────────────────────────────────────────────────────

/// One engine per logical stream.
pub struct MonitoringEngine<D: DetectorStrategy> {
    detector: Arc<D>,
    settings: EngineSettings,
    parser: RowParser,
    window: Window,
    /// Reference block, only for the reference-split cadence.
    reference: Option<Window>,
    /// Rows waiting for the current forecast horizon to fill.
    horizon: Vec<Row>,
    live_rows: u64,
    policy: RefreshPolicy,
    model: Option<Arc<ModelState<D::Model>>>,
    phase: Phase,
    generation: u64,
    stats: EngineStats,
}

impl<D: DetectorStrategy> MonitoringEngine<D> {
    pub fn new(detector: D, settings: EngineSettings) -> Self {
        let window = match settings.window {
            WindowSpec::Bounded(capacity) => Window::bounded(capacity),
            WindowSpec::Unbounded => Window::unbounded(),
        };
        let reference = match settings.cadence {
            Cadence::ReferenceSplit {
                concept_samples, ..
            } => Some(Window::bounded(concept_samples)),
            _ => None,
        };
        let parser = RowParser::new(settings.schema_policy).with_max_columns(settings.max_columns);

        info!(
            detector = %detector.kind(),
            cadence = ?settings.cadence,
            window = ?settings.window,
            refit_mode = ?settings.refit_mode,
            "monitoring engine created"
        );

        Self {
            detector: Arc::new(detector),
            policy: RefreshPolicy::new(settings.cadence),
            settings,
            parser,
            window,
            reference,
            horizon: Vec::new(),
            live_rows: 0,
            model: None,
            phase: Phase::Accumulating,
            generation: 0,
            stats: EngineStats::default(),
        }
    }

    /// Validate `config` and build an engine for `detector`.
    pub fn from_config(detector: D, config: &MonitorConfig) -> MonitorResult<Self> {
        config.validate()?;
        if detector.kind() != config.detector {
            return Err(MonitorError::invalid_config(
                "detector",
                format!(
                    "configured for {} but given a {} detector",
                    config.detector,
                    detector.kind()
                ),
            ));
        }
        Ok(Self::new(detector, EngineSettings::from_config(config)))
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The model currently used for scoring.
    pub fn model(&self) -> Option<Arc<ModelState<D::Model>>> {
        self.model.clone()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn reference_len(&self) -> usize {
        self.reference.as_ref().map(Window::size).unwrap_or(0)
    }

    /// Rows buffered for the next forecast horizon.
    pub fn pending_horizon(&self) -> usize {
        self.horizon.len()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn kind(&self) -> StrategyKind {
        self.detector.kind()
    }

    // ── Ingestion ───────────────────────────────────────────────────

    /// Absorb one raw record.
    ///
    /// Parse and schema errors are counted, logged and returned; the window is
    /// untouched. Fit and score errors are handled internally.
    pub fn process(&mut self, raw: &str) -> MonitorResult<Outcome<D>> {
        let row = match self.parser.parse(raw) {
            Ok(row) => row,
            Err(e) => {
                self.stats.record_error(e.kind());
                warn!(error = %e, "row rejected");
                return Err(e);
            }
        };

        self.stats.accepted += 1;
        let interval = self.settings.progress_log_interval;
        if interval > 0 && self.stats.accepted % interval == 0 {
            info!(
                accepted = self.stats.accepted,
                phase = ?self.phase,
                window = self.window.size(),
                verdicts = self.stats.verdicts,
                anomalies = self.stats.anomalies,
                "rows processed"
            );
        }

        Ok(match self.policy.cadence() {
            Cadence::ThresholdThenPeriodic { .. } => self.ingest_periodic(row),
            Cadence::ExhaustionDriven {
                prediction_length, ..
            } => self.ingest_horizon(row, prediction_length),
            Cadence::ReferenceSplit { batch_size, .. } => self.ingest_split(row, batch_size),
        })
    }

    /// Hand back the result of a background refit.
    ///
    /// On success the new model replaces the old one in a single swap; on
    /// failure the old one stays. Forecast rows that queued up behind the
    /// refit are scored before returning.
    pub fn install(&mut self, outcome: FitOutcome<D::Model>) -> Outcome<D> {
        self.apply(outcome);
        match self.policy.cadence() {
            Cadence::ExhaustionDriven {
                prediction_length, ..
            } => self.drain_horizon(prediction_length),
            _ => Outcome::empty(),
        }
    }

    /// Score whatever is left of a forecast horizon, with the horizon shrunk
    /// to the rows available. No-op for the other cadences.
    pub fn finish(&mut self) -> Vec<Verdict> {
        if self.horizon.is_empty() || self.model.is_none() {
            return Vec::new();
        }
        let rest: Vec<Row> = std::mem::take(&mut self.horizon);
        info!(rows = rest.len(), "scoring final partial horizon");
        let verdicts = self.score(ScoreTarget::Batch(&rest));
        self.window.extend(rest);
        verdicts
    }

    /// Threshold-then-periodic: append, maybe (re)fit, then score the row.
    fn ingest_periodic(&mut self, row: Row) -> Outcome<D> {
        self.window.append(row.clone());
        self.policy.observe(1);

        let mut fit = None;
        if self.phase != Phase::Refitting
            && self.policy.evaluate(self.policy_input(false)) == RefreshDecision::MustRefit
        {
            let rows = self.training_rows();
            fit = self.refit(rows);
        }

        Outcome {
            verdicts: self.score(ScoreTarget::Row(&row)),
            fit,
        }
    }

    /// Exhaustion-driven: fill the window for the first fit, then score one
    /// horizon of `prediction_length` rows at a time.
    fn ingest_horizon(&mut self, row: Row, prediction_length: usize) -> Outcome<D> {
        if self.model.is_none() {
            self.window.append(row);
            if self.policy.evaluate(self.policy_input(false)) == RefreshDecision::MustRefit {
                let rows = self.window.snapshot();
                self.refit(rows);
            }
            return Outcome::empty();
        }

        self.policy.observe(1);
        self.horizon.push(row);
        self.drain_horizon(prediction_length)
    }

    fn drain_horizon(&mut self, prediction_length: usize) -> Outcome<D> {
        let mut outcome = Outcome::empty();
        let len = prediction_length.max(1);

        while self.phase == Phase::Ready && self.horizon.len() >= len {
            let chunk: Vec<Row> = self.horizon.drain(..len).collect();
            outcome.verdicts.extend(self.score(ScoreTarget::Batch(&chunk)));
            // slide forward by exactly the scored horizon
            self.window.extend(chunk);

            if self.policy.evaluate(self.policy_input(true)) == RefreshDecision::MustRefit {
                let rows = self.window.snapshot();
                outcome.fit = self.refit(rows);
            }
        }
        outcome
    }

    /// Reference split: fill the reference block once, then score every
    /// complete batch of live rows.
    fn ingest_split(&mut self, row: Row, batch_size: usize) -> Outcome<D> {
        if self.model.is_none() {
            let Some(reference) = self.reference.as_mut() else {
                return Outcome::empty();
            };
            reference.append(row);
            if self.policy.evaluate(self.policy_input(false)) == RefreshDecision::MustRefit {
                if let Some(rows) = self.reference.as_ref().map(Window::snapshot) {
                    self.refit(rows);
                }
            }
            return Outcome::empty();
        }

        self.window.append(row);
        self.policy.observe(1);
        self.live_rows += 1;
        if self.live_rows % batch_size.max(1) as u64 != 0 {
            return Outcome::empty();
        }

        // the reference model is never refitted
        let batch = self.window.latest(batch_size);
        Outcome {
            verdicts: self.score(ScoreTarget::Batch(&batch)),
            fit: None,
        }
    }

    // ── Fitting ─────────────────────────────────────────────────────

    fn policy_input(&self, horizon_exhausted: bool) -> PolicyInput {
        let fit_rows = match self.policy.cadence() {
            Cadence::ReferenceSplit { .. } => self.reference_len(),
            _ => self.window.size(),
        };
        PolicyInput {
            fit_rows,
            model_present: self.model.is_some(),
            horizon_exhausted,
        }
    }

    fn training_rows(&self) -> Arc<[Row]> {
        match self.settings.training_span {
            Some(n) => self.window.latest(n),
            None => self.window.snapshot(),
        }
    }

    fn begin_fit(&mut self, rows: Arc<[Row]>) -> FitRequest<D> {
        self.generation += 1;
        self.policy.fit_started();
        self.stats.fit_attempts += 1;
        debug!(generation = self.generation, rows = rows.len(), "fit started");
        FitRequest {
            detector: Arc::clone(&self.detector),
            rows,
            generation: self.generation,
        }
    }

    /// Start a fit. Initial fits and inline refits complete before returning;
    /// a background refit is returned for the caller to run.
    fn refit(&mut self, rows: Arc<[Row]>) -> Option<FitRequest<D>> {
        match (self.phase, self.settings.refit_mode) {
            (Phase::Refitting, _) => None,
            (Phase::Ready, RefitMode::Background) => {
                self.phase = Phase::Refitting;
                Some(self.begin_fit(rows))
            }
            (phase, _) => {
                if phase == Phase::Ready {
                    self.phase = Phase::Refitting;
                }
                let outcome = self.begin_fit(rows).run();
                self.apply(outcome);
                None
            }
        }
    }

    fn apply(&mut self, outcome: FitOutcome<D::Model>) {
        if outcome.generation != self.generation {
            warn!(
                generation = outcome.generation,
                current = self.generation,
                "discarding stale fit result"
            );
            return;
        }

        match outcome.result {
            Ok(state) => {
                let initial = self.model.is_none();
                info!(
                    detector = %self.detector.kind(),
                    generation = state.provenance().generation,
                    rows = state.provenance().rows_used,
                    initial,
                    "model fitted"
                );
                self.model = Some(Arc::new(state));
                self.phase = Phase::Ready;
            }
            Err(e) => {
                self.stats.record_error(e.kind());
                if self.model.is_some() {
                    warn!(error = %e, "refit failed, keeping previous model");
                    self.phase = Phase::Ready;
                } else {
                    warn!(error = %e, "initial fit failed, still accumulating");
                    self.phase = Phase::Accumulating;
                }
            }
        }
    }

    // ── Scoring ─────────────────────────────────────────────────────

    fn score(&mut self, target: ScoreTarget<'_>) -> Vec<Verdict> {
        let Some(model) = self.model.as_ref() else {
            return Vec::new();
        };
        match self.detector.score(model, target) {
            Ok(verdicts) => {
                self.stats.verdicts += verdicts.len() as u64;
                self.stats.anomalies += verdicts.iter().filter(|v| v.is_anomalous).count() as u64;
                verdicts
            }
            Err(e) => {
                self.stats.record_error(e.kind());
                warn!(error = %e, rows = target.rows().len(), "scoring failed, rows skipped");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DistributionDrift, DynamicIqr, ForecastBounds, IsolationEnsemble};
    use crate::error::ErrorKind;
    use crate::verdict::ScorePayload;
    use crate::window::TimeIndex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fits succeed `succeed` times, then fail. The model is the row count.
    struct Flaky {
        succeed: usize,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(succeed: usize) -> Self {
            Self {
                succeed,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DetectorStrategy for Flaky {
        type Model = usize;

        fn kind(&self) -> StrategyKind {
            StrategyKind::DynamicIqr
        }

        fn fit(&self, rows: &[Row]) -> MonitorResult<usize> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.succeed {
                return Err(MonitorError::fit(self.kind(), "degenerate window"));
            }
            Ok(rows.len())
        }

        fn score(
            &self,
            state: &ModelState<usize>,
            target: ScoreTarget<'_>,
        ) -> MonitorResult<Vec<Verdict>> {
            Ok(target
                .rows()
                .iter()
                .map(|row| {
                    Verdict::for_row(
                        self.kind(),
                        false,
                        ScorePayload::Boundary {
                            decision: *state.model() as f64,
                        },
                        row.clone(),
                        Utc::now(),
                    )
                })
                .collect())
        }
    }

    fn settings(cadence: Cadence, mode: RefitMode) -> EngineSettings {
        EngineSettings {
            cadence,
            window: WindowSpec::Bounded(10),
            training_span: None,
            schema_policy: SchemaPolicy::Strict,
            max_columns: None,
            refit_mode: mode,
            progress_log_interval: 0,
        }
    }

    fn periodic(initial: usize, interval: usize) -> Cadence {
        Cadence::ThresholdThenPeriodic {
            initial_block_size: initial,
            update_interval: interval,
        }
    }

    fn flaky(succeed: usize, cadence: Cadence, mode: RefitMode) -> MonitoringEngine<Flaky> {
        MonitoringEngine::new(Flaky::new(succeed), settings(cadence, mode))
    }

    fn feed<D: DetectorStrategy>(engine: &mut MonitoringEngine<D>, n: usize) -> Vec<Verdict> {
        (0..n)
            .flat_map(|i| engine.process(&format!("{}.0", i)).unwrap().verdicts)
            .collect()
    }

    #[test]
    fn accumulates_until_initial_block() {
        let mut engine = flaky(10, periodic(3, 5), RefitMode::Inline);
        assert!(feed(&mut engine, 2).is_empty());
        assert_eq!(engine.phase(), Phase::Accumulating);

        // the row completing the block is scored
        let out = engine.process("9").unwrap();
        assert_eq!(out.verdicts.len(), 1);
        assert_eq!(engine.phase(), Phase::Ready);
        assert_eq!(engine.model().unwrap().provenance().rows_used, 3);
    }

    #[test]
    fn periodic_refits_every_interval() {
        let mut engine = flaky(10, periodic(3, 4), RefitMode::Inline);
        feed(&mut engine, 3);
        assert_eq!(engine.stats().fit_attempts, 1);
        feed(&mut engine, 3);
        assert_eq!(engine.stats().fit_attempts, 1);
        feed(&mut engine, 1);
        assert_eq!(engine.stats().fit_attempts, 2);
        assert_eq!(engine.model().unwrap().provenance().generation, 2);
        feed(&mut engine, 8);
        assert_eq!(engine.stats().fit_attempts, 4);
    }

    #[test]
    fn failed_initial_fit_keeps_accumulating_and_retries() {
        let mut engine = flaky(0, periodic(2, 5), RefitMode::Inline);
        feed(&mut engine, 4);
        assert_eq!(engine.phase(), Phase::Accumulating);
        assert!(engine.model().is_none());
        assert_eq!(engine.stats().fit_attempts, 3);
        assert_eq!(engine.stats().fit_failures, 3);
        assert_eq!(engine.stats().verdicts, 0);
    }

    #[test]
    fn failed_refit_keeps_previous_model() {
        let mut engine = flaky(1, periodic(2, 2), RefitMode::Inline);
        feed(&mut engine, 2);
        let before = engine.model().unwrap();

        feed(&mut engine, 2);
        assert_eq!(engine.stats().fit_failures, 1);
        let after = engine.model().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(engine.phase(), Phase::Ready);
        // still scoring
        assert_eq!(engine.process("1").unwrap().verdicts.len(), 1);
    }

    #[test]
    fn schema_mismatch_leaves_window_unchanged() {
        let mut engine = flaky(10, periodic(5, 5), RefitMode::Inline);
        engine.process("1,2,3").unwrap();
        engine.process("4,5,6").unwrap();
        let before = engine.window().snapshot();

        let err = engine.process("1,2").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(engine.window().snapshot(), before);
        assert_eq!(engine.stats().schema_mismatches, 1);

        assert_eq!(engine.process("x,y,z").err().unwrap().kind(), ErrorKind::Parse);
        assert_eq!(engine.stats().accepted, 2);
    }

    #[test]
    fn background_refit_is_handed_out_once() {
        let mut engine = flaky(10, periodic(2, 2), RefitMode::Background);
        feed(&mut engine, 2);
        let first = engine.model().unwrap();

        engine.process("1").unwrap();
        let out = engine.process("2").unwrap();
        let request = out.fit.expect("refit requested");
        assert_eq!(engine.phase(), Phase::Refitting);
        // old model keeps scoring
        assert_eq!(out.verdicts.len(), 1);

        // no second request while one is in flight
        for _ in 0..5 {
            assert!(engine.process("3").unwrap().fit.is_none());
        }

        engine.install(request.run());
        assert_eq!(engine.phase(), Phase::Ready);
        let second = engine.model().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.provenance().generation, 2);
    }

    #[test]
    fn background_failure_is_fail_open() {
        let mut engine = flaky(1, periodic(2, 2), RefitMode::Background);
        feed(&mut engine, 4);
        let before = engine.model().unwrap();
        assert_eq!(engine.phase(), Phase::Refitting);

        let request_generation = engine.generation;
        engine.install(FitOutcome::failed(
            request_generation,
            MonitorError::fit(StrategyKind::DynamicIqr, "worker died"),
        ));
        assert!(Arc::ptr_eq(&before, &engine.model().unwrap()));
        assert_eq!(engine.phase(), Phase::Ready);
    }

    #[test]
    fn training_span_uses_latest_rows() {
        let mut s = settings(periodic(3, 100), RefitMode::Inline);
        s.training_span = Some(3);
        let mut engine = MonitoringEngine::new(Flaky::new(10), s);
        feed(&mut engine, 3);
        assert_eq!(engine.model().unwrap().provenance().rows_used, 3);
    }

    #[test]
    fn unbounded_iqr_window_keeps_every_row() {
        let config = MonitorConfig {
            initial_block_size: 5,
            update_interval: 5,
            refit_mode: RefitMode::Inline,
            ..MonitorConfig::for_detector(StrategyKind::DynamicIqr)
        };
        let mut engine =
            MonitoringEngine::from_config(DynamicIqr::from_config(&config), &config).unwrap();
        feed(&mut engine, 1200);
        assert_eq!(engine.window().size(), 1200);
        assert_eq!(engine.model().unwrap().provenance().rows_used, 1200);
    }

    #[test]
    fn windowed_iqr_history_stays_bounded() {
        let config = MonitorConfig {
            initial_block_size: 5,
            update_interval: 5,
            window_capacity: 50,
            iqr_history: IqrHistory::Windowed,
            refit_mode: RefitMode::Inline,
            ..MonitorConfig::for_detector(StrategyKind::DynamicIqr)
        };
        let mut engine =
            MonitoringEngine::from_config(DynamicIqr::from_config(&config), &config).unwrap();
        for n in [10, 49, 50, 51, 200] {
            let fed = engine.stats().accepted as usize;
            feed(&mut engine, n - fed);
            assert_eq!(engine.window().size(), n.min(50));
        }
        assert_eq!(engine.stats().fit_attempts, 40);
        assert_eq!(engine.model().unwrap().provenance().rows_used, 50);
    }

    #[test]
    fn forecast_scores_whole_horizons() {
        let config = MonitorConfig {
            initial_training_batch: 10,
            prediction_length: 4,
            window_capacity: 12,
            refit_mode: RefitMode::Inline,
            ..MonitorConfig::for_detector(StrategyKind::ForecastBounds)
        };
        let detector = ForecastBounds::from_config(&config, TimeIndex::new(Utc::now()));
        let mut engine = MonitoringEngine::from_config(detector, &config).unwrap();

        assert!(feed(&mut engine, 10).is_empty());
        assert_eq!(engine.stats().fit_attempts, 1);

        // three rows buffered, fourth completes the horizon
        for i in 10..13 {
            assert!(engine.process(&format!("{}", i)).unwrap().verdicts.is_empty());
        }
        assert_eq!(engine.pending_horizon(), 3);
        let out = engine.process("13").unwrap();
        assert_eq!(out.verdicts.len(), 4);
        assert_eq!(engine.pending_horizon(), 0);
        assert_eq!(engine.stats().fit_attempts, 2);
        // window slid forward and stayed bounded
        assert_eq!(engine.window().size(), 12);
        assert_eq!(engine.window().snapshot().last().unwrap().seq(), 13);

        // final partial horizon
        engine.process("14").unwrap();
        engine.process("15").unwrap();
        let rest = engine.finish();
        assert_eq!(rest.len(), 2);
        assert!(engine.finish().is_empty());
    }

    #[test]
    fn forecast_rows_wait_for_background_refit() {
        let config = MonitorConfig {
            initial_training_batch: 5,
            prediction_length: 2,
            refit_mode: RefitMode::Background,
            ..MonitorConfig::for_detector(StrategyKind::ForecastBounds)
        };
        let detector = ForecastBounds::from_config(&config, TimeIndex::new(Utc::now()));
        let mut engine = MonitoringEngine::from_config(detector, &config).unwrap();
        feed(&mut engine, 5);

        engine.process("5").unwrap();
        let out = engine.process("6").unwrap();
        assert_eq!(out.verdicts.len(), 2);
        let request = out.fit.expect("refit requested");

        // rows queue behind the in-flight refit
        for i in 7..10 {
            assert!(engine.process(&format!("{}", i)).unwrap().verdicts.is_empty());
        }
        assert_eq!(engine.pending_horizon(), 3);

        let out = engine.install(request.run());
        assert_eq!(out.verdicts.len(), 2);
        assert!(out.fit.is_some());
        assert_eq!(engine.pending_horizon(), 1);
    }

    #[test]
    fn drift_scores_complete_batches_only() {
        let config = MonitorConfig {
            concept_samples: 6,
            batch_size: 3,
            ..MonitorConfig::for_detector(StrategyKind::DistributionDrift)
        };
        let mut engine =
            MonitoringEngine::from_config(DistributionDrift::from_config(&config), &config).unwrap();

        // wider rows are cut to one column
        for i in 0..6 {
            engine.process(&format!("{}.5,99", i % 2)).unwrap();
        }
        assert_eq!(engine.phase(), Phase::Ready);
        assert_eq!(engine.reference_len(), 6);

        let mut batches = 0;
        for i in 0..8 {
            let out = engine.process(&format!("{}", i % 2)).unwrap();
            if !out.verdicts.is_empty() {
                assert_eq!(out.verdicts.len(), 1);
                assert_eq!(out.verdicts[0].rows().len(), 3);
                batches += 1;
            }
        }
        // 8 live rows: two full batches, trailing two never scored
        assert_eq!(batches, 2);
        assert_eq!(engine.reference_len(), 6);
        assert_eq!(engine.stats().fit_attempts, 1);
        assert!(engine.finish().is_empty());
    }

    #[test]
    fn mismatched_detector_is_rejected() {
        let config = MonitorConfig::for_detector(StrategyKind::DynamicIqr);
        let result =
            MonitoringEngine::from_config(IsolationEnsemble::from_config(&config), &config);
        assert_eq!(result.err().unwrap().kind(), ErrorKind::InvalidConfig);
    }
}
