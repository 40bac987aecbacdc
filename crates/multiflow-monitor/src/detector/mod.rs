//! Detection strategies behind one capability contract.
//!
//! ## Architecture
//!
//! ```text
//!   Window snapshot ──► DetectorStrategy::fit ──► ModelState<M> (immutable, Arc-shared)
//!                                                    │
//!   Row | Batch ──────► DetectorStrategy::score ◄────┘
//!                              │
//!                              ▼
//!                         Vec<Verdict>
//! ```
//!
//! Five strategies are provided:
//! - [`ForecastBounds`]: per-series quantile forecast, widened by expansion factors
//! - [`IsolationEnsemble`]: bagged random isolation trees
//! - [`KernelBoundary`]: standardized one-class RBF boundary
//! - [`DynamicIqr`]: per-column interquartile thresholds
//! - [`DistributionDrift`]: reference-vs-batch kernel two-sample distance

pub mod drift;
pub mod forecast;
pub mod iqr;
pub mod isolation;
pub mod kernel;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};
use crate::row::Row;
use crate::verdict::Verdict;

pub use drift::{DistributionDrift, DriftModel};
pub use forecast::{expand_bounds, ForecastBounds, ForecastModel};
pub use iqr::{ColumnThreshold, DynamicIqr, IqrModel};
pub use isolation::{IsolationEnsemble, IsolationModel};
pub use kernel::{KernelBoundary, KernelModel};

// ── Strategy kind ───────────────────────────────────────────────────────

/// Which detection strategy produced a model or verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[serde(alias = "forecast")]
    ForecastBounds,
    #[serde(alias = "isolation")]
    IsolationEnsemble,
    #[serde(alias = "kernel")]
    KernelBoundary,
    #[serde(alias = "iqr")]
    DynamicIqr,
    #[serde(alias = "drift")]
    DistributionDrift,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::ForecastBounds,
        StrategyKind::IsolationEnsemble,
        StrategyKind::KernelBoundary,
        StrategyKind::DynamicIqr,
        StrategyKind::DistributionDrift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ForecastBounds => "forecast_bounds",
            StrategyKind::IsolationEnsemble => "isolation_ensemble",
            StrategyKind::KernelBoundary => "kernel_boundary",
            StrategyKind::DynamicIqr => "dynamic_iqr",
            StrategyKind::DistributionDrift => "distribution_drift",
        }
    }

    /// Short name accepted on the command line and in configuration.
    pub fn short_name(&self) -> &'static str {
        match self {
            StrategyKind::ForecastBounds => "forecast",
            StrategyKind::IsolationEnsemble => "isolation",
            StrategyKind::KernelBoundary => "kernel",
            StrategyKind::DynamicIqr => "iqr",
            StrategyKind::DistributionDrift => "drift",
        }
    }

    /// Tag key carried by every metrics point this strategy emits.
    pub fn tag_name(&self) -> &'static str {
        match self {
            StrategyKind::ForecastBounds | StrategyKind::IsolationEnsemble => "is_anomalous",
            StrategyKind::KernelBoundary | StrategyKind::DynamicIqr => "outliers",
            StrategyKind::DistributionDrift => "drift_detected",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        StrategyKind::ALL
            .into_iter()
            .find(|k| k.as_str() == wanted || k.short_name() == wanted)
            .ok_or_else(|| {
                MonitorError::invalid_config(
                    "detector",
                    format!("unknown detector {:?} (expected forecast|isolation|kernel|iqr|drift)", s),
                )
            })
    }
}

// ── Model state ─────────────────────────────────────────────────────────

/// Where a fitted model came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub fitted_at: DateTime<Utc>,
    pub rows_used: usize,
    pub kind: StrategyKind,
    /// Column arity of the training rows. Scoring targets must match it.
    pub columns: usize,
    /// Monotonic fit counter within one engine.
    pub generation: u64,
}

/// A fitted model. Never mutated; a refresh replaces it wholesale.
#[derive(Debug)]
pub struct ModelState<M> {
    model: M,
    provenance: Provenance,
}

impl<M> ModelState<M> {
    pub fn new(model: M, provenance: Provenance) -> Self {
        Self { model, provenance }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Reject scoring targets whose arity differs from the training schema.
    pub fn check_schema(&self, rows: &[Row]) -> MonitorResult<()> {
        let expected = self.provenance.columns;
        match rows.iter().find(|r| r.arity() != expected) {
            Some(row) => Err(MonitorError::Score(format!(
                "row {} has {} columns, model was trained on {}",
                row.seq(),
                row.arity(),
                expected
            ))),
            None => Ok(()),
        }
    }
}

// ── Strategy trait ──────────────────────────────────────────────────────

/// What gets scored: a single row, or a whole batch.
#[derive(Clone, Copy, Debug)]
pub enum ScoreTarget<'a> {
    Row(&'a Row),
    Batch(&'a [Row]),
}

impl<'a> ScoreTarget<'a> {
    pub fn rows(&self) -> &'a [Row] {
        match *self {
            ScoreTarget::Row(row) => std::slice::from_ref(row),
            ScoreTarget::Batch(rows) => rows,
        }
    }
}

/// A pluggable detection strategy.
///
/// `fit` must be a pure function of its input rows so it can run on a
/// separate thread against a window snapshot.
pub trait DetectorStrategy: Send + Sync + 'static {
    /// Fitted model produced by this strategy.
    type Model: Send + Sync + 'static;

    fn kind(&self) -> StrategyKind;

    /// Fit a model. Fails with `MonitorError::Fit` when `rows` is empty or
    /// degenerate.
    fn fit(&self, rows: &[Row]) -> MonitorResult<Self::Model>;

    /// Score a row or batch. Fails with `MonitorError::Score` when the
    /// target's schema does not match the model's.
    fn score(
        &self,
        state: &ModelState<Self::Model>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>>;
}

// ── Shared numerics ─────────────────────────────────────────────────────

/// Validate training rows and return their common arity.
pub(crate) fn training_arity(
    kind: StrategyKind,
    rows: &[Row],
    min_rows: usize,
) -> MonitorResult<usize> {
    if rows.len() < min_rows.max(1) {
        return Err(MonitorError::fit(
            kind,
            format!("need at least {} rows, got {}", min_rows.max(1), rows.len()),
        ));
    }
    let arity = rows[0].arity();
    if arity == 0 {
        return Err(MonitorError::fit(kind, "rows have no columns"));
    }
    if rows.iter().any(|r| r.arity() != arity) {
        return Err(MonitorError::fit(kind, "rows disagree on column count"));
    }
    Ok(arity)
}

/// Values of one column, in row order.
pub(crate) fn column(rows: &[Row], index: usize) -> Vec<f64> {
    rows.iter().filter_map(|r| r.get(index)).collect()
}

/// Linear-interpolated quantile of an ascending slice (`q` in `[0, 1]`).
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Sort a copy and take its quantile.
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&sorted, q)
}

pub(crate) fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn rows(values: &[&[f64]]) -> Vec<Row> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Row::new(i as u64, v.to_vec()))
            .collect()
    }

    pub(crate) fn state<M>(model: M, kind: StrategyKind, columns: usize) -> ModelState<M> {
        ModelState::new(
            model,
            Provenance {
                fitted_at: Utc::now(),
                rows_used: 0,
                kind,
                columns,
                generation: 1,
            },
        )
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.as_str().parse::<StrategyKind>().unwrap(), kind);
            assert_eq!(kind.short_name().parse::<StrategyKind>().unwrap(), kind);
        }
        assert!("chronos".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn kind_deserializes_short_alias() {
        let kind: StrategyKind = serde_json::from_str("\"iqr\"").unwrap();
        assert_eq!(kind, StrategyKind::DynamicIqr);
        assert_eq!(
            serde_json::to_string(&StrategyKind::DistributionDrift).unwrap(),
            "\"distribution_drift\""
        );
    }

    #[test]
    fn quantile_interpolates_linearly() {
        let values = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert!((quantile(&values, 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&values, 0.5) - 2.5).abs() < 1e-12);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn training_arity_rejects_degenerate_input() {
        let kind = StrategyKind::DynamicIqr;
        assert!(training_arity(kind, &[], 1).is_err());
        assert!(training_arity(kind, &rows(&[&[1.0]]), 2).is_err());
        assert!(training_arity(kind, &rows(&[&[1.0], &[1.0, 2.0]]), 1).is_err());
        assert_eq!(training_arity(kind, &rows(&[&[1.0, 2.0]]), 1).unwrap(), 2);
    }

    #[test]
    fn schema_check_reports_offending_row() {
        let st = state((), StrategyKind::IsolationEnsemble, 2);
        assert!(st.check_schema(&rows(&[&[1.0, 2.0]])).is_ok());
        let err = st.check_schema(&rows(&[&[1.0, 2.0], &[1.0]])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Score);
    }
}
