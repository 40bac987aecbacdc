//! One-class kernel boundary over standardized columns.
//!
//! Standardization (per-column mean and population standard deviation) and
//! the boundary are fit together and live in the same [`KernelModel`]; a
//! score always reapplies the scaler that was fit with the boundary.
//!
//! The boundary is a Parzen-style density estimate with an RBF kernel
//! (`gamma = 1 / n_columns`): a point's support is its mean kernel
//! similarity to the training points, and the cut-off `rho` is the `nu`
//! quantile of the training supports. `decision = support - rho`, negative
//! means outside the boundary.

use chrono::Utc;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::row::Row;
use crate::verdict::{ScorePayload, Verdict};

use super::{
    column, quantile, squared_distance, training_arity, DetectorStrategy, ModelState, ScoreTarget,
    StrategyKind,
};

/// Per-column standardization.
#[derive(Clone, Debug, PartialEq)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Row], arity: usize) -> Self {
        let (means, scales) = (0..arity)
            .map(|c| {
                let values = column(rows, c);
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                // constant column: leave unscaled
                (mean, if std > 0.0 { std } else { 1.0 })
            })
            .unzip();
        Self { means, scales }
    }

    pub fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (mean, scale))| (v - mean) / scale)
            .collect()
    }
}

/// One-class boundary strategy.
#[derive(Clone, Debug)]
pub struct KernelBoundary {
    nu: f64,
}

impl Default for KernelBoundary {
    fn default() -> Self {
        Self { nu: 0.05 }
    }
}

impl KernelBoundary {
    pub fn new(nu: f64) -> Self {
        Self { nu }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.nu)
    }
}

#[derive(Debug)]
pub struct KernelModel {
    scaler: StandardScaler,
    support: Vec<Vec<f64>>,
    gamma: f64,
    rho: f64,
}

impl KernelModel {
    fn support_of(&self, scaled: &[f64]) -> f64 {
        let total: f64 = self
            .support
            .iter()
            .map(|s| (-self.gamma * squared_distance(s, scaled)).exp())
            .sum();
        total / self.support.len() as f64
    }

    /// Signed distance to the boundary for raw (unscaled) values.
    pub fn decision(&self, values: &[f64]) -> f64 {
        self.support_of(&self.scaler.transform(values)) - self.rho
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }
}

impl DetectorStrategy for KernelBoundary {
    type Model = KernelModel;

    fn kind(&self) -> StrategyKind {
        StrategyKind::KernelBoundary
    }

    fn fit(&self, rows: &[Row]) -> MonitorResult<KernelModel> {
        let arity = training_arity(self.kind(), rows, 2)?;
        let scaler = StandardScaler::fit(rows, arity);
        let support: Vec<Vec<f64>> = rows.iter().map(|r| scaler.transform(r.values())).collect();

        let mut model = KernelModel {
            scaler,
            support,
            gamma: 1.0 / arity as f64,
            rho: 0.0,
        };
        let training: Vec<f64> = model.support.iter().map(|s| model.support_of(s)).collect();
        model.rho = quantile(&training, self.nu);
        if !model.rho.is_finite() {
            return Err(MonitorError::fit(self.kind(), "boundary offset is not finite"));
        }
        Ok(model)
    }

    fn score(
        &self,
        state: &ModelState<KernelModel>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>> {
        let rows = target.rows();
        state.check_schema(rows)?;
        let model = state.model();
        let now = Utc::now();

        Ok(rows
            .iter()
            .map(|row| {
                let decision = model.decision(row.values());
                Verdict::for_row(
                    self.kind(),
                    decision < 0.0,
                    ScorePayload::Boundary { decision },
                    row.clone(),
                    now,
                )
            })
            .collect())
    }
}
