//! Model refresh cadences.
//!
//! A [`RefreshPolicy`] is consulted once per accepted row (or once per
//! completed horizon for the forecasting cadence) and answers a single
//! question: does the model have to be fit again before scoring continues?

use serde::{Deserialize, Serialize};

/// When a model is (re)fit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cadence", rename_all = "snake_case")]
pub enum Cadence {
    /// No model until the window holds `initial_block_size` rows, then a
    /// refit every `update_interval` accepted rows.
    ThresholdThenPeriodic {
        initial_block_size: usize,
        update_interval: usize,
    },
    /// Initial fit at `initial_block_size` rows, then a refit each time a
    /// scoring horizon of `prediction_length` rows has been consumed.
    ExhaustionDriven {
        initial_block_size: usize,
        prediction_length: usize,
    },
    /// A reference block of `concept_samples` rows is fit once; afterwards
    /// only live batches of `batch_size` rows advance and no refit happens.
    ReferenceSplit {
        concept_samples: usize,
        batch_size: usize,
    },
}

impl Cadence {
    /// Rows that must be buffered before the first fit.
    pub fn initial_rows(&self) -> usize {
        match *self {
            Cadence::ThresholdThenPeriodic {
                initial_block_size, ..
            } => initial_block_size,
            Cadence::ExhaustionDriven {
                initial_block_size, ..
            } => initial_block_size,
            Cadence::ReferenceSplit {
                concept_samples, ..
            } => concept_samples,
        }
    }
}

/// Outcome of a policy evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshDecision {
    NoOp,
    MustRefit,
}

/// What the policy sees of the engine.
#[derive(Clone, Copy, Debug, Default)]
pub struct PolicyInput {
    /// Rows available to the next fit (the window, or the reference block).
    pub fit_rows: usize,
    pub model_present: bool,
    /// The forecasting horizon has been fully scored.
    pub horizon_exhausted: bool,
}

/// Cadence plus the running count of rows seen since the last fit started.
#[derive(Clone, Debug)]
pub struct RefreshPolicy {
    cadence: Cadence,
    rows_since_fit: usize,
}

impl RefreshPolicy {
    pub fn new(cadence: Cadence) -> Self {
        Self {
            cadence,
            rows_since_fit: 0,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    pub fn rows_since_fit(&self) -> usize {
        self.rows_since_fit
    }

    /// Count newly accepted rows.
    pub fn observe(&mut self, rows: usize) {
        self.rows_since_fit = self.rows_since_fit.saturating_add(rows);
    }

    /// Restart the periodic counter. Called whenever a fit is started,
    /// regardless of how it ends.
    pub fn fit_started(&mut self) {
        self.rows_since_fit = 0;
    }

    pub fn evaluate(&self, input: PolicyInput) -> RefreshDecision {
        let initial = self.cadence.initial_rows();
        if !input.model_present {
            return if input.fit_rows >= initial {
                RefreshDecision::MustRefit
            } else {
                RefreshDecision::NoOp
            };
        }

        let refit = match self.cadence {
            Cadence::ThresholdThenPeriodic {
                update_interval, ..
            } => self.rows_since_fit >= update_interval,
            Cadence::ExhaustionDriven { .. } => input.horizon_exhausted,
            Cadence::ReferenceSplit { .. } => false,
        };

        if refit {
            RefreshDecision::MustRefit
        } else {
            RefreshDecision::NoOp
        }
    }
}
