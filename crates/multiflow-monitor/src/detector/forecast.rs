//! Quantile-forecast bounds.
//!
//! Each column is treated as its own series (`item_id` = column name). A fit
//! estimates a linear level and slope over the window (indexed by row
//! sequence) and the empirical lower/upper quantiles of the residuals. The
//! forecast interval for step `h` of the horizon is the projected mean plus
//! those residual quantiles, widened with `sqrt(h)`. Scoring then widens the
//! interval once more by the configured expansion factors.

use tracing::debug;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::row::{column_name, Row};
use crate::verdict::{ScorePayload, SeriesBound, Verdict};
use crate::window::TimeIndex;

use super::{
    column, quantile, training_arity, DetectorStrategy, ModelState, ScoreTarget, StrategyKind,
};

/// Widen raw quantile bounds: `lower * (1 - down)`, `upper * (1 + up)`.
pub fn expand_bounds(lower: f64, upper: f64, down: f64, up: f64) -> (f64, f64) {
    (lower - lower * down, upper + upper * up)
}

/// Forecasting strategy, scored one horizon at a time.
#[derive(Clone, Debug)]
pub struct ForecastBounds {
    prediction_length: usize,
    lower_quantile: f64,
    upper_quantile: f64,
    expansion_down: f64,
    expansion_up: f64,
    time_index: TimeIndex,
}

impl ForecastBounds {
    pub fn new(prediction_length: usize, time_index: TimeIndex) -> Self {
        Self {
            prediction_length: prediction_length.max(1),
            lower_quantile: 0.1,
            upper_quantile: 0.9,
            expansion_down: 0.05,
            expansion_up: 0.05,
            time_index,
        }
    }

    pub fn from_config(config: &MonitorConfig, time_index: TimeIndex) -> Self {
        Self::new(config.prediction_length, time_index)
            .with_quantiles(config.lower_quantile, config.upper_quantile)
            .with_expansion(config.expansion_factor_down, config.expansion_factor_up)
    }

    pub fn with_quantiles(mut self, lower: f64, upper: f64) -> Self {
        self.lower_quantile = lower;
        self.upper_quantile = upper;
        self
    }

    pub fn with_expansion(mut self, down: f64, up: f64) -> Self {
        self.expansion_down = down;
        self.expansion_up = up;
        self
    }

    pub fn prediction_length(&self) -> usize {
        self.prediction_length
    }

    pub fn time_index(&self) -> TimeIndex {
        self.time_index
    }
}

/// Fitted trend and residual spread of one column.
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesModel {
    pub item_id: String,
    pub intercept: f64,
    pub slope: f64,
    pub residual_low: f64,
    pub residual_high: f64,
}

impl SeriesModel {
    /// `(mean, lower, upper)` for the row at `seq`, `step` rows past the fit.
    pub fn interval(&self, seq: u64, step: usize) -> (f64, f64, f64) {
        let mean = self.intercept + self.slope * seq as f64;
        let spread = (step as f64).sqrt();
        (
            mean,
            mean + self.residual_low * spread,
            mean + self.residual_high * spread,
        )
    }
}

#[derive(Clone, Debug)]
pub struct ForecastModel {
    series: Vec<SeriesModel>,
    last_seq: u64,
    horizon: usize,
}

impl ForecastModel {
    pub fn series(&self) -> &[SeriesModel] {
        &self.series
    }

    /// Sequence number of the last training row; the horizon starts after it.
    /// Rows past the horizon are extrapolated with a wider interval.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }
}

fn fit_series(
    kind: StrategyKind,
    item_id: String,
    xs: &[f64],
    ys: &[f64],
    lower_q: f64,
    upper_q: f64,
) -> MonitorResult<SeriesModel> {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let sxy: f64 = xs.iter().zip(ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;

    let residuals: Vec<f64> = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| y - (intercept + slope * x))
        .collect();

    let model = SeriesModel {
        item_id,
        intercept,
        slope,
        residual_low: quantile(&residuals, lower_q),
        residual_high: quantile(&residuals, upper_q),
    };
    let finite = [model.intercept, model.slope, model.residual_low, model.residual_high]
        .iter()
        .all(|v| v.is_finite());
    if !finite {
        return Err(MonitorError::fit(
            kind,
            format!("series {} produced a non-finite forecast", model.item_id),
        ));
    }
    Ok(model)
}

impl DetectorStrategy for ForecastBounds {
    type Model = ForecastModel;

    fn kind(&self) -> StrategyKind {
        StrategyKind::ForecastBounds
    }

    fn fit(&self, rows: &[Row]) -> MonitorResult<ForecastModel> {
        let arity = training_arity(self.kind(), rows, 2)?;
        let xs: Vec<f64> = rows.iter().map(|r| r.seq() as f64).collect();

        let series = (0..arity)
            .map(|c| {
                fit_series(
                    self.kind(),
                    column_name(c),
                    &xs,
                    &column(rows, c),
                    self.lower_quantile,
                    self.upper_quantile,
                )
            })
            .collect::<MonitorResult<Vec<_>>>()?;

        Ok(ForecastModel {
            series,
            last_seq: rows.iter().map(Row::seq).max().unwrap_or_default(),
            horizon: self.prediction_length,
        })
    }

    fn score(
        &self,
        state: &ModelState<ForecastModel>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>> {
        let rows = target.rows();
        state.check_schema(rows)?;
        let model = state.model();

        rows.iter()
            .map(|row| {
                let step = row.seq().checked_sub(model.last_seq).unwrap_or(0) as usize;
                if step == 0 {
                    return Err(MonitorError::Score(format!(
                        "row {} precedes the forecast (last fit row {})",
                        row.seq(),
                        model.last_seq
                    )));
                }
                if step > model.horizon {
                    debug!(
                        seq = row.seq(),
                        step,
                        horizon = model.horizon,
                        "extrapolating past the forecast horizon"
                    );
                }

                let series: Vec<SeriesBound> = model
                    .series
                    .iter()
                    .zip(row.values())
                    .map(|(s, &real)| {
                        let (mean, lower, upper) = s.interval(row.seq(), step);
                        let (lower, upper) =
                            expand_bounds(lower, upper, self.expansion_down, self.expansion_up);
                        SeriesBound {
                            item_id: s.item_id.clone(),
                            real_value: real,
                            predicted_mean: mean,
                            lower_bound: lower,
                            upper_bound: upper,
                            is_anomalous: real < lower || real > upper,
                        }
                    })
                    .collect();

                let is_anomalous = series.iter().any(|s| s.is_anomalous);
                Ok(Verdict::for_row(
                    self.kind(),
                    is_anomalous,
                    ScorePayload::Forecast { series },
                    row.clone(),
                    self.time_index.at(row.seq()),
                ))
            })
            .collect()
    }
}
