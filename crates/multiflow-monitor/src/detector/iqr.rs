//! Dynamic interquartile-range thresholds.
//!
//! Per column: `lower = Q1 - k * IQR`, `upper = Q3 + k * IQR` (`k` = 1.5 by
//! default). Thresholds are recomputed wholesale on every refit. A row is an
//! outlier when any column falls outside its bounds; the first violating
//! column in declared order is the one reported.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::MonitorResult;
use crate::row::{column_name, Row};
use crate::verdict::{ScorePayload, Verdict, Violation};

use super::{
    column, quantile_sorted, training_arity, DetectorStrategy, ModelState, ScoreTarget,
    StrategyKind,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnThreshold {
    pub column: String,
    pub lower: f64,
    pub upper: f64,
}

impl ColumnThreshold {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

#[derive(Clone, Debug)]
pub struct DynamicIqr {
    multiplier: f64,
}

impl Default for DynamicIqr {
    fn default() -> Self {
        Self { multiplier: 1.5 }
    }
}

impl DynamicIqr {
    pub fn new(multiplier: f64) -> Self {
        Self { multiplier }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.iqr_multiplier)
    }
}

/// Thresholds in declared column order.
#[derive(Clone, Debug, PartialEq)]
pub struct IqrModel {
    thresholds: Vec<ColumnThreshold>,
}

impl IqrModel {
    pub fn new(thresholds: Vec<ColumnThreshold>) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &[ColumnThreshold] {
        &self.thresholds
    }

    /// First column outside its bounds, if any.
    pub fn first_violation(&self, values: &[f64]) -> Option<Violation> {
        self.thresholds
            .iter()
            .zip(values)
            .find(|(t, v)| !t.contains(**v))
            .map(|(t, v)| Violation {
                column: t.column.clone(),
                value: *v,
                lower: t.lower,
                upper: t.upper,
            })
    }
}

impl DetectorStrategy for DynamicIqr {
    type Model = IqrModel;

    fn kind(&self) -> StrategyKind {
        StrategyKind::DynamicIqr
    }

    fn fit(&self, rows: &[Row]) -> MonitorResult<IqrModel> {
        let arity = training_arity(self.kind(), rows, 1)?;
        let thresholds = (0..arity)
            .map(|c| {
                let mut values = column(rows, c);
                values.sort_by(|a, b| a.total_cmp(b));
                let q1 = quantile_sorted(&values, 0.25);
                let q3 = quantile_sorted(&values, 0.75);
                let iqr = q3 - q1;
                ColumnThreshold {
                    column: column_name(c),
                    lower: q1 - self.multiplier * iqr,
                    upper: q3 + self.multiplier * iqr,
                }
            })
            .collect();
        Ok(IqrModel { thresholds })
    }

    fn score(
        &self,
        state: &ModelState<IqrModel>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>> {
        let rows = target.rows();
        state.check_schema(rows)?;
        let now = Utc::now();

        Ok(rows
            .iter()
            .map(|row| {
                let violation = state.model().first_violation(row.values());
                Verdict::for_row(
                    self.kind(),
                    violation.is_some(),
                    ScorePayload::Thresholds { violation },
                    row.clone(),
                    now,
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::{rows, state};

    #[test]
    fn thresholds_from_quartiles() {
        let data = rows(&[&[1.0], &[2.0], &[3.0], &[4.0], &[5.0]]);
        let model = DynamicIqr::default().fit(&data).unwrap();
        let t = &model.thresholds()[0];
        // Q1 = 2, Q3 = 4, IQR = 2
        assert_eq!(t.column, "col1");
        assert!((t.lower - -1.0).abs() < 1e-12);
        assert!((t.upper - 7.0).abs() < 1e-12);
    }

    #[test]
    fn first_violating_column_wins() {
        let model = IqrModel::new(
            ["col1", "col2", "col3"]
                .iter()
                .map(|c| ColumnThreshold {
                    column: c.to_string(),
                    lower: 0.0,
                    upper: 10.0,
                })
                .collect(),
        );
        let violation = model.first_violation(&[-5.0, 5.0, 50.0]).unwrap();
        assert_eq!(violation.column, "col1");
        assert_eq!(violation.value, -5.0);

        let violation = model.first_violation(&[5.0, 5.0, 50.0]).unwrap();
        assert_eq!(violation.column, "col3");
        assert!(model.first_violation(&[0.0, 10.0, 5.0]).is_none());
    }

    #[test]
    fn scoring_reports_outliers() {
        let data = rows(&[&[1.0, 10.0], &[2.0, 11.0], &[3.0, 12.0], &[4.0, 13.0]]);
        let detector = DynamicIqr::default();
        let st = state(detector.fit(&data).unwrap(), StrategyKind::DynamicIqr, 2);

        let verdicts = detector
            .score(&st, ScoreTarget::Row(&Row::new(9, vec![2.5, 100.0])))
            .unwrap();
        assert!(verdicts[0].is_anomalous);
        match &verdicts[0].payload {
            ScorePayload::Thresholds {
                violation: Some(v),
            } => assert_eq!(v.column, "col2"),
            other => panic!("unexpected payload {:?}", other),
        }
    }
}
