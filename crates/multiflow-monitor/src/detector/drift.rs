//! Two-sample distribution drift.
//!
//! The model is the reference block itself. A live batch is compared
//! against it with the unbiased squared maximum mean discrepancy under a
//! Gaussian kernel of bandwidth `sigma`:
//!
//! ```text
//! MMD² = mean k(x, x') + mean k(y, y') - 2 mean k(x, y)     (x ≠ x', y ≠ y')
//! ```
//!
//! Drift is declared when `|MMD²| > threshold`. Scoring is batch-only.

use chrono::Utc;

use crate::config::MonitorConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::row::Row;
use crate::verdict::{ScorePayload, Verdict};

use super::{
    squared_distance, training_arity, DetectorStrategy, ModelState, ScoreTarget, StrategyKind,
};

#[derive(Clone, Debug)]
pub struct DistributionDrift {
    threshold: f64,
    bandwidth: f64,
}

impl Default for DistributionDrift {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            bandwidth: 1.0,
        }
    }
}

impl DistributionDrift {
    pub fn new(threshold: f64, bandwidth: f64) -> Self {
        Self {
            threshold,
            bandwidth,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.drift_threshold, config.kernel_bandwidth)
    }
}

#[derive(Debug)]
pub struct DriftModel {
    reference: Vec<Vec<f64>>,
    /// Mean off-diagonal kernel value within the reference block.
    reference_term: f64,
    bandwidth: f64,
}

impl DriftModel {
    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        (-squared_distance(a, b) / (2.0 * self.bandwidth * self.bandwidth)).exp()
    }

    fn within(&self, sample: &[&[f64]]) -> f64 {
        let n = sample.len();
        let mut total = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                total += self.kernel(sample[i], sample[j]);
            }
        }
        2.0 * total / (n * (n - 1)) as f64
    }

    /// Unbiased MMD² between the reference block and `batch` (at least two rows).
    pub fn distance(&self, batch: &[&[f64]]) -> f64 {
        let cross: f64 = self
            .reference
            .iter()
            .flat_map(|x| batch.iter().map(move |y| (x, y)))
            .map(|(x, y)| self.kernel(x, y))
            .sum::<f64>()
            / (self.reference.len() * batch.len()) as f64;
        self.reference_term + self.within(batch) - 2.0 * cross
    }

    pub fn reference_len(&self) -> usize {
        self.reference.len()
    }
}

impl DetectorStrategy for DistributionDrift {
    type Model = DriftModel;

    fn kind(&self) -> StrategyKind {
        StrategyKind::DistributionDrift
    }

    fn fit(&self, rows: &[Row]) -> MonitorResult<DriftModel> {
        training_arity(self.kind(), rows, 2)?;
        if self.bandwidth.is_nan() || self.bandwidth <= 0.0 {
            return Err(MonitorError::fit(self.kind(), "kernel bandwidth must be positive"));
        }

        let mut model = DriftModel {
            reference: rows.iter().map(|r| r.values().to_vec()).collect(),
            reference_term: 0.0,
            bandwidth: self.bandwidth,
        };
        let refs: Vec<&[f64]> = model.reference.iter().map(Vec::as_slice).collect();
        model.reference_term = model.within(&refs);
        Ok(model)
    }

    fn score(
        &self,
        state: &ModelState<DriftModel>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>> {
        let rows = match target {
            ScoreTarget::Batch(rows) => rows,
            ScoreTarget::Row(_) => {
                return Err(MonitorError::Score(
                    "drift is scored per batch, not per row".into(),
                ))
            }
        };
        if rows.len() < 2 {
            return Err(MonitorError::Score(format!(
                "drift batch needs at least 2 rows, got {}",
                rows.len()
            )));
        }
        state.check_schema(rows)?;

        let batch: Vec<&[f64]> = rows.iter().map(Row::values).collect();
        let distance = state.model().distance(&batch);

        Ok(vec![Verdict::for_batch(
            self.kind(),
            distance.abs() > self.threshold,
            ScorePayload::Distance {
                distance,
                threshold: self.threshold,
            },
            rows.to_vec(),
            Utc::now(),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::tests::state;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn uniform(n: u64, shift: f64, rng: &mut StdRng) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new(i, vec![shift + rng.gen_range(-1.0..1.0)]))
            .collect()
    }

    #[test]
    fn identical_samples_have_near_zero_distance() {
        let rows: Vec<Row> = (0..20).map(|i| Row::new(i, vec![(i % 5) as f64])).collect();
        let detector = DistributionDrift::default();
        let model = detector.fit(&rows).unwrap();
        let batch: Vec<&[f64]> = rows.iter().map(Row::values).collect();
        assert!(model.distance(&batch).abs() < 0.1);
    }

    #[test]
    fn shifted_batch_is_drift() {
        let mut rng = StdRng::seed_from_u64(3);
        let detector = DistributionDrift::default();
        let reference = uniform(100, 0.0, &mut rng);
        let st = state(detector.fit(&reference).unwrap(), StrategyKind::DistributionDrift, 1);

        let same = uniform(10, 0.0, &mut rng);
        let verdicts = detector.score(&st, ScoreTarget::Batch(&same)).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert!(!verdicts[0].is_anomalous);

        let shifted = uniform(10, 10.0, &mut rng);
        let verdicts = detector.score(&st, ScoreTarget::Batch(&shifted)).unwrap();
        assert!(verdicts[0].is_anomalous);
        assert_eq!(verdicts[0].rows().len(), 10);
        assert_eq!(verdicts[0].label(), "yes");
    }

    #[test]
    fn single_rows_are_not_scored() {
        let mut rng = StdRng::seed_from_u64(5);
        let detector = DistributionDrift::default();
        let reference = uniform(10, 0.0, &mut rng);
        let st = state(detector.fit(&reference).unwrap(), StrategyKind::DistributionDrift, 1);
        let row = Row::new(0, vec![0.0]);
        assert!(detector.score(&st, ScoreTarget::Row(&row)).is_err());
        assert!(detector
            .score(&st, ScoreTarget::Batch(std::slice::from_ref(&row)))
            .is_err());
    }
}
