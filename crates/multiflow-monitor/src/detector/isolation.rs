//! Bagged isolation trees.
//!
//! Every tree is grown on a random subsample (without replacement) of the
//! training rows, splitting on a random column at a random threshold until
//! points are isolated or the height limit `ceil(log2(sample_size))` is
//! reached. Rows that isolate quickly get short average path lengths.
//!
//! Scores follow the usual convention: `score = -2^(-E[h(x)] / c(n))`, so
//! lower is more anomalous. The decision offset is the `contamination`
//! quantile of the training scores, and `decision = score - offset < 0`
//! flags a row.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::MonitorConfig;
use crate::error::MonitorResult;
use crate::row::Row;
use crate::verdict::{ScorePayload, Verdict};

use super::{quantile, training_arity, DetectorStrategy, ModelState, ScoreTarget, StrategyKind};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Default subsample size per tree.
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Average path length of an unsuccessful search in a binary search tree of
/// `n` points; normalizes tree depths.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Point at fraction `t` of `[lo, hi)`. Interpolates instead of taking
/// `hi - lo`, which overflows for spans wider than `f64::MAX`.
fn split_point(lo: f64, hi: f64, t: f64) -> f64 {
    lo * (1.0 - t) + hi * t
}

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn grow(
        rows: &[Row],
        indices: Vec<usize>,
        depth: usize,
        limit: usize,
        rng: &mut StdRng,
    ) -> Node {
        if depth >= limit || indices.len() <= 1 {
            return Node::Leaf {
                size: indices.len(),
            };
        }

        let arity = rows[indices[0]].arity();
        let spans: Vec<(usize, f64, f64)> = (0..arity)
            .filter_map(|feature| {
                let (lo, hi) = indices.iter().map(|&i| rows[i].values()[feature]).fold(
                    (f64::INFINITY, f64::NEG_INFINITY),
                    |(lo, hi), v| (lo.min(v), hi.max(v)),
                );
                (hi > lo).then_some((feature, lo, hi))
            })
            .collect();

        // all remaining points identical
        if spans.is_empty() {
            return Node::Leaf {
                size: indices.len(),
            };
        }

        let (feature, lo, hi) = spans[rng.gen_range(0..spans.len())];
        let threshold = split_point(lo, hi, rng.gen::<f64>());
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| rows[i].values()[feature] < threshold);

        Node::Split {
            feature,
            threshold,
            left: Box::new(Node::grow(rows, left, depth + 1, limit, rng)),
            right: Box::new(Node::grow(rows, right, depth + 1, limit, rng)),
        }
    }

    fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Isolation-forest strategy.
#[derive(Clone, Debug)]
pub struct IsolationEnsemble {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl Default for IsolationEnsemble {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: 0.1,
            seed: 42,
        }
    }
}

impl IsolationEnsemble {
    pub fn new(n_estimators: usize, contamination: f64, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            contamination,
            seed,
            ..Self::default()
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.n_estimators, config.contamination, config.random_seed)
    }
}

#[derive(Debug)]
pub struct IsolationModel {
    trees: Vec<Node>,
    sample_size: usize,
    offset: f64,
}

impl IsolationModel {
    /// Raw ensemble score; lower is more anomalous, range `[-1, 0)`.
    pub fn score_sample(&self, x: &[f64]) -> f64 {
        let mean_depth =
            self.trees.iter().map(|t| t.path_length(x)).sum::<f64>() / self.trees.len() as f64;
        -(2f64).powf(-mean_depth / average_path_length(self.sample_size))
    }

    /// Score shifted by the contamination offset; negative means anomalous.
    pub fn decision(&self, x: &[f64]) -> f64 {
        self.score_sample(x) - self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl DetectorStrategy for IsolationEnsemble {
    type Model = IsolationModel;

    fn kind(&self) -> StrategyKind {
        StrategyKind::IsolationEnsemble
    }

    fn fit(&self, rows: &[Row]) -> MonitorResult<IsolationModel> {
        training_arity(self.kind(), rows, 2)?;

        let sample_size = self.max_samples.min(rows.len());
        let height_limit = (sample_size as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees = (0..self.n_estimators)
            .map(|_| {
                let indices =
                    rand::seq::index::sample(&mut rng, rows.len(), sample_size).into_vec();
                Node::grow(rows, indices, 0, height_limit, &mut rng)
            })
            .collect();

        let mut model = IsolationModel {
            trees,
            sample_size,
            offset: 0.0,
        };
        let training_scores: Vec<f64> =
            rows.iter().map(|r| model.score_sample(r.values())).collect();
        model.offset = quantile(&training_scores, self.contamination);
        Ok(model)
    }

    fn score(
        &self,
        state: &ModelState<IsolationModel>,
        target: ScoreTarget<'_>,
    ) -> MonitorResult<Vec<Verdict>> {
        let rows = target.rows();
        state.check_schema(rows)?;
        let model = state.model();
        let now = Utc::now();

        Ok(rows
            .iter()
            .map(|row| {
                let score = model.score_sample(row.values());
                let decision = score - model.offset;
                Verdict::for_row(
                    self.kind(),
                    decision < 0.0,
                    ScorePayload::Isolation { score, decision },
                    row.clone(),
                    now,
                )
            })
            .collect())
    }
}
