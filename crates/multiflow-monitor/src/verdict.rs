//! Scoring results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detector::StrategyKind;
use crate::row::Row;

/// Label used for a positive verdict in tags and archives.
pub const LABEL_YES: &str = "yes";
/// Label used for a negative verdict.
pub const LABEL_NO: &str = "no";

/// The row, or batch of rows, a verdict is about.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "rows", rename_all = "snake_case")]
pub enum Subject {
    Row(Row),
    Batch(Vec<Row>),
}

impl Subject {
    pub fn rows(&self) -> &[Row] {
        match self {
            Subject::Row(row) => std::slice::from_ref(row),
            Subject::Batch(rows) => rows,
        }
    }
}

/// Forecast comparison for one series (one column) of one row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesBound {
    pub item_id: String,
    pub real_value: f64,
    pub predicted_mean: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub is_anomalous: bool,
}

/// First column found outside its IQR thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub column: String,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Numeric evidence behind a verdict, shaped by the strategy that scored it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScorePayload {
    Forecast { series: Vec<SeriesBound> },
    /// `score` is the raw ensemble score; `decision` is shifted so that
    /// negative means anomalous.
    Isolation { score: f64, decision: f64 },
    Boundary { decision: f64 },
    Thresholds { violation: Option<Violation> },
    Distance { distance: f64, threshold: f64 },
}

impl ScorePayload {
    /// Numeric fields derived from scoring, appended to the row's own columns
    /// in metrics points and archive records. The names depend only on the
    /// strategy and the column count.
    pub fn derived_fields(&self) -> Vec<(String, f64)> {
        match self {
            ScorePayload::Forecast { series } => series
                .iter()
                .flat_map(|s| {
                    [
                        (format!("{}_predicted_mean", s.item_id), s.predicted_mean),
                        (format!("{}_lower_bound", s.item_id), s.lower_bound),
                        (format!("{}_upper_bound", s.item_id), s.upper_bound),
                    ]
                })
                .collect(),
            ScorePayload::Isolation { score, decision } => vec![
                ("score".to_string(), *score),
                ("decision".to_string(), *decision),
            ],
            ScorePayload::Boundary { decision } => vec![("decision".to_string(), *decision)],
            // same shape with or without a violation; NaN when none
            ScorePayload::Thresholds { violation } => {
                let (lower, upper) = violation
                    .as_ref()
                    .map_or((f64::NAN, f64::NAN), |v| (v.lower, v.upper));
                vec![
                    ("violation_lower".to_string(), lower),
                    ("violation_upper".to_string(), upper),
                ]
            }
            ScorePayload::Distance {
                distance,
                threshold,
            } => vec![
                ("distance".to_string(), *distance),
                ("threshold".to_string(), *threshold),
            ],
        }
    }
}

/// The anomaly or drift decision for one row or one batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub kind: StrategyKind,
    pub is_anomalous: bool,
    pub payload: ScorePayload,
    pub subject: Subject,
    pub timestamp: DateTime<Utc>,
}

impl Verdict {
    pub fn for_row(
        kind: StrategyKind,
        is_anomalous: bool,
        payload: ScorePayload,
        row: Row,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            is_anomalous,
            payload,
            subject: Subject::Row(row),
            timestamp,
        }
    }

    /// A single verdict covering a whole batch.
    pub fn for_batch(
        kind: StrategyKind,
        is_anomalous: bool,
        payload: ScorePayload,
        rows: Vec<Row>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            is_anomalous,
            payload,
            subject: Subject::Batch(rows),
            timestamp,
        }
    }

    pub fn rows(&self) -> &[Row] {
        self.subject.rows()
    }

    pub fn tag_name(&self) -> &'static str {
        self.kind.tag_name()
    }

    pub fn label(&self) -> &'static str {
        if self.is_anomalous {
            LABEL_YES
        } else {
            LABEL_NO
        }
    }
}
