use serde::Serialize;
use thiserror::Error;

use crate::detector::StrategyKind;

/// Errors raised while ingesting, fitting, scoring, or dispatching.
///
/// None of these are fatal to the stream: the engine converts each one into a
/// log line plus a counter increment at the point where it occurs.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("parse error: {reason} (input: {input:?})")]
    Parse { input: String, reason: String },

    #[error("schema mismatch: expected {expected} columns, got {got}")]
    SchemaMismatch { expected: usize, got: usize },

    #[error("fit failed for {strategy}: {reason}")]
    Fit { strategy: StrategyKind, reason: String },

    #[error("score failed: {0}")]
    Score(String),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("invalid configuration: {name} - {reason}")]
    InvalidConfig { name: String, reason: String },
}

/// Coarse error category, used as a counter key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Parse,
    SchemaMismatch,
    Fit,
    Score,
    Sink,
    InvalidConfig,
}

impl MonitorError {
    /// Build a fit error for the given strategy.
    pub fn fit(strategy: StrategyKind, reason: impl Into<String>) -> Self {
        MonitorError::Fit {
            strategy,
            reason: reason.into(),
        }
    }

    /// Build a configuration error.
    pub fn invalid_config(name: impl Into<String>, reason: impl Into<String>) -> Self {
        MonitorError::InvalidConfig {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MonitorError::Parse { .. } => ErrorKind::Parse,
            MonitorError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            MonitorError::Fit { .. } => ErrorKind::Fit,
            MonitorError::Score(_) => ErrorKind::Score,
            MonitorError::Sink(_) => ErrorKind::Sink,
            MonitorError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::Sink(e.to_string())
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(e: reqwest::Error) -> Self {
        MonitorError::Sink(e.to_string())
    }
}

impl From<csv::Error> for MonitorError {
    fn from(e: csv::Error) -> Self {
        MonitorError::Sink(e.to_string())
    }
}

/// Convenience type alias for monitor results.
pub type MonitorResult<T> = Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = MonitorError::SchemaMismatch {
            expected: 3,
            got: 2,
        };
        assert_eq!(e.to_string(), "schema mismatch: expected 3 columns, got 2");

        let e = MonitorError::Parse {
            input: "1,x".into(),
            reason: "field 2 is not numeric".into(),
        };
        assert!(e.to_string().contains("field 2"));
        assert!(e.to_string().contains("1,x"));

        let e = MonitorError::fit(StrategyKind::DynamicIqr, "no rows");
        assert!(e.to_string().contains("dynamic_iqr"));
        assert!(e.to_string().contains("no rows"));
    }

    #[test]
    fn kinds_match_variants() {
        assert_eq!(MonitorError::Score("x".into()).kind(), ErrorKind::Score);
        assert_eq!(MonitorError::Sink("x".into()).kind(), ErrorKind::Sink);
        assert_eq!(
            MonitorError::invalid_config("batch_size", "must be positive").kind(),
            ErrorKind::InvalidConfig
        );
    }

    #[test]
    fn io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        let err: MonitorError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::Sink);
        assert!(err.to_string().contains("read-only fs"));
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MonitorError>();
    }
}
