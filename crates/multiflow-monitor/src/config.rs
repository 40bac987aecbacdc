//! Monitor configuration.
//!
//! Every knob is a flat scalar with a default, so a configuration can be
//! assembled from files, environment variables and command-line flags
//! without nesting.

use serde::{Deserialize, Serialize};

use crate::detector::StrategyKind;
use crate::error::{MonitorError, MonitorResult};
use crate::refresh::Cadence;
use crate::row::SchemaPolicy;

/// Where refits run once a model is in service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefitMode {
    /// On the ingestion path, blocking the next row until done.
    Inline,
    /// On a blocking worker; the previous model keeps scoring meanwhile.
    #[default]
    Background,
}

/// Which rows the dynamic IQR thresholds are computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqrHistory {
    /// Every row accepted so far.
    #[default]
    Unbounded,
    /// Only the bounded window.
    Windowed,
}

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Name of this monitor instance, reported in the startup log
    pub instance_name: String,
    /// Identity of the stream being consumed (informational)
    pub stream_topic: String,
    pub detector: StrategyKind,

    // Window and cadence
    pub window_capacity: usize,
    pub initial_block_size: usize,
    pub initial_training_batch: usize,
    pub update_interval: usize,
    pub prediction_length: usize,
    pub refit_mode: RefitMode,

    // Forecast bounds
    pub expansion_factor_down: f64,
    pub expansion_factor_up: f64,
    pub lower_quantile: f64,
    pub upper_quantile: f64,

    // Isolation ensemble
    pub contamination: f64,
    pub n_estimators: usize,
    pub random_seed: u64,

    // Kernel boundary
    pub nu: f64,

    // Dynamic IQR
    pub iqr_multiplier: f64,
    pub iqr_history: IqrHistory,

    // Distribution drift
    pub concept_samples: usize,
    pub batch_size: usize,
    pub drift_threshold: f64,
    pub kernel_bandwidth: f64,

    /// Unset means the detector's default (truncate for drift, strict otherwise)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_policy: Option<SchemaPolicy>,
    /// Unset means the detector's default (1 for drift); 0 means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_columns: Option<usize>,

    // Sinks
    pub archive_batch: usize,
    pub archive_dir: String,
    pub output_file_name: String,
    pub collection_name: String,
    /// Empty disables the HTTP metrics sink
    pub influxdb_url: String,
    pub influxdb_token: String,
    pub influxdb_org: String,
    pub influxdb_bucket: String,
    pub dispatch_queue: usize,

    pub progress_log_interval: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            instance_name: "InstanceName".to_string(),
            stream_topic: "phd_kafka".to_string(),
            detector: StrategyKind::IsolationEnsemble,
            window_capacity: 500,
            initial_block_size: 100,
            initial_training_batch: 250,
            update_interval: 25,
            prediction_length: 50,
            refit_mode: RefitMode::default(),
            expansion_factor_down: 0.05,
            expansion_factor_up: 0.05,
            lower_quantile: 0.1,
            upper_quantile: 0.9,
            contamination: 0.1,
            n_estimators: 100,
            random_seed: 42,
            nu: 0.05,
            iqr_multiplier: 1.5,
            iqr_history: IqrHistory::default(),
            concept_samples: 100,
            batch_size: 10,
            drift_threshold: 0.8,
            kernel_bandwidth: 1.0,
            schema_policy: None,
            max_columns: None,
            archive_batch: 100,
            archive_dir: ".".to_string(),
            output_file_name: "Received-Events".to_string(),
            collection_name: "outlier_detection".to_string(),
            influxdb_url: String::new(),
            influxdb_token: String::new(),
            influxdb_org: "multiflow".to_string(),
            influxdb_bucket: "faust_app".to_string(),
            dispatch_queue: 1024,
            progress_log_interval: 50,
        }
    }
}

impl MonitorConfig {
    /// Defaults with the given detector selected.
    pub fn for_detector(detector: StrategyKind) -> Self {
        Self {
            detector,
            ..Self::default()
        }
    }

    /// Schema policy in effect for the selected detector.
    pub fn effective_schema_policy(&self) -> SchemaPolicy {
        self.schema_policy.unwrap_or(match self.detector {
            StrategyKind::DistributionDrift => SchemaPolicy::Truncate,
            _ => SchemaPolicy::Strict,
        })
    }

    /// Column limit in effect for the selected detector; `None` is unlimited.
    pub fn effective_max_columns(&self) -> Option<usize> {
        let max = self.max_columns.unwrap_or(match self.detector {
            StrategyKind::DistributionDrift => 1,
            _ => 0,
        });
        (max > 0).then_some(max)
    }

    /// Refresh cadence of the selected detector.
    pub fn cadence(&self) -> Cadence {
        match self.detector {
            StrategyKind::ForecastBounds => Cadence::ExhaustionDriven {
                initial_block_size: self.initial_training_batch,
                prediction_length: self.prediction_length,
            },
            StrategyKind::IsolationEnsemble
            | StrategyKind::KernelBoundary
            | StrategyKind::DynamicIqr => Cadence::ThresholdThenPeriodic {
                initial_block_size: self.initial_block_size,
                update_interval: self.update_interval,
            },
            StrategyKind::DistributionDrift => Cadence::ReferenceSplit {
                concept_samples: self.concept_samples,
                batch_size: self.batch_size,
            },
        }
    }

    pub fn validate(&self) -> MonitorResult<()> {
        let positive = [
            ("window_capacity", self.window_capacity),
            ("initial_block_size", self.initial_block_size),
            ("initial_training_batch", self.initial_training_batch),
            ("update_interval", self.update_interval),
            ("prediction_length", self.prediction_length),
            ("n_estimators", self.n_estimators),
            ("concept_samples", self.concept_samples),
            ("archive_batch", self.archive_batch),
            ("dispatch_queue", self.dispatch_queue),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(MonitorError::invalid_config(name, "must be greater than zero"));
            }
        }
        if self.batch_size < 2 {
            return Err(MonitorError::invalid_config("batch_size", "must be at least 2"));
        }

        let unit = |name: &str, v: f64| {
            if v > 0.0 && v < 1.0 {
                Ok(())
            } else {
                Err(MonitorError::invalid_config(name, format!("{} is outside (0, 1)", v)))
            }
        };
        unit("lower_quantile", self.lower_quantile)?;
        unit("upper_quantile", self.upper_quantile)?;
        if self.lower_quantile >= self.upper_quantile {
            return Err(MonitorError::invalid_config(
                "lower_quantile",
                "must be below upper_quantile",
            ));
        }

        for (name, v) in [
            ("expansion_factor_down", self.expansion_factor_down),
            ("expansion_factor_up", self.expansion_factor_up),
            ("iqr_multiplier", self.iqr_multiplier),
            ("drift_threshold", self.drift_threshold),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(MonitorError::invalid_config(name, "must be a non-negative number"));
            }
        }

        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(MonitorError::invalid_config("contamination", "must be in (0, 0.5]"));
        }
        if !(self.nu > 0.0 && self.nu <= 1.0) {
            return Err(MonitorError::invalid_config("nu", "must be in (0, 1]"));
        }
        if !(self.kernel_bandwidth.is_finite() && self.kernel_bandwidth > 0.0) {
            return Err(MonitorError::invalid_config("kernel_bandwidth", "must be positive"));
        }
        if self.output_file_name.trim().is_empty() {
            return Err(MonitorError::invalid_config("output_file_name", "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = MonitorConfig::default();
        assert_eq!(config.window_capacity, 500);
        assert_eq!(config.initial_block_size, 100);
        assert_eq!(config.update_interval, 25);
        assert_eq!(config.influxdb_bucket, "faust_app");
        assert_eq!(config.detector, StrategyKind::IsolationEnsemble);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_detector_dependent_defaults() {
        let drift = MonitorConfig::for_detector(StrategyKind::DistributionDrift);
        assert_eq!(drift.effective_schema_policy(), SchemaPolicy::Truncate);
        assert_eq!(drift.effective_max_columns(), Some(1));

        let iqr = MonitorConfig::for_detector(StrategyKind::DynamicIqr);
        assert_eq!(iqr.effective_schema_policy(), SchemaPolicy::Strict);
        assert_eq!(iqr.effective_max_columns(), None);

        let unlimited = MonitorConfig {
            max_columns: Some(0),
            ..drift
        };
        assert_eq!(unlimited.effective_max_columns(), None);
    }

    #[test]
    fn test_cadence_per_detector() {
        let forecast = MonitorConfig::for_detector(StrategyKind::ForecastBounds);
        assert_eq!(
            forecast.cadence(),
            Cadence::ExhaustionDriven {
                initial_block_size: 250,
                prediction_length: 50
            }
        );
        let drift = MonitorConfig::for_detector(StrategyKind::DistributionDrift);
        assert_eq!(drift.cadence().initial_rows(), 100);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            MonitorConfig {
                window_capacity: 0,
                ..Default::default()
            },
            MonitorConfig {
                lower_quantile: 0.9,
                upper_quantile: 0.1,
                ..Default::default()
            },
            MonitorConfig {
                expansion_factor_up: -0.1,
                ..Default::default()
            },
            MonitorConfig {
                contamination: 0.7,
                ..Default::default()
            },
            MonitorConfig {
                nu: 0.0,
                ..Default::default()
            },
            MonitorConfig {
                batch_size: 1,
                ..Default::default()
            },
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MonitorConfig =
            serde_json::from_str(r#"{"detector": "drift", "batch_size": 20}"#).unwrap();
        assert_eq!(config.detector, StrategyKind::DistributionDrift);
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.concept_samples, 100);
    }
}
