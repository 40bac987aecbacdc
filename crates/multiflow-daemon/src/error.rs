//! Daemon error types

use multiflow_monitor::MonitorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// The event source failed or produced undecodable input
    #[error("Source error: {0}")]
    Source(String),
}

impl From<config::ConfigError> for DaemonError {
    fn from(e: config::ConfigError) -> Self {
        DaemonError::Config(e.to_string())
    }
}

pub type DaemonResult<T> = Result<T, DaemonError>;
