//! Multiflow daemon library
//!
//! This module provides the pieces behind `multiflowd`:
//! - Layered configuration (defaults, file, environment)
//! - Line-oriented event source
//! - Monitor wiring and lifecycle management

pub mod config;
pub mod error;
pub mod server;
pub mod source;

pub use config::{DaemonConfig, InputFormat, LoggingConfig, SourceConfig};
pub use error::{DaemonError, DaemonResult};
pub use server::Server;
