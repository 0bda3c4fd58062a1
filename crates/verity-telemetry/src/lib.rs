//! Verity Telemetry - logging
//!
//! Installs the process-wide `tracing` subscriber:
//! - Level or env-filter directives
//! - JSON, pretty or compact output
//! - UTC RFC 3339 timestamps
//!
//! Workers log to stdout. Compute children log to stderr, their stdout
//! carries the event protocol.

pub mod logging;

pub use logging::{init_logging, JobLogContext, LogFormat, LogTarget};

use thiserror::Error;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
