//! Engine error types

use thiserror::Error;
use verity_plugin::RegistryError;

/// Result type for engine setup operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while building or driving the engine.
///
/// Failures of a single job never surface as `EngineError`; they become
/// error records inside that job's result.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Validation schema missing or invalid
    #[error("schema error: {0}")]
    Schema(String),

    /// Compute process could not be started
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// Registry error
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
