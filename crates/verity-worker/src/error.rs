//! Worker errors
//!
//! Job-level failures never surface here, they end up in the job's update.
//! Everything in this enum stops the worker process.

use thiserror::Error;
use verity_backend::BackendError;
use verity_broker::BrokerError;
use verity_engine::EngineError;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("pool error: {0}")]
    Pool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stopped by a signal after an orderly teardown
    #[error("interrupted")]
    Interrupted,
}

impl From<verity_core::Error> for WorkerError {
    fn from(err: verity_core::Error) -> Self {
        WorkerError::Config(err.to_string())
    }
}
