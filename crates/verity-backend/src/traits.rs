//! Backend trait definitions

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use verity_core::{JobKind, JobResponse};

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur during backend operations
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Storage error
    #[error("storage error: {0}")]
    Storage(String),

    /// Retrieval error
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Pool error
    #[error("connection pool error: {0}")]
    Pool(String),
}

impl From<verity_core::Error> for BackendError {
    fn from(err: verity_core::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

/// Hash key receiving the updates of a job
pub fn update_key(kind: JobKind, job_id: &str) -> String {
    format!("{}{}", kind.update_prefix(), job_id)
}

/// Storage for job updates
#[async_trait]
pub trait Backend: Send + Sync + Clone + 'static {
    /// Check if connected
    async fn is_connected(&self) -> bool;

    /// Replace a hash with exactly these fields
    async fn store_hash(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()>;

    /// Read a whole hash, `None` if it does not exist
    async fn get_hash(&self, key: &str) -> BackendResult<Option<HashMap<String, String>>>;

    /// Delete a key
    async fn delete(&self, key: &str) -> BackendResult<bool>;

    /// Store an update of a job
    async fn store_update(
        &self,
        kind: JobKind,
        job_id: &str,
        response: &JobResponse,
    ) -> BackendResult<()> {
        let fields = response.to_fields()?;
        self.store_hash(&update_key(kind, job_id), &fields).await
    }

    /// Latest stored update of a job
    async fn get_update(
        &self,
        kind: JobKind,
        job_id: &str,
    ) -> BackendResult<Option<HashMap<String, String>>> {
        self.get_hash(&update_key(kind, job_id)).await
    }
}
