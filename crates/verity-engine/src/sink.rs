//! Destination of job updates

use async_trait::async_trait;
use tracing::warn;
use verity_backend::Backend;
use verity_core::{JobKind, JobResponse};

/// Receives progress and final updates
#[async_trait]
pub trait UpdateSink: Send + Sync {
    /// Deliver an update. Returns false if it was not stored.
    async fn send_update(&self, kind: JobKind, job_id: &str, response: &JobResponse) -> bool;
}

#[async_trait]
impl<B: Backend> UpdateSink for B {
    async fn send_update(&self, kind: JobKind, job_id: &str, response: &JobResponse) -> bool {
        match self.store_update(kind, job_id, response).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job_id, kind = %kind, error = %e, "Failed to store update");
                false
            }
        }
    }
}
