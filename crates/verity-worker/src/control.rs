//! Control channel handling
//!
//! Control messages arrive on the broker's delivery task, concurrently with
//! the job loop. Every payload is a bare identifier:
//! - cancel: the id of a running task
//! - install, update, delete: an algorithm id

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};
use verity_broker::BroadcastHandler;
use verity_core::{is_empty_string, ChannelConfig};
use verity_engine::CancelHandle;
use verity_plugin::{PluginKind, Registry};

/// The job currently owned by this worker
#[derive(Debug, Clone)]
pub struct RunningJob {
    pub job_id: String,
    cancel: CancelHandle,
}

/// Result of a cancel request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    /// Another job is running, it is left alone
    DifferentJob(String),
    Idle,
    EmptyId,
}

/// Shared slot holding the running job, at most one at a time
#[derive(Debug, Clone, Default)]
pub struct RunningSlot {
    inner: Arc<Mutex<Option<RunningJob>>>,
}

impl RunningSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningJob>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, job_id: impl Into<String>, cancel: CancelHandle) {
        *self.lock() = Some(RunningJob {
            job_id: job_id.into(),
            cancel,
        });
    }

    pub fn clear(&self) {
        self.lock().take();
    }

    pub fn current(&self) -> Option<String> {
        self.lock().as_ref().map(|job| job.job_id.clone())
    }

    /// Signal cancellation if `job_id` is the running job
    pub fn cancel(&self, job_id: &str) -> CancelOutcome {
        if is_empty_string(job_id) {
            return CancelOutcome::EmptyId;
        }
        match self.lock().as_ref() {
            Some(job) if job.job_id == job_id => {
                job.cancel.cancel();
                CancelOutcome::Cancelled
            }
            Some(job) => CancelOutcome::DifferentJob(job.job_id.clone()),
            None => CancelOutcome::Idle,
        }
    }
}

/// Reacts to cancel and algorithm lifecycle messages
pub struct ControlHandler {
    slot: RunningSlot,
    registry: Arc<Registry>,
    channels: ChannelConfig,
}

impl ControlHandler {
    pub fn new(slot: RunningSlot, registry: Arc<Registry>, channels: ChannelConfig) -> Self {
        Self {
            slot,
            registry,
            channels,
        }
    }

    /// Channels this handler should be subscribed to
    pub fn channels(&self) -> [&str; 4] {
        [
            &self.channels.cancel,
            &self.channels.algo_install,
            &self.channels.algo_update,
            &self.channels.algo_delete,
        ]
    }

    pub fn on_cancel(&self, job_id: &str) -> CancelOutcome {
        info!(job_id = %job_id, "Received request to cancel task");
        let outcome = self.slot.cancel(job_id);
        match &outcome {
            CancelOutcome::Cancelled => info!(job_id = %job_id, "Task cancellation signalled"),
            CancelOutcome::DifferentJob(running) => warn!(
                job_id = %job_id,
                running = %running,
                "Task not stopped: Running different item"
            ),
            CancelOutcome::Idle => warn!(job_id = %job_id, "Task not stopped: No running task"),
            CancelOutcome::EmptyId => error!("Task not stopped: Empty task id"),
        }
        outcome
    }

    /// Install an algorithm that is not registered yet
    pub async fn on_install(&self, algorithm_id: &str) -> bool {
        info!(algorithm_id = %algorithm_id, "Received request to install algorithm");
        if is_empty_string(algorithm_id) {
            error!("Algorithm not installed: Empty algorithm id");
            return false;
        }
        if self.registry.exists(PluginKind::Algorithm, algorithm_id) {
            error!(algorithm_id = %algorithm_id, "Algorithm not installed: already exists");
            return false;
        }

        match self.registry.install_algorithm(algorithm_id).await {
            Ok(true) => {
                info!(algorithm_id = %algorithm_id, "Algorithm installed");
                true
            }
            Ok(false) => {
                error!(algorithm_id = %algorithm_id, "Algorithm not installed: not found in algorithm registry");
                false
            }
            Err(e) => {
                error!(algorithm_id = %algorithm_id, error = %e, "Algorithm not installed");
                false
            }
        }
    }

    /// Replace a registered algorithm with its currently installed version
    pub async fn on_update(&self, algorithm_id: &str) -> bool {
        info!(algorithm_id = %algorithm_id, "Received request to update algorithm");
        if is_empty_string(algorithm_id) {
            error!("Algorithm not updated: Empty algorithm id");
            return false;
        }
        if !self.registry.exists(PluginKind::Algorithm, algorithm_id) {
            error!(algorithm_id = %algorithm_id, "Algorithm not updated: does not exist");
            return false;
        }

        match self.registry.reinstall_algorithm(algorithm_id).await {
            Ok(true) => {
                info!(algorithm_id = %algorithm_id, "Algorithm updated");
                true
            }
            Ok(false) => {
                error!(algorithm_id = %algorithm_id, "Algorithm not updated: not found in algorithm registry");
                false
            }
            Err(e) => {
                error!(algorithm_id = %algorithm_id, error = %e, "Algorithm not updated");
                false
            }
        }
    }

    pub fn on_delete(&self, algorithm_id: &str) -> bool {
        info!(algorithm_id = %algorithm_id, "Received request to delete algorithm");
        if is_empty_string(algorithm_id) {
            error!("Algorithm not deleted: Empty algorithm id");
            return false;
        }
        if self.registry.remove(PluginKind::Algorithm, algorithm_id) {
            info!(algorithm_id = %algorithm_id, "Algorithm deleted");
            true
        } else {
            error!(algorithm_id = %algorithm_id, "Algorithm not deleted: does not exist");
            false
        }
    }
}

#[async_trait]
impl BroadcastHandler for ControlHandler {
    async fn on_message(&self, channel: &str, payload: String) {
        let id = payload.trim();
        if channel == self.channels.cancel {
            self.on_cancel(id);
        } else if channel == self.channels.algo_install {
            self.on_install(id).await;
        } else if channel == self.channels.algo_update {
            self.on_update(id).await;
        } else if channel == self.channels.algo_delete {
            self.on_delete(id);
        } else {
            debug!(channel = %channel, "Ignoring message on unknown channel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_engine::cancel_pair;
    use verity_plugin::{
        Algorithm, AlgorithmContext, AlgorithmFactory, Capability, OutputValue, PluginMetadata,
        PluginResult, StaticDirectory,
    };

    struct Noop;

    impl Algorithm for Noop {
        fn generate(&mut self) -> PluginResult<OutputValue> {
            Ok(OutputValue::map([("done", OutputValue::Bool(true))]))
        }
    }

    struct NoopFactory;

    impl AlgorithmFactory for NoopFactory {
        fn create(&self, _context: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>> {
            Ok(Box::new(Noop))
        }
    }

    fn handler(registry: Registry) -> (ControlHandler, RunningSlot) {
        let slot = RunningSlot::new();
        let handler = ControlHandler::new(slot.clone(), Arc::new(registry), ChannelConfig::default());
        (handler, slot)
    }

    #[tokio::test]
    async fn test_cancel_only_matching_job() {
        let (handler, slot) = handler(Registry::with_core_plugins());
        assert_eq!(handler.on_cancel("t1"), CancelOutcome::Idle);

        let (cancel, signal) = cancel_pair();
        slot.set("t1", cancel);
        assert_eq!(
            handler.on_cancel("t2"),
            CancelOutcome::DifferentJob("t1".to_string())
        );
        assert!(!signal.is_requested());
        assert_eq!(handler.on_cancel("  "), CancelOutcome::EmptyId);

        handler
            .on_message(&ChannelConfig::default().cancel, " t1\n".to_string())
            .await;
        assert!(signal.is_requested());

        slot.clear();
        assert_eq!(slot.current(), None);
    }

    #[tokio::test]
    async fn test_algorithm_lifecycle() {
        let registry = Registry::with_core_plugins();
        assert!(registry.register(
            "algoX",
            Capability::Algorithm(Arc::new(NoopFactory)),
            PluginMetadata::named("algoX"),
        ));
        let (handler, _) = handler(registry);

        // already registered, nothing to install from
        assert!(!handler.on_install("algoX").await);
        assert!(!handler.on_install("").await);
        assert!(!handler.on_update("missing").await);

        assert!(handler.on_delete("algoX"));
        assert!(!handler.on_delete("algoX"));
        assert!(!handler.registry.exists(PluginKind::Algorithm, "algoX"));
    }

    #[tokio::test]
    async fn test_install_without_directory_entry() {
        let registry = Registry::with_core_plugins()
            .with_directory(Arc::new(StaticDirectory::new()));
        let (handler, _) = handler(registry);
        assert!(!handler.on_install("unknown").await);
    }
}
