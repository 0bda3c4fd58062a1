//! Job dispatch

use crate::cancel::CancelSignal;
use crate::catalog;
use crate::recorder::JobRecorder;
use crate::report::{ServiceReport, TaskReport};
use crate::sandbox::ProcessSandbox;
use crate::schemas::SchemaStore;
use crate::sink::UpdateSink;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use verity_core::{
    JobKind, JobMessage, JobOrigin, JobResponse, ServiceResult, ServiceStatus, TaskStatus,
    VerityConfig,
};
use verity_plugin::Registry;

/// Filesystem locations used while processing jobs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub log_dir: PathBuf,
    pub error_dir: PathBuf,
    /// Plugin tree handed to compute processes
    pub plugin_root: Option<PathBuf>,
}

impl EngineSettings {
    pub fn from_config(config: &VerityConfig) -> Self {
        Self {
            log_dir: config.worker.log_dir.clone(),
            error_dir: config.worker.error_dir.clone(),
            plugin_root: Some(config.plugins.root.clone()),
        }
    }
}

/// How processing a job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Final update to store under the job id
    Completed { job_id: String, response: JobResponse },
    /// No id could be recovered, nothing can be reported
    Dropped { reason: String },
}

impl JobOutcome {
    pub(crate) fn completed(job_id: String, response: impl Into<JobResponse>) -> Self {
        JobOutcome::Completed {
            job_id,
            response: response.into(),
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed { job_id, .. } => Some(job_id),
            JobOutcome::Dropped { .. } => None,
        }
    }
}

/// Runs tasks and validation services against one registry
pub struct Engine {
    registry: Arc<Registry>,
    schemas: SchemaStore,
    sandbox: ProcessSandbox,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(
        registry: Arc<Registry>,
        schemas: SchemaStore,
        sandbox: ProcessSandbox,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            schemas,
            sandbox,
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    pub fn sandbox(&self) -> &ProcessSandbox {
        &self.sandbox
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn recorder(&self, job_id: &str) -> JobRecorder {
        JobRecorder::open(job_id, &self.settings.log_dir, &self.settings.error_dir)
    }

    /// Process one job. Intermediate updates go to `sink`; the final update
    /// is returned for the caller to store before acknowledging.
    pub async fn process(
        &self,
        message: &JobMessage,
        origin: JobOrigin,
        cancel: CancelSignal,
        sink: &dyn UpdateSink,
    ) -> JobOutcome {
        let outcome = match origin {
            JobOrigin::Pending => self.recover(message),
            JobOrigin::New => match message.kind {
                JobKind::Task => self.run_task(message, cancel, sink).await,
                JobKind::ValidateDataset => self.validate_dataset(message, sink).await,
                JobKind::ValidateModel => self.validate_model(message, sink).await,
            },
        };

        if let JobOutcome::Dropped { reason } = &outcome {
            warn!(message_id = %message.message_id, kind = %message.kind, reason = %reason, "Dropping job without id");
        }
        outcome
    }

    /// A job left pending by a previous run is never executed again
    pub fn recover(&self, message: &JobMessage) -> JobOutcome {
        let Some(job_id) = message.peek_id() else {
            return JobOutcome::Dropped {
                reason: "pending entry has no job id".to_string(),
            };
        };

        let mut recorder = self.recorder(&job_id);
        recorder.record(catalog::recovered_from_backlog());
        match message.kind {
            JobKind::Task => {
                JobOutcome::completed(job_id, TaskReport::start(recorder).finish(TaskStatus::Error))
            }
            JobKind::ValidateDataset | JobKind::ValidateModel => JobOutcome::completed(
                job_id,
                ServiceReport::start(recorder).finish(ServiceStatus::Error, ServiceResult::None),
            ),
        }
    }
}
