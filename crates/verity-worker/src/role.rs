//! Worker roles

use verity_broker::StreamEntry;
use verity_core::{BrokerConfig, JobMessage};

/// Which stream a worker consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerRole {
    /// Algorithm tasks, cancellable, listens on the control channels
    Task,
    /// Dataset and model validation services
    Service,
}

impl WorkerRole {
    pub fn stream<'a>(&self, config: &'a BrokerConfig) -> &'a str {
        match self {
            WorkerRole::Task => &config.task_stream,
            WorkerRole::Service => &config.service_stream,
        }
    }

    /// Interpret a delivered entry as a job of this role
    pub fn job_message(&self, entry: &StreamEntry) -> verity_core::Result<JobMessage> {
        match self {
            WorkerRole::Task => JobMessage::from_task_fields(&entry.id, &entry.fields),
            WorkerRole::Service => JobMessage::from_service_fields(&entry.id, &entry.fields),
        }
    }

    pub fn subscribes_to_control(&self) -> bool {
        matches!(self, WorkerRole::Task)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Task => "task",
            WorkerRole::Service => "service",
        }
    }
}

impl std::fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
