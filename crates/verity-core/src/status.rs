//! Job status and result enums

use serde::{Deserialize, Serialize};

/// Lifecycle of an algorithm task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    Error,
    Cancelled,
}

impl TaskStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "Pending"),
            TaskStatus::Running => write!(f, "Running"),
            TaskStatus::Success => write!(f, "Success"),
            TaskStatus::Error => write!(f, "Error"),
            TaskStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Lifecycle of a validation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Init,
    Running,
    Done,
    Error,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceStatus::Init => write!(f, "init"),
            ServiceStatus::Running => write!(f, "running"),
            ServiceStatus::Done => write!(f, "done"),
            ServiceStatus::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a validation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceResult {
    Valid,
    Invalid,
    #[default]
    None,
}

/// How the model under test is served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMode {
    /// Model artifact uploaded to the local filesystem
    Upload,
    /// Model reachable through an API described by a schema and config
    Api,
}

/// Kind of prediction the model makes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Classification,
    Regression,
}
