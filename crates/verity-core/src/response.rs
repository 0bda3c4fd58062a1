//! Result updates written back for the orchestrator

use crate::status::{ServiceResult, ServiceStatus, TaskStatus};
use serde::Serialize;

/// Progress update or final result of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub status: TaskStatus,
    /// Whole seconds since the task started
    pub elapsed_time: u64,
    /// ISO-8601
    pub start_time: String,
    /// JSON encoded algorithm output, empty when there is none
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_messages: Option<String>,
    pub log_file: String,
    pub task_progress: u8,
}

/// Progress update or final result of a validation service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub status: ServiceStatus,
    pub validation_result: ServiceResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serialized_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_format: Option<String>,
    /// JSON encoded `[{"name", "datatype"}]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_messages: Option<String>,
    pub log_file: String,
}

/// Any update the worker can publish
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobResponse {
    Task(TaskResponse),
    Service(ServiceResponse),
}

impl JobResponse {
    /// Flatten into hash fields. Strings are stored as-is, everything else
    /// in its JSON text form.
    pub fn to_fields(&self) -> crate::Result<Vec<(String, String)>> {
        let value = serde_json::to_value(self)?;
        let serde_json::Value::Object(map) = value else {
            return Err(crate::Error::Serialization(
                "response is not a JSON object".to_string(),
            ));
        };
        Ok(map
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect())
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            JobResponse::Task(r) => r.status.is_terminal(),
            JobResponse::Service(r) => {
                matches!(r.status, ServiceStatus::Done | ServiceStatus::Error)
            }
        }
    }
}

impl From<TaskResponse> for JobResponse {
    fn from(response: TaskResponse) -> Self {
        JobResponse::Task(response)
    }
}

impl From<ServiceResponse> for JobResponse {
    fn from(response: ServiceResponse) -> Self {
        JobResponse::Service(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task_response(status: TaskStatus) -> TaskResponse {
        TaskResponse {
            response_type: "TaskResponse",
            status,
            elapsed_time: 3,
            start_time: "2024-01-01T00:00:00+00:00".to_string(),
            output: r#"{"score":1}"#.to_string(),
            error_messages: None,
            log_file: "/tmp/t1.log".to_string(),
            task_progress: 100,
        }
    }

    #[test]
    fn test_task_fields() {
        let fields: HashMap<String, String> = JobResponse::from(task_response(TaskStatus::Success))
            .to_fields()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(fields["type"], "TaskResponse");
        assert_eq!(fields["status"], "Success");
        assert_eq!(fields["elapsedTime"], "3");
        assert_eq!(fields["taskProgress"], "100");
        assert_eq!(fields["output"], r#"{"score":1}"#);
        assert!(!fields.contains_key("errorMessages"));
    }

    #[test]
    fn test_service_fields() {
        let response = ServiceResponse {
            response_type: "ServiceResponse",
            status: ServiceStatus::Done,
            validation_result: ServiceResult::Valid,
            serialized_by: Some("json".into()),
            data_format: Some("tabular".into()),
            model_format: None,
            columns: Some("[]".into()),
            error_messages: None,
            log_file: "/tmp/s.log".into(),
        };
        let fields: HashMap<String, String> =
            JobResponse::from(response).to_fields().unwrap().into_iter().collect();
        assert_eq!(fields["status"], "done");
        assert_eq!(fields["validationResult"], "valid");
        assert_eq!(fields["dataFormat"], "tabular");
        assert!(!fields.contains_key("modelFormat"));
    }

    #[test]
    fn test_terminal() {
        assert!(!JobResponse::from(task_response(TaskStatus::Running)).is_terminal());
        assert!(JobResponse::from(task_response(TaskStatus::Cancelled)).is_terminal());
    }
}
