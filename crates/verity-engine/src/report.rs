//! Result metadata of a job in progress

use crate::recorder::JobRecorder;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::time::Instant;
use verity_core::{ServiceResponse, ServiceResult, ServiceStatus, TaskResponse, TaskStatus};

pub const TASK_RESPONSE_TYPE: &str = "TaskResponse";
pub const SERVICE_RESPONSE_TYPE: &str = "ServiceResponse";

/// Mutable state of one task, discarded after the final update
pub struct TaskReport {
    pub status: TaskStatus,
    pub progress: u8,
    pub output: Option<Value>,
    pub recorder: JobRecorder,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl TaskReport {
    pub fn start(recorder: JobRecorder) -> Self {
        Self {
            status: TaskStatus::Pending,
            progress: 0,
            output: None,
            recorder,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn response(&self) -> TaskResponse {
        let error_messages = if self.status == TaskStatus::Error {
            self.recorder.error_messages()
        } else {
            None
        };
        TaskResponse {
            response_type: TASK_RESPONSE_TYPE,
            status: self.status,
            elapsed_time: self.started.elapsed().as_secs(),
            start_time: self.started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            output: self
                .output
                .as_ref()
                .map(Value::to_string)
                .unwrap_or_default(),
            error_messages,
            log_file: self.recorder.log_file(),
            task_progress: self.progress,
        }
    }

    /// Enter a terminal state and build the final update
    pub fn finish(mut self, status: TaskStatus) -> TaskResponse {
        self.status = status;
        self.progress = 100;
        self.recorder.info(&format!("Task finished with status {}", status));
        let response = self.response();
        if let Err(e) = self.recorder.flush() {
            self.recorder
                .warn(&format!("Unable to write error records: {}", e));
        }
        response
    }
}

/// Mutable state of one validation service
pub struct ServiceReport {
    pub status: ServiceStatus,
    pub result: ServiceResult,
    pub serialized_by: Option<String>,
    pub data_format: Option<String>,
    pub model_format: Option<String>,
    pub columns: Option<String>,
    pub recorder: JobRecorder,
}

impl ServiceReport {
    pub fn start(recorder: JobRecorder) -> Self {
        Self {
            status: ServiceStatus::Init,
            result: ServiceResult::None,
            serialized_by: None,
            data_format: None,
            model_format: None,
            columns: None,
            recorder,
        }
    }

    pub fn response(&self) -> ServiceResponse {
        ServiceResponse {
            response_type: SERVICE_RESPONSE_TYPE,
            status: self.status,
            validation_result: self.result,
            serialized_by: self.serialized_by.clone(),
            data_format: self.data_format.clone(),
            model_format: self.model_format.clone(),
            columns: self.columns.clone(),
            error_messages: self.recorder.error_messages(),
            log_file: self.recorder.log_file(),
        }
    }

    pub fn finish(mut self, status: ServiceStatus, result: ServiceResult) -> ServiceResponse {
        self.status = status;
        self.result = result;
        self.recorder.info(&format!(
            "Service finished with status {}, result {:?}",
            status, result
        ));
        let response = self.response();
        if let Err(e) = self.recorder.flush() {
            self.recorder
                .warn(&format!("Unable to write error records: {}", e));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use serde_json::json;

    #[test]
    fn test_task_final_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = TaskReport::start(JobRecorder::open("t1", dir.path(), dir.path()));
        report.status = TaskStatus::Running;
        report.progress = 30;
        assert_eq!(report.response().output, "");

        report.output = Some(json!({"accuracy": 0.9}));
        let response = report.finish(TaskStatus::Success);

        assert_eq!(response.response_type, "TaskResponse");
        assert_eq!(response.task_progress, 100);
        assert!(response.error_messages.is_none());
        let output: Value = serde_json::from_str(&response.output).unwrap();
        assert_eq!(output["accuracy"], 0.9);
        assert!(response.start_time.ends_with('Z'));
    }

    #[test]
    fn test_error_messages_only_on_error() {
        let dir = tempfile::tempdir().unwrap();

        let mut report = TaskReport::start(JobRecorder::open("t2", dir.path(), dir.path()));
        report.recorder.record(catalog::cancelled());
        assert!(report.finish(TaskStatus::Cancelled).error_messages.is_none());

        let mut report = TaskReport::start(JobRecorder::open("t3", dir.path(), dir.path()));
        report.recorder.record(catalog::no_results());
        let messages = report.finish(TaskStatus::Error).error_messages.unwrap();
        assert!(messages.contains("WTSTx00003"));
    }

    #[test]
    fn test_service_response() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = ServiceReport::start(JobRecorder::open("s1", dir.path(), dir.path()));
        assert_eq!(report.response().status, ServiceStatus::Init);

        report.serialized_by = Some("json".to_string());
        report.data_format = Some("tabular".to_string());
        let response = report.finish(ServiceStatus::Done, ServiceResult::Valid);
        assert_eq!(response.response_type, "ServiceResponse");
        assert_eq!(response.validation_result, ServiceResult::Valid);
        assert!(response.error_messages.is_none());
        assert!(response.model_format.is_none());
    }
}
