//! Job messages delivered from the task and service streams

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stream field carrying a task payload
pub const TASK_FIELD: &str = "task";

/// Stream field carrying a dataset validation payload
pub const VALIDATE_DATASET_FIELD: &str = "validateDataset";

/// Stream field carrying a model validation payload
pub const VALIDATE_MODEL_FIELD: &str = "validateModel";

/// Which kind of work a job message describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Task,
    ValidateDataset,
    ValidateModel,
}

impl JobKind {
    /// Key prefix of the hash receiving this job's updates
    pub fn update_prefix(&self) -> &'static str {
        match self {
            JobKind::Task => "task:",
            JobKind::ValidateDataset | JobKind::ValidateModel => "service:",
        }
    }

    /// Field name used to carry the payload on the stream
    pub fn stream_field(&self) -> &'static str {
        match self {
            JobKind::Task => TASK_FIELD,
            JobKind::ValidateDataset => VALIDATE_DATASET_FIELD,
            JobKind::ValidateModel => VALIDATE_MODEL_FIELD,
        }
    }

    /// Payload field holding the job identifier
    pub fn id_field(&self) -> &'static str {
        match self {
            JobKind::Task => "id",
            JobKind::ValidateDataset | JobKind::ValidateModel => "serviceId",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Task => write!(f, "task"),
            JobKind::ValidateDataset => write!(f, "validate-dataset"),
            JobKind::ValidateModel => write!(f, "validate-model"),
        }
    }
}

/// How a job reached the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    /// Fresh delivery from the stream
    New,
    /// Recovered from this consumer's pending backlog at startup
    Pending,
}

/// A single delivered job
#[derive(Debug, Clone, PartialEq)]
pub struct JobMessage {
    /// Stream entry id, used for acknowledgement
    pub message_id: String,

    /// Raw serialized job description
    pub payload: String,

    pub kind: JobKind,
}

impl JobMessage {
    /// Interpret the fields of a task stream entry
    pub fn from_task_fields(
        message_id: impl Into<String>,
        fields: &HashMap<String, String>,
    ) -> crate::Result<Self> {
        let message_id = message_id.into();
        match fields.get(TASK_FIELD) {
            Some(payload) => Ok(Self {
                message_id,
                payload: payload.clone(),
                kind: JobKind::Task,
            }),
            None => Err(crate::Error::InvalidMessage(format!(
                "entry {} has no '{}' field",
                message_id, TASK_FIELD
            ))),
        }
    }

    /// Interpret the fields of a service stream entry
    pub fn from_service_fields(
        message_id: impl Into<String>,
        fields: &HashMap<String, String>,
    ) -> crate::Result<Self> {
        let message_id = message_id.into();
        for kind in [JobKind::ValidateDataset, JobKind::ValidateModel] {
            if let Some(payload) = fields.get(kind.stream_field()) {
                return Ok(Self {
                    message_id,
                    payload: payload.clone(),
                    kind,
                });
            }
        }
        Err(crate::Error::InvalidMessage(format!(
            "entry {} has neither '{}' nor '{}'",
            message_id, VALIDATE_DATASET_FIELD, VALIDATE_MODEL_FIELD
        )))
    }

    /// Best-effort extraction of the job id without full validation.
    ///
    /// Returns `None` when the payload is not a JSON object or the id is
    /// missing or empty.
    pub fn peek_id(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.payload).ok()?;
        let id = value.get(self.kind.id_field())?.as_str()?;
        if crate::is_empty_string(id) {
            None
        } else {
            Some(id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_task_entry() {
        let message =
            JobMessage::from_task_fields("1-0", &fields(&[("task", r#"{"id":"t1"}"#)])).unwrap();
        assert_eq!(message.kind, JobKind::Task);
        assert_eq!(message.peek_id().as_deref(), Some("t1"));
    }

    #[test]
    fn test_service_entry_kinds() {
        let dataset = JobMessage::from_service_fields(
            "1-0",
            &fields(&[("validateDataset", r#"{"serviceId":"s1"}"#)]),
        )
        .unwrap();
        assert_eq!(dataset.kind, JobKind::ValidateDataset);
        assert_eq!(dataset.peek_id().as_deref(), Some("s1"));

        let model =
            JobMessage::from_service_fields("1-1", &fields(&[("validateModel", "{}")])).unwrap();
        assert_eq!(model.kind, JobKind::ValidateModel);
        assert_eq!(model.peek_id(), None);
    }

    #[test]
    fn test_unknown_entry() {
        let err = JobMessage::from_service_fields("1-0", &fields(&[("other", "x")])).unwrap_err();
        assert!(err.is_payload_error());
        assert!(JobMessage::from_task_fields("1-0", &HashMap::new()).is_err());
    }

    #[test]
    fn test_peek_id_rejects_placeholder_ids() {
        for payload in [r#"{"id":"None"}"#, r#"{"id":"  "}"#, r#"{"id":4}"#, "not json"] {
            let message = JobMessage {
                message_id: "1-0".into(),
                payload: payload.into(),
                kind: JobKind::Task,
            };
            assert_eq!(message.peek_id(), None, "payload {payload}");
        }
    }
}
