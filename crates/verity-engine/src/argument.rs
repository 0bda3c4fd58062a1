//! Typed job arguments
//!
//! A payload is checked in two passes:
//! - structural validation against the job kind's JSON schema
//! - semantic validation of the fields that drive execution
//!
//! Every failure message ends with `;` and messages are concatenated.

use crate::loader::{GroundTruthSpec, LoadRequest, ModelSpec};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use verity_core::{is_empty_string, JsonSchema, ModelMode, ModelType};
use verity_plugin::{PluginDescriptor, Registry};

/// Payload that could not be turned into an argument
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentError {
    /// Job id, if it could still be read from the payload
    pub job_id: Option<String>,
    pub message: String,
}

impl ArgumentError {
    fn new(job_id: Option<String>, messages: &[String]) -> Self {
        Self {
            job_id,
            message: join_messages(messages),
        }
    }
}

impl std::fmt::Display for ArgumentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

fn join_messages(messages: &[String]) -> String {
    messages.iter().map(|m| format!("{};", m)).collect()
}

/// Parse a payload, check it against `schema` and deserialize it
fn parse_payload<T: DeserializeOwned>(
    payload: &str,
    schema: &JsonSchema,
    id_field: &str,
) -> Result<T, ArgumentError> {
    let value: Value = serde_json::from_str(payload).map_err(|e| {
        ArgumentError::new(None, &[format!("Payload is not valid JSON: {}", e)])
    })?;

    let job_id = value
        .get(id_field)
        .and_then(Value::as_str)
        .filter(|id| !is_empty_string(id))
        .map(str::to_string);

    schema
        .validate(&value)
        .map_err(|m| ArgumentError::new(job_id.clone(), &[m]))?;

    serde_json::from_value(value)
        .map_err(|e| ArgumentError::new(job_id, &[format!("Invalid arguments: {}", e)]))
}

fn file_exists(path: &str) -> bool {
    !is_empty_string(path) && Path::new(path).exists()
}

fn optional_text(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !is_empty_string(s))
}

/// Arguments of a test task
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArgument {
    pub id: String,
    pub test_dataset: String,
    pub algorithm_id: String,
    pub algorithm_args: Value,
    pub mode: ModelMode,
    #[serde(default)]
    pub api_schema: Option<Value>,
    #[serde(default)]
    pub api_config: Option<Value>,
    #[serde(default)]
    pub model_file: Option<String>,
    #[serde(default)]
    pub model_type: Option<ModelType>,
    #[serde(default)]
    pub ground_truth_dataset: Option<String>,
    #[serde(default)]
    pub ground_truth: Option<String>,
}

/// A task argument that passed every check
#[derive(Debug, Clone)]
pub struct ValidatedTask {
    pub argument: TaskArgument,
    pub algorithm: Arc<PluginDescriptor>,
}

impl TaskArgument {
    /// Structural validation
    pub fn parse(payload: &str, schema: &JsonSchema) -> Result<Self, ArgumentError> {
        parse_payload(payload, schema, "id")
    }

    /// Checks that do not need the registry
    fn local_errors(&self) -> Vec<String> {
        let mut messages = Vec::new();

        if !file_exists(&self.test_dataset) {
            messages.push(format!("Test dataset not found: {}", self.test_dataset));
        }

        match self.mode {
            ModelMode::Upload => match optional_text(&self.model_file) {
                None => messages.push("Model file is required in upload mode".to_string()),
                Some(path) if !Path::new(path).exists() => {
                    messages.push(format!("Model file not found: {}", path))
                }
                Some(_) => {}
            },
            ModelMode::Api => {
                if !self.api_schema.as_ref().is_some_and(Value::is_object) {
                    messages.push("API schema must be a JSON object".to_string());
                }
                if !self.api_config.as_ref().is_some_and(Value::is_object) {
                    messages.push("API config must be a JSON object".to_string());
                }
            }
        }

        messages
    }

    /// Semantic validation, resolving the algorithm through the registry
    pub async fn validate(self, registry: &Registry) -> Result<ValidatedTask, ArgumentError> {
        let mut messages = self.local_errors();

        let algorithm = match registry.resolve_algorithm(&self.algorithm_id).await {
            Ok(descriptor) => Some(descriptor),
            Err(e) if e.is_infrastructure() => {
                messages.push(format!(
                    "Unable to look up algorithm {}: {}",
                    self.algorithm_id, e
                ));
                None
            }
            Err(_) => {
                messages.push("Algorithm ID is not found".to_string());
                None
            }
        };

        if let Some(descriptor) = &algorithm {
            let metadata = &descriptor.metadata;
            if let Err(m) = metadata.input_schema.validate(&self.algorithm_args) {
                messages.push(format!("Invalid algorithm arguments: {}", m));
            }
            if metadata.requires_ground_truth {
                match optional_text(&self.ground_truth_dataset) {
                    None => messages.push("Ground truth dataset is required".to_string()),
                    Some(path) if !Path::new(path).exists() => {
                        messages.push(format!("Ground truth dataset not found: {}", path))
                    }
                    Some(_) => {}
                }
                if optional_text(&self.ground_truth).is_none() {
                    messages.push("Ground truth field is required".to_string());
                }
            }
        }

        match algorithm {
            Some(algorithm) if messages.is_empty() => Ok(ValidatedTask {
                argument: self,
                algorithm,
            }),
            _ => Err(ArgumentError::new(Some(self.id), &messages)),
        }
    }

    pub fn model_spec(&self) -> ModelSpec {
        match self.mode {
            ModelMode::Upload => ModelSpec::Upload {
                path: PathBuf::from(self.model_file.clone().unwrap_or_default()),
            },
            ModelMode::Api => ModelSpec::Api {
                schema: self.api_schema.clone().unwrap_or(Value::Null),
                config: self.api_config.clone().unwrap_or(Value::Null),
            },
        }
    }
}

impl ValidatedTask {
    /// Instances to load. Ground truth is only included when the algorithm
    /// requires it.
    pub fn load_request(&self) -> LoadRequest {
        let ground_truth = if self.algorithm.metadata.requires_ground_truth {
            match (
                optional_text(&self.argument.ground_truth_dataset),
                optional_text(&self.argument.ground_truth),
            ) {
                (Some(path), Some(field)) => Some(GroundTruthSpec {
                    path: PathBuf::from(path),
                    field: field.to_string(),
                }),
                _ => None,
            }
        } else {
            None
        };

        LoadRequest {
            data: PathBuf::from(&self.argument.test_dataset),
            model: self.argument.model_spec(),
            ground_truth,
        }
    }
}

/// Arguments of a dataset validation service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetArgument {
    pub service_id: String,
    pub file_path: String,
}

impl DatasetArgument {
    pub fn parse(payload: &str, schema: &JsonSchema) -> Result<Self, ArgumentError> {
        let argument: Self = parse_payload(payload, schema, "serviceId")?;
        if !file_exists(&argument.file_path) {
            let message = format!("File not found: {}", argument.file_path);
            return Err(ArgumentError::new(Some(argument.service_id), &[message]));
        }
        Ok(argument)
    }
}

/// Arguments of a model validation service
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArgument {
    pub service_id: String,
    pub file_path: String,
    pub mode: ModelMode,
    #[serde(default)]
    pub api_schema: Option<Value>,
    #[serde(default)]
    pub api_config: Option<Value>,
}

impl ModelArgument {
    pub fn parse(payload: &str, schema: &JsonSchema) -> Result<Self, ArgumentError> {
        let argument: Self = parse_payload(payload, schema, "serviceId")?;

        let mut messages = Vec::new();
        match argument.mode {
            ModelMode::Upload => {
                if !file_exists(&argument.file_path) {
                    messages.push(format!("File not found: {}", argument.file_path));
                }
            }
            ModelMode::Api => {
                if !argument.api_schema.as_ref().is_some_and(Value::is_object) {
                    messages.push("API schema must be a JSON object".to_string());
                }
                if !argument.api_config.as_ref().is_some_and(Value::is_object) {
                    messages.push("API config must be a JSON object".to_string());
                }
            }
        }

        if messages.is_empty() {
            Ok(argument)
        } else {
            Err(ArgumentError::new(Some(argument.service_id), &messages))
        }
    }

    pub fn model_spec(&self) -> ModelSpec {
        match self.mode {
            ModelMode::Upload => ModelSpec::Upload {
                path: PathBuf::from(&self.file_path),
            },
            ModelMode::Api => ModelSpec::Api {
                schema: self.api_schema.clone().unwrap_or(Value::Null),
                config: self.api_config.clone().unwrap_or(Value::Null),
            },
        }
    }
}
