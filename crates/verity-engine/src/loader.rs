//! Data, model and ground truth instance loading

use crate::catalog;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use verity_core::ErrorRecord;
use verity_plugin::{ModelRequest, Registry, ResolvedData, ResolvedModel};

/// How the model is provided
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ModelSpec {
    Upload { path: PathBuf },
    Api { schema: Value, config: Value },
}

impl ModelSpec {
    pub fn request(&self) -> ModelRequest<'_> {
        match self {
            ModelSpec::Upload { path } => ModelRequest::Upload(path),
            ModelSpec::Api { schema, config } => ModelRequest::Api {
                schema: schema.clone(),
                config: config.clone(),
            },
        }
    }
}

/// Ground truth dataset and the column holding the labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthSpec {
    pub path: PathBuf,
    pub field: String,
}

/// Everything needed to build the instances of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub data: PathBuf,
    pub model: ModelSpec,
    #[serde(default)]
    pub ground_truth: Option<GroundTruthSpec>,
}

/// Instance being loaded when a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceRole {
    Data,
    Model,
    GroundTruth,
}

impl std::fmt::Display for InstanceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceRole::Data => write!(f, "data"),
            InstanceRole::Model => write!(f, "model"),
            InstanceRole::GroundTruth => write!(f, "ground truth"),
        }
    }
}

/// First instance that could not be resolved or set up
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Unable to load {role} instance: {reason}")]
pub struct LoadError {
    pub role: InstanceRole,
    pub reason: String,
}

impl LoadError {
    fn new(role: InstanceRole, reason: impl ToString) -> Self {
        Self {
            role,
            reason: reason.to_string(),
        }
    }

    pub fn record(&self) -> ErrorRecord {
        let description = self.to_string();
        match self.role {
            InstanceRole::Data => catalog::data_failure(&description),
            InstanceRole::Model => catalog::model_failure(&description),
            InstanceRole::GroundTruth => catalog::ground_truth_failure(&description),
        }
    }
}

/// Loaded and set up instances. The model is cleaned up when this is dropped.
pub struct LoadedInstances {
    pub data: ResolvedData,
    pub model: ResolvedModel,
    pub ground_truth: Option<ResolvedData>,
    pub ground_truth_field: Option<String>,
}

/// Resolve and set up the data, model and ground truth instances in that
/// order. With ground truth, the labels are kept in the ground truth
/// instance and stripped from the data instance.
pub fn load_instances(
    registry: &Registry,
    request: &LoadRequest,
) -> Result<LoadedInstances, LoadError> {
    let mut data = registry
        .resolve_data(&request.data)
        .map_err(|e| LoadError::new(InstanceRole::Data, e))?;
    data.instance
        .setup()
        .map_err(|e| LoadError::new(InstanceRole::Data, e))?;

    let mut model = registry
        .resolve_model(request.model.request())
        .map_err(|e| LoadError::new(InstanceRole::Model, e))?;
    model
        .instance
        .setup()
        .map_err(|e| LoadError::new(InstanceRole::Model, e))?;

    let Some(spec) = &request.ground_truth else {
        return Ok(LoadedInstances {
            data,
            model,
            ground_truth: None,
            ground_truth_field: None,
        });
    };

    let mut truth = registry
        .resolve_data(&spec.path)
        .map_err(|e| LoadError::new(InstanceRole::GroundTruth, e))?;
    truth
        .instance
        .setup()
        .map_err(|e| LoadError::new(InstanceRole::GroundTruth, e))?;

    if !truth.instance.keep_ground_truth(&spec.field) {
        return Err(LoadError::new(
            InstanceRole::GroundTruth,
            format!("ground truth field \"{}\" not found", spec.field),
        ));
    }
    data.instance.remove_ground_truth(&spec.field);

    Ok(LoadedInstances {
        data,
        model,
        ground_truth: Some(truth),
        ground_truth_field: Some(spec.field.clone()),
    })
}
