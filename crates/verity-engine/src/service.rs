//! Dataset and model validation services
//!
//! Services load a single instance in-process. A validation failure still
//! completes the call with an `invalid` result; only a panic in plugin code
//! or an infrastructure failure ends it in `error`.

use crate::argument::{ArgumentError, DatasetArgument, ModelArgument};
use crate::catalog;
use crate::compute::panic_message;
use crate::engine::{Engine, JobOutcome};
use crate::loader::ModelSpec;
use crate::report::ServiceReport;
use crate::sink::UpdateSink;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinError;
use verity_core::{ErrorRecord, JobKind, JobMessage, ServiceResult, ServiceStatus};
use verity_plugin::Registry;

/// What a valid dataset reports
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub serialized_by: String,
    pub data_format: String,
    /// JSON encoded `[{"name", "datatype"}]` in column order
    pub columns: String,
}

/// What a valid model reports
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    /// `None` in API mode
    pub serialized_by: Option<String>,
    pub model_format: String,
}

/// Resolve, set up and validate a dataset
pub fn inspect_dataset(registry: &Registry, path: &Path) -> Result<DatasetSummary, ErrorRecord> {
    let mut resolved = registry
        .resolve_data(path)
        .map_err(|e| catalog::data_failure(&format!("Unable to load dataset: {}", e)))?;
    resolved
        .instance
        .setup()
        .map_err(|e| catalog::data_failure(&format!("Unable to set up dataset: {}", e)))?;
    resolved
        .instance
        .validate()
        .map_err(|e| catalog::data_failure(&format!("Dataset failed validation: {}", e)))?;

    let labels = resolved.instance.labels();
    if labels.is_empty() {
        return Err(catalog::data_failure("Dataset is empty"));
    }
    let columns: Vec<Value> = labels
        .iter()
        .map(|(name, datatype)| json!({"name": name, "datatype": datatype}))
        .collect();

    Ok(DatasetSummary {
        serialized_by: resolved.serializer_id,
        data_format: resolved.instance.format().to_string(),
        columns: Value::Array(columns).to_string(),
    })
}

/// Resolve and set up a model. The instance is cleaned up before returning.
pub fn inspect_model(registry: &Registry, spec: &ModelSpec) -> Result<ModelSummary, ErrorRecord> {
    let mut resolved = registry
        .resolve_model(spec.request())
        .map_err(|e| catalog::model_failure(&format!("Unable to load model: {}", e)))?;
    resolved
        .instance
        .setup()
        .map_err(|e| catalog::model_failure(&format!("Unable to set up model: {}", e)))?;

    Ok(ModelSummary {
        serialized_by: resolved.serializer_id,
        model_format: resolved.instance.format().to_string(),
    })
}

fn join_failure(error: JoinError) -> ErrorRecord {
    if error.is_panic() {
        catalog::plugin_panic(&format!(
            "Plugin panicked: {}",
            panic_message(error.into_panic())
        ))
    } else {
        catalog::sandbox_failure(&error.to_string())
    }
}

impl Engine {
    fn reject_service(&self, error: ArgumentError) -> JobOutcome {
        let Some(job_id) = error.job_id else {
            return JobOutcome::Dropped {
                reason: error.message,
            };
        };
        let mut report = ServiceReport::start(self.recorder(&job_id));
        report.recorder.record(catalog::invalid_argument(&error.message));
        JobOutcome::completed(job_id, report.finish(ServiceStatus::Error, ServiceResult::None))
    }

    async fn start_service(
        &self,
        kind: JobKind,
        job_id: &str,
        sink: &dyn UpdateSink,
    ) -> ServiceReport {
        let mut report = ServiceReport::start(self.recorder(job_id));
        report.recorder.info(&format!("Service {} received", kind));
        report.status = ServiceStatus::Running;
        sink.send_update(kind, job_id, &report.response().into())
            .await;
        report
    }

    pub(crate) async fn validate_dataset(
        &self,
        message: &JobMessage,
        sink: &dyn UpdateSink,
    ) -> JobOutcome {
        let argument =
            match DatasetArgument::parse(&message.payload, &self.schemas().validate_dataset) {
                Ok(argument) => argument,
                Err(e) => return self.reject_service(e),
            };
        let job_id = argument.service_id;
        let mut report = self.start_service(message.kind, &job_id, sink).await;

        let registry = Arc::clone(self.registry());
        let path = PathBuf::from(argument.file_path);
        let inspected =
            tokio::task::spawn_blocking(move || inspect_dataset(&registry, &path)).await;

        let response = match inspected {
            Ok(Ok(summary)) => {
                report.serialized_by = Some(summary.serialized_by);
                report.data_format = Some(summary.data_format);
                report.columns = Some(summary.columns);
                report.finish(ServiceStatus::Done, ServiceResult::Valid)
            }
            Ok(Err(record)) => {
                report.recorder.record(record);
                report.finish(ServiceStatus::Done, ServiceResult::Invalid)
            }
            Err(e) => {
                report.recorder.record(join_failure(e));
                report.finish(ServiceStatus::Error, ServiceResult::None)
            }
        };
        JobOutcome::completed(job_id, response)
    }

    pub(crate) async fn validate_model(
        &self,
        message: &JobMessage,
        sink: &dyn UpdateSink,
    ) -> JobOutcome {
        let argument = match ModelArgument::parse(&message.payload, &self.schemas().validate_model)
        {
            Ok(argument) => argument,
            Err(e) => return self.reject_service(e),
        };
        let spec = argument.model_spec();
        let job_id = argument.service_id;
        let mut report = self.start_service(message.kind, &job_id, sink).await;

        let registry = Arc::clone(self.registry());
        let inspected = tokio::task::spawn_blocking(move || inspect_model(&registry, &spec)).await;

        let response = match inspected {
            Ok(Ok(summary)) => {
                report.serialized_by = summary.serialized_by;
                report.model_format = Some(summary.model_format);
                report.finish(ServiceStatus::Done, ServiceResult::Valid)
            }
            Ok(Err(record)) => {
                report.recorder.record(record);
                report.finish(ServiceStatus::Done, ServiceResult::Invalid)
            }
            Err(e) => {
                report.recorder.record(join_failure(e));
                report.finish(ServiceStatus::Error, ServiceResult::None)
            }
        };
        JobOutcome::completed(job_id, response)
    }
}
