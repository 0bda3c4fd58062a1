//! Task pipeline
//!
//! - validate the payload and resolve the algorithm
//! - load every instance once in the parent to fail fast
//! - run the algorithm in a compute process, racing it against cancellation
//! - validate the output against the algorithm's output schema

use crate::argument::{ArgumentError, TaskArgument};
use crate::cancel::CancelSignal;
use crate::catalog;
use crate::compute::panic_message;
use crate::engine::{Engine, JobOutcome};
use crate::loader::{load_instances, LoadRequest};
use crate::protocol::{ComputeRequest, ComputeResult};
use crate::report::TaskReport;
use crate::sandbox::SandboxProcess;
use crate::sink::UpdateSink;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use verity_core::{ErrorRecord, JobKind, JobMessage, JsonSchema, TaskStatus};

/// Check algorithm output: a JSON object matching the declared schema
pub fn check_output(value: &Value, schema: &JsonSchema) -> Result<(), String> {
    if !value.is_object() {
        return Err("Algorithm output is not a JSON object".to_string());
    }
    schema
        .validate(value)
        .map_err(|m| format!("Algorithm output does not match its schema: {}", m))
}

fn value_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

impl Engine {
    pub(crate) async fn run_task(
        &self,
        message: &JobMessage,
        mut cancel: CancelSignal,
        sink: &dyn UpdateSink,
    ) -> JobOutcome {
        let argument = match TaskArgument::parse(&message.payload, &self.schemas().task) {
            Ok(argument) => argument,
            Err(e) => return self.reject_task(e),
        };

        let job_id = argument.id.clone();
        let mut report = TaskReport::start(self.recorder(&job_id));
        report.recorder.info(&format!(
            "Task received for algorithm {}",
            argument.algorithm_id
        ));

        report.status = TaskStatus::Running;
        sink.send_update(JobKind::Task, &job_id, &report.response().into())
            .await;

        let validated = match argument.validate(self.registry()).await {
            Ok(validated) => validated,
            Err(e) => {
                report.recorder.record(catalog::invalid_argument(&e.message));
                return JobOutcome::completed(job_id, report.finish(TaskStatus::Error));
            }
        };

        let load = validated.load_request();
        if let Err(record) = self.check_instances(load.clone()).await {
            report.recorder.record(record);
            return JobOutcome::completed(job_id, report.finish(TaskStatus::Error));
        }
        report.recorder.info("Instances loaded");

        let request = ComputeRequest {
            job_id: job_id.clone(),
            algorithm_id: validated.argument.algorithm_id.clone(),
            algorithm_path: validated.algorithm.base_path.clone(),
            plugin_root: self.settings().plugin_root.clone(),
            arguments: validated.argument.algorithm_args.clone(),
            load,
        };
        let output_schema = Arc::clone(&validated.algorithm.metadata.output_schema);

        let status = self
            .execute(&request, &output_schema, &mut report, &mut cancel, sink)
            .await;
        JobOutcome::completed(job_id, report.finish(status))
    }

    fn reject_task(&self, error: ArgumentError) -> JobOutcome {
        let Some(job_id) = error.job_id else {
            return JobOutcome::Dropped {
                reason: error.message,
            };
        };
        let mut report = TaskReport::start(self.recorder(&job_id));
        report.recorder.record(catalog::invalid_argument(&error.message));
        JobOutcome::completed(job_id, report.finish(TaskStatus::Error))
    }

    /// Resolve and set up every instance, then release them
    async fn check_instances(&self, request: LoadRequest) -> Result<(), ErrorRecord> {
        let registry = Arc::clone(self.registry());
        let loaded = tokio::task::spawn_blocking(move || {
            load_instances(&registry, &request).map(drop)
        })
        .await;

        match loaded {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.record()),
            Err(e) if e.is_panic() => Err(catalog::plugin_panic(&format!(
                "Plugin panicked while loading instances: {}",
                panic_message(e.into_panic())
            ))),
            Err(e) => Err(catalog::sandbox_failure(&e.to_string())),
        }
    }

    /// Run the compute process until it exits and decide the final status.
    /// Only a successful, schema conforming result yields Success. Otherwise
    /// an observed cancellation yields Cancelled, anything else Error.
    async fn execute(
        &self,
        request: &ComputeRequest,
        output_schema: &JsonSchema,
        report: &mut TaskReport,
        cancel: &mut CancelSignal,
        sink: &dyn UpdateSink,
    ) -> TaskStatus {
        let process = match self.sandbox().spawn(request).await {
            Ok(process) => process,
            Err(e) => {
                report.recorder.record(catalog::sandbox_failure(&e.to_string()));
                return TaskStatus::Error;
            }
        };
        let SandboxProcess {
            mut child,
            mut progress,
            mut results,
            ..
        } = process;

        let mut cancelled = false;
        let exit = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = cancel.requested(), if !cancelled => {
                    cancelled = true;
                    report.recorder.info("Cancellation requested, terminating compute process");
                    if let Err(e) = child.start_kill() {
                        report.recorder.warn(&format!("Unable to terminate compute process: {}", e));
                    }
                }
                Some(percent) = progress.recv() => {
                    if percent > report.progress {
                        report.progress = percent;
                        sink.send_update(JobKind::Task, &request.job_id, &report.response().into())
                            .await;
                    }
                }
            }
        };

        match exit {
            Ok(status) => debug!(job_id = %request.job_id, status = %status, "Compute process exited"),
            Err(e) => warn!(job_id = %request.job_id, error = %e, "Unable to wait for compute process"),
        }

        let result = tokio::time::timeout(self.sandbox().result_grace(), results.recv())
            .await
            .ok()
            .flatten();

        match result {
            Some(ComputeResult {
                success: true,
                value,
            }) => match check_output(&value, output_schema) {
                Ok(()) => {
                    report.output = Some(value);
                    TaskStatus::Success
                }
                Err(_) if cancelled => self.cancelled(report),
                Err(message) => {
                    report.recorder.record(catalog::output_mismatch(&message));
                    TaskStatus::Error
                }
            },
            Some(_) if cancelled => self.cancelled(report),
            Some(ComputeResult { value, .. }) => {
                report
                    .recorder
                    .record(catalog::algorithm_failure(&value_text(value)));
                TaskStatus::Error
            }
            None if cancelled => self.cancelled(report),
            None => {
                report.recorder.record(catalog::no_results());
                TaskStatus::Error
            }
        }
    }

    fn cancelled(&self, report: &mut TaskReport) -> TaskStatus {
        report.recorder.record(catalog::cancelled());
        TaskStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_check_output() {
        let permissive = JsonSchema::permissive();
        assert!(check_output(&json!({"a": 1}), &permissive).is_ok());
        assert_eq!(
            check_output(&json!([1, 2]), &permissive).unwrap_err(),
            "Algorithm output is not a JSON object"
        );

        let schema = JsonSchema::from_value(json!({
            "type": "object",
            "required": ["score"]
        }))
        .unwrap();
        let message = check_output(&json!({"other": 1}), &schema).unwrap_err();
        assert!(message.starts_with("Algorithm output does not match its schema"));
    }
}
