//! Child side of an isolated compute run

use crate::loader::load_instances;
use crate::protocol::{ComputeEvent, ComputeRequest};
use serde_json::Value;
use std::any::Any;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};
use verity_plugin::{AlgorithmContext, Capability, ProgressReporter, Registry};

/// Text of a panic payload
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Build the child's registry: core plugins, the plugin tree and the
/// algorithm's own install directory
pub fn prepare_registry(request: &ComputeRequest) -> Registry {
    let registry = Registry::with_core_plugins();

    if let Some(root) = request.plugin_root.as_deref().filter(|p| p.is_dir()) {
        if let Err(e) = registry.discover(root, None) {
            warn!(path = %root.display(), error = %e, "Plugin discovery failed");
        }
    }

    if registry.algorithm(&request.algorithm_id).is_none() {
        if let Some(path) = &request.algorithm_path {
            if let Err(e) = registry.discover(path, Some(&request.algorithm_id)) {
                warn!(path = %path.display(), error = %e, "Algorithm discovery failed");
            }
        }
    }

    registry
}

type SharedWriter<W> = Arc<Mutex<W>>;

fn emit<W: Write>(writer: &SharedWriter<W>, event: &ComputeEvent) -> io::Result<()> {
    let mut out = writer.lock().unwrap_or_else(PoisonError::into_inner);
    out.write_all(event.to_line().as_bytes())?;
    out.flush()
}

fn compute(
    request: &ComputeRequest,
    registry: &Registry,
    progress: ProgressReporter,
) -> Result<Value, String> {
    let descriptor = registry
        .algorithm(&request.algorithm_id)
        .ok_or_else(|| "Algorithm ID is not found".to_string())?;
    let Capability::Algorithm(factory) = &descriptor.capability else {
        return Err(format!("{} is not an algorithm", request.algorithm_id));
    };

    let instances = load_instances(registry, &request.load).map_err(|e| e.to_string())?;
    let context = AlgorithmContext {
        data: instances.data.instance,
        model: instances.model.instance,
        ground_truth: instances.ground_truth.map(|truth| truth.instance),
        ground_truth_field: instances.ground_truth_field,
        arguments: request.arguments.clone(),
        base_path: descriptor.base_path.clone().unwrap_or_default(),
        progress,
    };

    let mut algorithm = factory
        .create(context)
        .map_err(|e| format!("Unable to create algorithm instance: {}", e))?;

    let output = panic::catch_unwind(AssertUnwindSafe(|| algorithm.generate()))
        .map_err(|payload| format!("Algorithm panicked: {}", panic_message(payload)))?
        .map_err(|e| e.to_string())?;

    Ok(output.into_json())
}

/// Run the algorithm and write progress and the final result as event
/// lines. The model is cleaned up before the result is written.
pub fn run_compute<W>(request: &ComputeRequest, registry: &Registry, out: W) -> io::Result<()>
where
    W: Write + Send + 'static,
{
    let writer: SharedWriter<W> = Arc::new(Mutex::new(out));
    let progress_writer = Arc::clone(&writer);
    let reporter = ProgressReporter::new(move |percent| {
        let _ = emit(&progress_writer, &ComputeEvent::Progress { percent });
    });

    info!(job_id = %request.job_id, algorithm_id = %request.algorithm_id, "Computing");
    let event = match compute(request, registry, reporter) {
        Ok(value) => ComputeEvent::Finished {
            success: true,
            value,
        },
        Err(message) => {
            warn!(job_id = %request.job_id, error = %message, "Computation failed");
            ComputeEvent::Finished {
                success: false,
                value: Value::String(message),
            }
        }
    };
    emit(&writer, &event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{LoadRequest, ModelSpec};
    use serde_json::json;
    use std::path::PathBuf;
    use verity_plugin::{
        Algorithm, AlgorithmFactory, OutputKey, OutputValue, PluginMetadata, PluginResult,
    };

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn events(&self) -> Vec<ComputeEvent> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .filter_map(ComputeEvent::parse)
                .collect()
        }
    }

    struct Columns {
        context: AlgorithmContext,
    }

    impl Algorithm for Columns {
        fn generate(&mut self) -> PluginResult<OutputValue> {
            self.context.progress.report(50);
            let count = self.context.data.labels().len() as i64;
            Ok(OutputValue::Map(vec![
                (OutputKey::Text("columns".to_string()), OutputValue::Int(count)),
                (OutputKey::Int(1), OutputValue::Float(f64::NAN)),
            ]))
        }
    }

    struct ColumnsFactory;

    impl AlgorithmFactory for ColumnsFactory {
        fn create(&self, context: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>> {
            Ok(Box::new(Columns { context }))
        }
    }

    struct Panics;

    impl Algorithm for Panics {
        fn generate(&mut self) -> PluginResult<OutputValue> {
            panic!("division by zero")
        }
    }

    struct PanicsFactory;

    impl AlgorithmFactory for PanicsFactory {
        fn create(&self, _context: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>> {
            Ok(Box::new(Panics))
        }
    }

    fn request(dir: &std::path::Path, algorithm_id: &str) -> ComputeRequest {
        let data = dir.join("data.json");
        std::fs::write(&data, r#"[{"a": 1, "b": 2.5}]"#).unwrap();
        ComputeRequest {
            job_id: "t1".to_string(),
            algorithm_id: algorithm_id.to_string(),
            algorithm_path: None,
            plugin_root: None,
            arguments: json!({}),
            load: LoadRequest {
                data,
                model: ModelSpec::Api {
                    schema: json!({}),
                    config: json!({}),
                },
                ground_truth: None,
            },
        }
    }

    fn registry() -> Registry {
        let registry = Registry::with_core_plugins();
        registry.register(
            "columns",
            Capability::Algorithm(Arc::new(ColumnsFactory)),
            PluginMetadata::named("columns"),
        );
        registry.register(
            "panics",
            Capability::Algorithm(Arc::new(PanicsFactory)),
            PluginMetadata::named("panics"),
        );
        registry
    }

    #[test]
    fn test_success_reports_progress_and_value() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Buffer::default();
        run_compute(&request(dir.path(), "columns"), &registry(), buffer.clone()).unwrap();

        let events = buffer.events();
        assert_eq!(
            events,
            vec![
                ComputeEvent::Progress { percent: 50 },
                ComputeEvent::Finished {
                    success: true,
                    value: json!({"columns": 2, "1": null})
                }
            ]
        );
    }

    #[test]
    fn test_panic_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Buffer::default();
        run_compute(&request(dir.path(), "panics"), &registry(), buffer.clone()).unwrap();

        match buffer.events().as_slice() {
            [ComputeEvent::Finished { success, value }] => {
                assert!(!success);
                assert!(value.as_str().unwrap().contains("division by zero"));
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = Buffer::default();
        run_compute(&request(dir.path(), "missing"), &registry(), buffer.clone()).unwrap();
        assert_eq!(
            buffer.events(),
            vec![ComputeEvent::Finished {
                success: false,
                value: json!("Algorithm ID is not found")
            }]
        );
    }

    #[test]
    fn test_prepare_registry_without_paths() {
        let dir = tempfile::tempdir().unwrap();
        let mut request = request(dir.path(), "columns");
        request.plugin_root = Some(PathBuf::from("/nonexistent"));
        let registry = prepare_registry(&request);
        assert!(registry.algorithm("columns").is_none());
        assert!(!registry.is_empty());
    }
}
