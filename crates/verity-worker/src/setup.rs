//! Assembly of a worker's registry and engine from configuration

use crate::error::WorkerResult;
use std::sync::Arc;
use tracing::{info, warn};
use verity_backend::{Backend, BackendDirectory};
use verity_core::VerityConfig;
use verity_engine::{Engine, EngineSettings, ProcessSandbox, SchemaStore};
use verity_plugin::Registry;

/// Core plugins, the configured plugin tree and the backend's algorithm
/// directory for on-demand installs
pub fn build_registry<S: Backend>(config: &VerityConfig, backend: S) -> Registry {
    let directory = BackendDirectory::new(backend, config.plugins.algorithm_key_prefix.clone());
    let registry = Registry::with_core_plugins().with_directory(Arc::new(directory));

    match registry.discover(&config.plugins.root, None) {
        Ok(count) => info!(root = %config.plugins.root.display(), count, "Discovered plugins"),
        Err(e) => warn!(root = %config.plugins.root.display(), error = %e, "Plugin discovery failed"),
    }
    registry
}

/// Payload schemas from the schema directory, or the built-in copies when
/// the directory does not exist
pub fn load_schemas(config: &VerityConfig) -> WorkerResult<SchemaStore> {
    let dir = &config.plugins.schema_dir;
    if dir.is_dir() {
        return Ok(SchemaStore::load(dir)?);
    }
    warn!(dir = %dir.display(), "Schema directory not found, using built-in schemas");
    Ok(SchemaStore::embedded()?)
}

pub fn build_sandbox(config: &VerityConfig) -> WorkerResult<ProcessSandbox> {
    let sandbox = match &config.worker.compute_program {
        Some(program) => ProcessSandbox::new(program).with_args(["compute"]),
        None => ProcessSandbox::current_exe()?,
    };
    Ok(sandbox.with_result_grace(config.worker.result_grace()))
}

pub fn build_engine(config: &VerityConfig, registry: Arc<Registry>) -> WorkerResult<Engine> {
    Ok(Engine::new(
        registry,
        load_schemas(config)?,
        build_sandbox(config)?,
        EngineSettings::from_config(config),
    ))
}
