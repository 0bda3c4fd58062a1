//! Verity Engine - per-job state machine
//!
//! This crate turns a delivered job message into result updates:
//! - Payload validation against JSON schemas and semantic checks
//! - Instance loading through the plugin registry
//! - Algorithm execution in an isolated compute process
//! - Cancellation racing against normal completion
//! - Dataset and model validation services

pub mod argument;
pub mod cancel;
pub mod catalog;
pub mod compute;
pub mod engine;
pub mod error;
pub mod loader;
pub mod protocol;
pub mod recorder;
pub mod report;
pub mod sandbox;
pub mod schemas;
pub mod service;
pub mod sink;
pub mod task;

pub use argument::{ArgumentError, DatasetArgument, ModelArgument, TaskArgument, ValidatedTask};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use compute::{prepare_registry, run_compute};
pub use engine::{Engine, EngineSettings, JobOutcome};
pub use error::{EngineError, EngineResult};
pub use loader::{load_instances, GroundTruthSpec, LoadError, LoadRequest, ModelSpec};
pub use protocol::{ComputeEvent, ComputeRequest, ComputeResult};
pub use recorder::JobRecorder;
pub use sandbox::ProcessSandbox;
pub use schemas::SchemaStore;
pub use sink::UpdateSink;
