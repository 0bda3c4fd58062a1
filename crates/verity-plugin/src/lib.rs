//! Verity Plugin - capability registry
//!
//! Plugins provide one of four capabilities:
//! - Serializer: reads an artifact file
//! - Data: recognises and wraps datasets
//! - Model: recognises and wraps models
//! - Algorithm: computes a result from data and model
//!
//! Plugins are declared by `plugin.toml` manifests and backed either by the
//! builtin table or by a dynamically loaded library.

pub mod builtin;
pub mod capability;
pub mod descriptor;
pub mod directory;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod output;
pub mod progress;
pub mod registry;

pub use builtin::{ApiModel, BuiltinTable, TabularData};
pub use capability::{
    Algorithm, AlgorithmContext, AlgorithmFactory, Artifact, Capability, Data, DataFactory,
    ManagedModel, Model, ModelFactory, ModelSource, PluginKind, Serializer,
};
pub use descriptor::{PluginDescriptor, PluginMetadata, PluginOrigin};
pub use directory::{AlgorithmDirectory, StaticDirectory};
pub use error::{PluginError, PluginResult, RegistryError, RegistryResult};
pub use loader::{PluginDeclaration, PluginRegistrar};
pub use manifest::{PluginManifest, MANIFEST_FILE};
pub use output::{OutputKey, OutputValue};
pub use progress::{ProgressReporter, SimpleProgress};
pub use registry::{ModelRequest, Registry, ResolvedData, ResolvedModel};
