//! Registered plugin records

use crate::capability::{Capability, PluginKind};
use std::path::PathBuf;
use std::sync::Arc;
use verity_core::JsonSchema;

/// Metadata declared by a plugin manifest
#[derive(Debug, Clone)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Algorithm needs a ground truth dataset
    pub requires_ground_truth: bool,
    /// Schema for algorithm arguments
    pub input_schema: Arc<JsonSchema>,
    /// Schema for algorithm output
    pub output_schema: Arc<JsonSchema>,
}

impl PluginMetadata {
    /// Metadata with permissive schemas, named after the plugin id
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            name: id.into(),
            version: String::new(),
            description: String::new(),
            requires_ground_truth: false,
            input_schema: Arc::new(JsonSchema::permissive()),
            output_schema: Arc::new(JsonSchema::permissive()),
        }
    }

    pub fn with_ground_truth(mut self, required: bool) -> Self {
        self.requires_ground_truth = required;
        self
    }

    pub fn with_schemas(mut self, input: JsonSchema, output: JsonSchema) -> Self {
        self.input_schema = Arc::new(input);
        self.output_schema = Arc::new(output);
        self
    }
}

/// Where a plugin's code lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginOrigin {
    /// Entry of the statically linked builtin table
    Builtin(String),
    /// Dynamically loaded library
    Library(PathBuf),
    /// Registered directly by the embedding program
    Static,
}

/// A registered plugin
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    pub kind: PluginKind,
    pub id: String,
    pub capability: Capability,
    pub metadata: PluginMetadata,
    /// Directory holding the manifest, if discovered from disk
    pub base_path: Option<PathBuf>,
    pub origin: PluginOrigin,
}

impl PluginDescriptor {
    pub fn new(id: impl Into<String>, capability: Capability, metadata: PluginMetadata) -> Self {
        Self {
            kind: capability.kind(),
            id: id.into(),
            capability,
            metadata,
            base_path: None,
            origin: PluginOrigin::Static,
        }
    }
}
