//! Plugin manifests
//!
//! Every plugin directory carries a `plugin.toml`:
//!
//! ```toml
//! kind = "algorithm"
//! id = "fairness_metrics"
//! version = "0.2.0"
//! requires_ground_truth = true
//! input_schema = "input.schema.json"
//! output_schema = "output.schema.json"
//! library = "libfairness_metrics.so"
//! ```
//!
//! A manifest names exactly one of `library` or `builtin`.

use crate::capability::PluginKind;
use crate::descriptor::PluginMetadata;
use crate::error::{RegistryError, RegistryResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use verity_core::JsonSchema;

/// File name discovery looks for
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Parsed `plugin.toml`
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    /// Kept as text so unknown kinds can be skipped with a warning
    pub kind: String,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requires_ground_truth: bool,
    #[serde(default)]
    pub input_schema: Option<PathBuf>,
    #[serde(default)]
    pub output_schema: Option<PathBuf>,
    #[serde(default)]
    pub library: Option<PathBuf>,
    #[serde(default)]
    pub builtin: Option<String>,
}

/// Where the manifest says the code is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    Library(PathBuf),
    Builtin(String),
}

impl PluginManifest {
    pub fn from_file(path: impl AsRef<Path>) -> RegistryResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| RegistryError::Manifest {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let manifest: PluginManifest = toml::from_str(content).map_err(|e| e.to_string())?;
        if manifest.id.trim().is_empty() {
            return Err("plugin id is empty".to_string());
        }
        Ok(manifest)
    }

    /// Declared kind, `None` if unrecognised
    pub fn kind(&self) -> Option<PluginKind> {
        PluginKind::parse(&self.kind)
    }

    /// Code location, with library paths resolved against `base`
    pub fn source(&self, base: &Path) -> Result<ManifestSource, String> {
        match (&self.library, &self.builtin) {
            (Some(library), None) => Ok(ManifestSource::Library(base.join(library))),
            (None, Some(builtin)) => Ok(ManifestSource::Builtin(builtin.clone())),
            (Some(_), Some(_)) => Err("both library and builtin are set".to_string()),
            (None, None) => Err("one of library or builtin is required".to_string()),
        }
    }

    /// Build metadata, compiling schema files relative to `base`
    pub fn metadata(&self, base: &Path) -> RegistryResult<PluginMetadata> {
        let schema = |file: &Option<PathBuf>| -> RegistryResult<Arc<JsonSchema>> {
            match file {
                None => Ok(Arc::new(JsonSchema::permissive())),
                Some(file) => {
                    let path = base.join(file);
                    JsonSchema::from_file(&path)
                        .map(Arc::new)
                        .map_err(|e| RegistryError::Manifest {
                            path,
                            reason: e.to_string(),
                        })
                }
            }
        };

        Ok(PluginMetadata {
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            version: self.version.clone().unwrap_or_default(),
            description: self.description.clone().unwrap_or_default(),
            requires_ground_truth: self.requires_ground_truth,
            input_schema: schema(&self.input_schema)?,
            output_schema: schema(&self.output_schema)?,
        })
    }
}
