//! Capability interfaces implemented by plugins
//!
//! Every plugin provides exactly one capability. Serializers turn a file
//! into an in-memory [`Artifact`]. Data and model factories recognise
//! artifacts and build instances. Algorithm factories build the computation
//! from loaded instances.

use crate::error::{PluginError, PluginResult};
use crate::output::OutputValue;
use crate::progress::ProgressReporter;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// The four plugin kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Data,
    Model,
    Algorithm,
    Serializer,
}

impl PluginKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "data" => Some(PluginKind::Data),
            "model" => Some(PluginKind::Model),
            "algorithm" => Some(PluginKind::Algorithm),
            "serializer" => Some(PluginKind::Serializer),
            _ => None,
        }
    }
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Data => write!(f, "data"),
            PluginKind::Model => write!(f, "model"),
            PluginKind::Algorithm => write!(f, "algorithm"),
            PluginKind::Serializer => write!(f, "serializer"),
        }
    }
}

/// A deserialized file, tagged with the serializer that produced it
pub struct Artifact {
    serializer: String,
    content: Box<dyn Any + Send + Sync>,
}

impl Artifact {
    pub fn new(serializer: impl Into<String>, content: Box<dyn Any + Send + Sync>) -> Self {
        Self {
            serializer: serializer.into(),
            content,
        }
    }

    /// Id of the serializer that produced this artifact
    pub fn serializer(&self) -> &str {
        &self.serializer
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.content.downcast_ref::<T>()
    }

    /// Take the content out if it has type `T`
    pub fn into_content<T: Any>(self) -> Result<T, Self> {
        match self.content.downcast::<T>() {
            Ok(content) => Ok(*content),
            Err(content) => Err(Self {
                serializer: self.serializer,
                content,
            }),
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}

/// Reads a file into an in-memory object
pub trait Serializer: Send + Sync {
    fn deserialize(&self, path: &Path) -> PluginResult<Box<dyn Any + Send + Sync>>;
}

/// A loaded dataset
pub trait Data: Send {
    /// Format name reported by dataset validation
    fn format(&self) -> &str;

    fn setup(&mut self) -> PluginResult<()>;

    /// Check the content is well formed
    fn validate(&self) -> PluginResult<()>;

    /// Column name to datatype, in column order
    fn labels(&self) -> IndexMap<String, String>;

    /// Reduce this instance to the ground truth column. Returns false if the
    /// column does not exist.
    fn keep_ground_truth(&mut self, field: &str) -> bool;

    /// Drop the ground truth column from this instance
    fn remove_ground_truth(&mut self, field: &str);

    /// Rows as a JSON array of records, the form models predict on
    fn records(&self) -> PluginResult<Value> {
        Err(unsupported(self.format(), "records"))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Recognises and builds [`Data`] instances
pub trait DataFactory: Send + Sync {
    fn accepts(&self, artifact: &Artifact) -> bool;

    fn create(&self, artifact: Artifact) -> PluginResult<Box<dyn Data>>;
}

/// Where a model comes from
#[derive(Debug)]
pub enum ModelSource {
    /// Deserialized model file
    Artifact(Artifact),
    /// Model served over an API
    Api { schema: Value, config: Value },
}

/// A loaded model
pub trait Model: Send {
    /// Format name reported by model validation
    fn format(&self) -> &str;

    fn setup(&mut self) -> PluginResult<()>;

    /// Release held resources. Called exactly once when the job ends.
    fn cleanup(&mut self);

    /// One prediction per record of `data`. `labels` maps each feature to
    /// its datatype.
    fn predict(&self, _data: &Value, _labels: &IndexMap<String, String>) -> PluginResult<Value> {
        Err(unsupported(self.format(), "predict"))
    }

    /// Class probabilities per record of `data`
    fn predict_proba(
        &self,
        _data: &Value,
        _labels: &IndexMap<String, String>,
    ) -> PluginResult<Value> {
        Err(unsupported(self.format(), "predict_proba"))
    }

    /// Score the predictions for `data` against `y_true`
    fn score(&self, _data: &Value, _y_true: &Value) -> PluginResult<Value> {
        Err(unsupported(self.format(), "score"))
    }

    fn as_any(&self) -> &dyn Any;
}

fn unsupported(format: &str, operation: &str) -> PluginError {
    PluginError::Unsupported(format!("{} does not support {}", format, operation))
}

/// A model that is cleaned up exactly once, when dropped
pub struct ManagedModel {
    inner: Box<dyn Model>,
}

impl ManagedModel {
    pub fn new(inner: Box<dyn Model>) -> Self {
        Self { inner }
    }
}

impl std::ops::Deref for ManagedModel {
    type Target = dyn Model;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl std::ops::DerefMut for ManagedModel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for ManagedModel {
    fn drop(&mut self) {
        self.inner.cleanup();
    }
}

/// Recognises and builds [`Model`] instances
pub trait ModelFactory: Send + Sync {
    fn accepts(&self, source: &ModelSource) -> bool;

    fn create(&self, source: ModelSource) -> PluginResult<Box<dyn Model>>;
}

/// Everything an algorithm is constructed from
pub struct AlgorithmContext {
    pub data: Box<dyn Data>,
    pub model: ManagedModel,
    /// Present only when the algorithm requires ground truth
    pub ground_truth: Option<Box<dyn Data>>,
    pub ground_truth_field: Option<String>,
    /// Arguments already validated against the algorithm's input schema
    pub arguments: Value,
    /// Directory the algorithm plugin was discovered in
    pub base_path: PathBuf,
    pub progress: ProgressReporter,
}

/// A runnable computation
pub trait Algorithm: Send {
    fn generate(&mut self) -> PluginResult<OutputValue>;
}

/// Builds [`Algorithm`] instances
pub trait AlgorithmFactory: Send + Sync {
    fn create(&self, context: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>>;
}

/// The single capability a plugin provides
#[derive(Clone)]
pub enum Capability {
    Serializer(Arc<dyn Serializer>),
    Data(Arc<dyn DataFactory>),
    Model(Arc<dyn ModelFactory>),
    Algorithm(Arc<dyn AlgorithmFactory>),
}

impl Capability {
    pub fn kind(&self) -> PluginKind {
        match self {
            Capability::Serializer(_) => PluginKind::Serializer,
            Capability::Data(_) => PluginKind::Data,
            Capability::Model(_) => PluginKind::Model,
            Capability::Algorithm(_) => PluginKind::Algorithm,
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Capability({})", self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!(PluginKind::parse("Algorithm"), Some(PluginKind::Algorithm));
        assert_eq!(PluginKind::parse(" data "), Some(PluginKind::Data));
        assert_eq!(PluginKind::parse("plugin"), None);
    }

    #[test]
    fn test_artifact_downcast() {
        let artifact = Artifact::new("json", Box::new(serde_json::json!({"a": 1})));
        assert_eq!(artifact.serializer(), "json");
        assert!(artifact.downcast_ref::<Value>().is_some());
        assert!(artifact.downcast_ref::<String>().is_none());

        let artifact = artifact.into_content::<String>().unwrap_err();
        let value = artifact.into_content::<Value>().unwrap();
        assert_eq!(value["a"], 1);
    }

    struct Counted(std::sync::Arc<std::sync::atomic::AtomicUsize>);

    impl Model for Counted {
        fn format(&self) -> &str {
            "counted"
        }
        fn setup(&mut self) -> PluginResult<()> {
            Ok(())
        }
        fn cleanup(&mut self) {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_managed_model_cleans_up_once() {
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut model = ManagedModel::new(Box::new(Counted(count.clone())));
        model.setup().unwrap();
        assert_eq!(model.format(), "counted");
        drop(model);
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn test_model_operations_default_to_unsupported() {
        let model = Counted(Default::default());
        let data = serde_json::json!([{"a": 1}]);
        let error = model.predict(&data, &IndexMap::new()).unwrap_err();
        assert_eq!(error.to_string(), "unsupported: counted does not support predict");
        assert!(matches!(
            model.predict_proba(&data, &IndexMap::new()),
            Err(PluginError::Unsupported(_))
        ));
        assert!(matches!(
            model.score(&data, &serde_json::json!([1])),
            Err(PluginError::Unsupported(_))
        ));
    }
}
