//! Fixture plugins

use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::path::Path;
use std::sync::Arc;
use verity_plugin::{
    Algorithm, AlgorithmContext, AlgorithmFactory, Artifact, BuiltinTable, Capability, Data,
    DataFactory, Model, ModelFactory, ModelSource, OutputValue, PluginError, PluginMetadata,
    PluginResult, Registry, Serializer,
};

/// Algorithm without ground truth used by the scenario tests
pub const ALGORITHM: &str = "algoX";

/// Algorithm requiring ground truth
pub const GROUND_TRUTH_ALGORITHM: &str = "algoGT";

/// Model plugin accepting any JSON object with a `model` key
pub const MODEL_PLUGIN: &str = "json-model";

pub struct FixtureModel {
    name: String,
}

impl Model for FixtureModel {
    fn format(&self) -> &str {
        "fixture"
    }

    fn setup(&mut self) -> PluginResult<()> {
        if self.name.is_empty() {
            return Err(PluginError::Invalid("model has no name".to_string()));
        }
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct FixtureModelFactory;

fn model_name(artifact: &Artifact) -> Option<String> {
    let value = artifact.downcast_ref::<Value>()?;
    Some(value.get("model")?.as_str()?.to_string())
}

impl ModelFactory for FixtureModelFactory {
    fn accepts(&self, source: &ModelSource) -> bool {
        matches!(source, ModelSource::Artifact(artifact) if model_name(artifact).is_some())
    }

    fn create(&self, source: ModelSource) -> PluginResult<Box<dyn Model>> {
        match source {
            ModelSource::Artifact(artifact) => {
                let name = model_name(&artifact)
                    .ok_or_else(|| PluginError::Unsupported("not a fixture model".to_string()))?;
                Ok(Box::new(FixtureModel { name }))
            }
            ModelSource::Api { .. } => Err(PluginError::Unsupported("api model".to_string())),
        }
    }
}

/// Scores every row as correct. Only runs in-process, scenario tests use
/// scripted compute processes.
pub struct ConstantScore;

impl Algorithm for ConstantScore {
    fn generate(&mut self) -> PluginResult<OutputValue> {
        Ok(OutputValue::map([("score", OutputValue::Float(1.0))]))
    }
}

pub struct ConstantScoreFactory;

impl AlgorithmFactory for ConstantScoreFactory {
    fn create(&self, _context: AlgorithmContext) -> PluginResult<Box<dyn Algorithm>> {
        Ok(Box::new(ConstantScore))
    }
}

/// Core plugins plus the fixture model and both fixture algorithms
pub fn scenario_registry() -> Registry {
    let registry = Registry::with_core_plugins();
    registry.register(
        MODEL_PLUGIN,
        Capability::Model(Arc::new(FixtureModelFactory)),
        PluginMetadata::named(MODEL_PLUGIN),
    );
    registry.register(
        ALGORITHM,
        Capability::Algorithm(Arc::new(ConstantScoreFactory)),
        PluginMetadata::named(ALGORITHM),
    );
    registry.register(
        GROUND_TRUTH_ALGORITHM,
        Capability::Algorithm(Arc::new(ConstantScoreFactory)),
        PluginMetadata::named(GROUND_TRUTH_ALGORITHM).with_ground_truth(true),
    );
    registry
}

/// Reads any file as text
pub struct TextSerializer;

impl Serializer for TextSerializer {
    fn deserialize(&self, path: &Path) -> PluginResult<Box<dyn Any + Send + Sync>> {
        Ok(Box::new(std::fs::read_to_string(path)?))
    }
}

/// Data plugin accepting every text artifact, reporting its own name as format
pub struct GreedyData {
    name: &'static str,
}

impl Data for GreedyData {
    fn format(&self) -> &str {
        self.name
    }

    fn setup(&mut self) -> PluginResult<()> {
        Ok(())
    }

    fn validate(&self) -> PluginResult<()> {
        Ok(())
    }

    fn labels(&self) -> IndexMap<String, String> {
        IndexMap::from([("text".to_string(), "object".to_string())])
    }

    fn keep_ground_truth(&mut self, _field: &str) -> bool {
        false
    }

    fn remove_ground_truth(&mut self, _field: &str) {}

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct GreedyDataFactory(pub &'static str);

impl DataFactory for GreedyDataFactory {
    fn accepts(&self, artifact: &Artifact) -> bool {
        artifact.downcast_ref::<String>().is_some()
    }

    fn create(&self, _artifact: Artifact) -> PluginResult<Box<dyn Data>> {
        Ok(Box::new(GreedyData { name: self.0 }))
    }
}

/// Text serializer followed by greedy data plugins in the given order
pub fn greedy_registry(order: &[&'static str]) -> Registry {
    let registry = Registry::new(BuiltinTable::new());
    registry.register(
        "text",
        Capability::Serializer(Arc::new(TextSerializer)),
        PluginMetadata::named("text"),
    );
    for name in order {
        registry.register(
            *name,
            Capability::Data(Arc::new(GreedyDataFactory(*name))),
            PluginMetadata::named(*name),
        );
    }
    registry
}
