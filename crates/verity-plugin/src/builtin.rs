//! Statically linked plugins
//!
//! Manifests refer to these with `builtin = "<name>"`. The core table holds:
//! - `json`: serde_json serializer
//! - `msgpack`: MessagePack serializer
//! - `tabular`: record or column/row datasets
//! - `api`: models served over an API

use crate::capability::{Artifact, Capability, Data, DataFactory, Model, ModelFactory, ModelSource, Serializer};
use crate::error::{PluginError, PluginResult};
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Name to capability table consulted by `builtin` manifests
#[derive(Clone, Default)]
pub struct BuiltinTable {
    entries: HashMap<String, Capability>,
}

impl BuiltinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the core plugins
    pub fn core() -> Self {
        let mut table = Self::new();
        for (name, capability) in core_plugins() {
            table.insert(name, capability);
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, capability: Capability) {
        self.entries.insert(name.into(), capability);
    }

    pub fn get(&self, name: &str) -> Option<Capability> {
        self.entries.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Core plugins in registration order
pub fn core_plugins() -> Vec<(&'static str, Capability)> {
    vec![
        ("json", Capability::Serializer(Arc::new(JsonSerializer))),
        ("msgpack", Capability::Serializer(Arc::new(MsgpackSerializer))),
        ("tabular", Capability::Data(Arc::new(TabularFactory))),
        ("api", Capability::Model(Arc::new(ApiModelFactory))),
    ]
}

/// Reads JSON documents into a `serde_json::Value`
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn deserialize(&self, path: &Path) -> PluginResult<Box<dyn Any + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| PluginError::Unsupported(format!("not JSON: {}", e)))?;
        Ok(Box::new(value))
    }
}

/// Reads a single MessagePack document into a `serde_json::Value`
pub struct MsgpackSerializer;

impl Serializer for MsgpackSerializer {
    fn deserialize(&self, path: &Path) -> PluginResult<Box<dyn Any + Send + Sync>> {
        let bytes = std::fs::read(path)?;
        let mut cursor = Cursor::new(bytes.as_slice());
        let value: Value = rmp_serde::from_read(&mut cursor)
            .map_err(|e| PluginError::Unsupported(format!("not MessagePack: {}", e)))?;
        // A lone prefix byte decodes as a small value; the whole file must be one document.
        if cursor.position() as usize != bytes.len() {
            return Err(PluginError::Unsupported(
                "trailing bytes after MessagePack document".to_string(),
            ));
        }
        Ok(Box::new(value))
    }
}

/// Column oriented dataset
#[derive(Debug, Clone, PartialEq)]
pub struct TabularData {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TabularData {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Build from a JSON array of records or a `{columns, rows}` object
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Array(records) => {
                let mut columns: Vec<String> = Vec::new();
                for record in records {
                    for key in record.as_object()?.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
                let rows = records
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|record| {
                        columns
                            .iter()
                            .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect();
                Some(Self { columns, rows })
            }
            Value::Object(table) => {
                let columns = table
                    .get("columns")?
                    .as_array()?
                    .iter()
                    .map(|c| c.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()?;
                let rows = table
                    .get("rows")?
                    .as_array()?
                    .iter()
                    .map(|row| row.as_array().cloned())
                    .collect::<Option<Vec<_>>>()?;
                Some(Self { columns, rows })
            }
            _ => None,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Values of one column
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().filter_map(|row| row.get(index)).collect())
    }

    fn datatype(&self, index: usize) -> &'static str {
        let mut kind: Option<&'static str> = None;
        for value in self.rows.iter().filter_map(|row| row.get(index)) {
            let current = match value {
                Value::Null => continue,
                Value::Bool(_) => "bool",
                Value::Number(n) if n.is_i64() || n.is_u64() => "int64",
                Value::Number(_) => "float64",
                _ => "object",
            };
            kind = Some(match (kind, current) {
                (None, c) => c,
                (Some(k), c) if k == c => k,
                (Some("int64"), "float64") | (Some("float64"), "int64") => "float64",
                _ => "object",
            });
        }
        kind.unwrap_or("object")
    }
}

impl Data for TabularData {
    fn format(&self) -> &str {
        "tabular"
    }

    fn setup(&mut self) -> PluginResult<()> {
        Ok(())
    }

    fn validate(&self) -> PluginResult<()> {
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(PluginError::Invalid(format!(
                    "row {} has {} values, expected {}",
                    index,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    fn labels(&self) -> IndexMap<String, String> {
        self.columns
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), self.datatype(index).to_string()))
            .collect()
    }

    fn keep_ground_truth(&mut self, field: &str) -> bool {
        let Some(index) = self.columns.iter().position(|c| c == field) else {
            return false;
        };
        self.columns = vec![field.to_string()];
        for row in &mut self.rows {
            let value = row.get(index).cloned().unwrap_or(Value::Null);
            *row = vec![value];
        }
        true
    }

    fn records(&self) -> PluginResult<Value> {
        Ok(self
            .rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect::<serde_json::Map<_, _>>()
                    .into()
            })
            .collect::<Vec<Value>>()
            .into())
    }

    fn remove_ground_truth(&mut self, field: &str) {
        if let Some(index) = self.columns.iter().position(|c| c == field) {
            self.columns.remove(index);
            for row in &mut self.rows {
                if index < row.len() {
                    row.remove(index);
                }
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Accepts JSON artifacts shaped like a table
pub struct TabularFactory;

impl DataFactory for TabularFactory {
    fn accepts(&self, artifact: &Artifact) -> bool {
        artifact
            .downcast_ref::<Value>()
            .is_some_and(|value| TabularData::from_json(value).is_some())
    }

    fn create(&self, artifact: Artifact) -> PluginResult<Box<dyn Data>> {
        let value = artifact
            .downcast_ref::<Value>()
            .ok_or_else(|| PluginError::Unsupported("expected a JSON artifact".to_string()))?;
        let data = TabularData::from_json(value)
            .ok_or_else(|| PluginError::Unsupported("not a table".to_string()))?;
        Ok(Box::new(data))
    }
}

/// Model served over an API
#[derive(Debug, Clone)]
pub struct ApiModel {
    schema: Value,
    config: Value,
}

/// Request timeout when the config sets none
const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

impl ApiModel {
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    fn url(&self, key: &str) -> PluginResult<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| PluginError::Unsupported(format!("api config has no {}", key)))
    }

    /// POST `{"data", "labels"}` to the url under `key` and read back one
    /// entry per record
    fn call(&self, key: &str, data: &Value, labels: &IndexMap<String, String>) -> PluginResult<Value> {
        let url = self.url(key)?;
        let timeout = self
            .config
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| PluginError::Compute(format!("api client error: {}", e)))?;

        let mut request = client
            .post(url)
            .json(&serde_json::json!({"data": data, "labels": labels}));
        if let Some(headers) = self.config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        let body: Value = request
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json())
            .map_err(|e| PluginError::Compute(format!("api request to {} failed: {}", url, e)))?;
        predictions(body)
    }
}

/// Accepts a bare array or `{"predictions": [...]}`
fn predictions(body: Value) -> PluginResult<Value> {
    match body {
        Value::Array(_) => Ok(body),
        Value::Object(mut map) => match map.remove("predictions") {
            Some(found @ Value::Array(_)) => Ok(found),
            _ => Err(PluginError::Compute(
                "api response has no predictions array".to_string(),
            )),
        },
        _ => Err(PluginError::Compute("api response is not an array".to_string())),
    }
}

/// Single-column records stand for their value
fn truth_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.len() == 1 => map.values().next().unwrap_or(value),
        _ => value,
    }
}

fn same_label(predicted: &Value, expected: &Value) -> bool {
    match (predicted.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => predicted == expected,
    }
}

/// Fraction of predictions equal to the truth
fn accuracy(predicted: &Value, y_true: &Value) -> PluginResult<Value> {
    let (Some(predicted), Some(expected)) = (predicted.as_array(), y_true.as_array()) else {
        return Err(PluginError::Invalid("score needs arrays of labels".to_string()));
    };
    if predicted.is_empty() || predicted.len() != expected.len() {
        return Err(PluginError::Invalid(format!(
            "{} predictions for {} labels",
            predicted.len(),
            expected.len()
        )));
    }
    let correct = predicted
        .iter()
        .zip(expected)
        .filter(|(p, e)| same_label(p, truth_value(e)))
        .count();
    Ok(Value::from(correct as f64 / predicted.len() as f64))
}

impl Model for ApiModel {
    fn format(&self) -> &str {
        "api"
    }

    fn setup(&mut self) -> PluginResult<()> {
        if !self.config.is_object() {
            return Err(PluginError::Setup("api config must be an object".to_string()));
        }
        Ok(())
    }

    fn cleanup(&mut self) {}

    fn predict(&self, data: &Value, labels: &IndexMap<String, String>) -> PluginResult<Value> {
        self.call("endpoint", data, labels)
    }

    fn predict_proba(&self, data: &Value, labels: &IndexMap<String, String>) -> PluginResult<Value> {
        self.call("proba_endpoint", data, labels)
    }

    fn score(&self, data: &Value, y_true: &Value) -> PluginResult<Value> {
        let predicted = self.predict(data, &IndexMap::new())?;
        accuracy(&predicted, y_true)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct ApiModelFactory;

impl ModelFactory for ApiModelFactory {
    fn accepts(&self, source: &ModelSource) -> bool {
        matches!(source, ModelSource::Api { .. })
    }

    fn create(&self, source: ModelSource) -> PluginResult<Box<dyn Model>> {
        match source {
            ModelSource::Api { schema, config } => Ok(Box::new(ApiModel { schema, config })),
            ModelSource::Artifact(_) => Err(PluginError::Unsupported(
                "uploaded models are not served over an API".to_string(),
            )),
        }
    }
}
