//! JSON schema checking helpers

use serde_json::Value;
use std::path::Path;

/// A compiled JSON schema
pub struct JsonSchema {
    source: Value,
    /// `None` for the permissive schema
    validator: Option<jsonschema::Validator>,
}

impl std::fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchema")
            .field("source", &self.source)
            .finish()
    }
}

impl JsonSchema {
    /// Compile a schema from an in-memory value
    pub fn from_value(source: Value) -> crate::Result<Self> {
        let validator = jsonschema::validator_for(&source)
            .map_err(|e| crate::Error::InvalidSchema(e.to_string()))?;
        Ok(Self {
            source,
            validator: Some(validator),
        })
    }

    /// Read and compile a schema file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let source = read_json_file(path).map_err(|e| {
            crate::Error::InvalidSchema(format!("{}: {}", path.display(), e))
        })?;
        Self::from_value(source)
    }

    /// Schema accepting any instance
    pub fn permissive() -> Self {
        Self {
            source: Value::Object(Default::default()),
            validator: None,
        }
    }

    pub fn source(&self) -> &Value {
        &self.source
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator
            .as_ref()
            .map_or(true, |validator| validator.is_valid(instance))
    }

    /// Validate an instance, joining every violation with `; `
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        let Some(validator) = &self.validator else {
            return Ok(());
        };
        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("; "))
        }
    }
}

/// Read a file and parse it as JSON
pub fn read_json_file(path: impl AsRef<Path>) -> crate::Result<Value> {
    let content = std::fs::read_to_string(path.as_ref())?;
    Ok(serde_json::from_str(&content)?)
}

/// Error descriptions travel inside JSON strings, keep them free of single quotes
pub fn normalize_quotes(text: &str) -> String {
    text.replace('\'', "\"")
}

/// Blank strings and the literal placeholders `None`/`none` count as empty
pub fn is_empty_string(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed == "None" || trimmed == "none"
}
