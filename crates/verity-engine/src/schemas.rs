//! Payload validation schemas

use crate::error::{EngineError, EngineResult};
use std::path::Path;
use verity_core::{JobKind, JsonSchema};

pub const TASK_SCHEMA_FILE: &str = "test_engine_task_schema.json";
pub const VALIDATE_DATASET_SCHEMA_FILE: &str = "test_engine_validate_dataset_schema.json";
pub const VALIDATE_MODEL_SCHEMA_FILE: &str = "test_engine_validate_model_schema.json";

const EMBEDDED_TASK: &str = include_str!("../schemas/test_engine_task_schema.json");
const EMBEDDED_VALIDATE_DATASET: &str =
    include_str!("../schemas/test_engine_validate_dataset_schema.json");
const EMBEDDED_VALIDATE_MODEL: &str =
    include_str!("../schemas/test_engine_validate_model_schema.json");

/// One compiled schema per job kind
#[derive(Debug)]
pub struct SchemaStore {
    pub task: JsonSchema,
    pub validate_dataset: JsonSchema,
    pub validate_model: JsonSchema,
}

impl SchemaStore {
    /// Load the schema files from a directory
    pub fn load(dir: &Path) -> EngineResult<Self> {
        let read = |name: &str| {
            JsonSchema::from_file(dir.join(name)).map_err(|e| EngineError::Schema(e.to_string()))
        };
        Ok(Self {
            task: read(TASK_SCHEMA_FILE)?,
            validate_dataset: read(VALIDATE_DATASET_SCHEMA_FILE)?,
            validate_model: read(VALIDATE_MODEL_SCHEMA_FILE)?,
        })
    }

    /// Schemas compiled into the binary
    pub fn embedded() -> EngineResult<Self> {
        let parse = |name: &str, text: &str| {
            let value = serde_json::from_str(text)
                .map_err(|e| EngineError::Schema(format!("{}: {}", name, e)))?;
            JsonSchema::from_value(value).map_err(|e| EngineError::Schema(e.to_string()))
        };
        Ok(Self {
            task: parse(TASK_SCHEMA_FILE, EMBEDDED_TASK)?,
            validate_dataset: parse(VALIDATE_DATASET_SCHEMA_FILE, EMBEDDED_VALIDATE_DATASET)?,
            validate_model: parse(VALIDATE_MODEL_SCHEMA_FILE, EMBEDDED_VALIDATE_MODEL)?,
        })
    }

    pub fn for_kind(&self, kind: JobKind) -> &JsonSchema {
        match kind {
            JobKind::Task => &self.task,
            JobKind::ValidateDataset => &self.validate_dataset,
            JobKind::ValidateModel => &self.validate_model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_embedded_task_schema() {
        let schemas = SchemaStore::embedded().unwrap();
        let valid = json!({
            "id": "t1",
            "testDataset": "data.json",
            "algorithmId": "algo",
            "algorithmArgs": {},
            "mode": "upload"
        });
        assert!(schemas.task.is_valid(&valid));

        let missing = json!({"id": "t1", "mode": "upload"});
        let message = schemas.task.validate(&missing).unwrap_err();
        assert!(message.contains("testDataset"));

        let bad_mode = json!({
            "id": "t1",
            "testDataset": "data.json",
            "algorithmId": "algo",
            "algorithmArgs": {},
            "mode": "stream"
        });
        assert!(!schemas.task.is_valid(&bad_mode));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
        let schemas = SchemaStore::load(&dir).unwrap();
        let model = json!({"serviceId": "s1", "filePath": "m.json", "mode": "api"});
        assert!(schemas.for_kind(JobKind::ValidateModel).is_valid(&model));
        assert!(!schemas
            .for_kind(JobKind::ValidateDataset)
            .is_valid(&json!({"serviceId": "s1"})));
    }

    #[test]
    fn test_embedded_copies_ship_with_the_crate() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schemas");
        for (name, text) in [
            (TASK_SCHEMA_FILE, EMBEDDED_TASK),
            (VALIDATE_DATASET_SCHEMA_FILE, EMBEDDED_VALIDATE_DATASET),
            (VALIDATE_MODEL_SCHEMA_FILE, EMBEDDED_VALIDATE_MODEL),
        ] {
            assert_eq!(std::fs::read_to_string(dir.join(name)).unwrap(), text);
        }
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SchemaStore::load(dir.path()),
            Err(EngineError::Schema(_))
        ));
    }
}
