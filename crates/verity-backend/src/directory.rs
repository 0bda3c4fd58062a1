//! Algorithm install directory backed by the update store

use crate::traits::Backend;
use async_trait::async_trait;
use std::path::PathBuf;
use verity_plugin::{AlgorithmDirectory, RegistryError, RegistryResult};

/// Hash field holding the install path
pub const ALGORITHM_PATH_FIELD: &str = "algoPath";

/// Reads `<prefix><algorithm id>` hashes
#[derive(Clone)]
pub struct BackendDirectory<B: Backend> {
    backend: B,
    key_prefix: String,
}

impl<B: Backend> BackendDirectory<B> {
    pub fn new(backend: B, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, algorithm_id: &str) -> String {
        format!("{}{}", self.key_prefix, algorithm_id)
    }
}

#[async_trait]
impl<B: Backend> AlgorithmDirectory for BackendDirectory<B> {
    async fn locate(&self, algorithm_id: &str) -> RegistryResult<Option<PathBuf>> {
        let fields = self
            .backend
            .get_hash(&self.key(algorithm_id))
            .await
            .map_err(|e| RegistryError::Directory(e.to_string()))?;

        Ok(fields
            .and_then(|mut fields| fields.remove(ALGORITHM_PATH_FIELD))
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from))
    }
}
