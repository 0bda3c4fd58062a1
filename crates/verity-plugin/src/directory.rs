//! Remote algorithm install locations

use crate::error::RegistryResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Looks up where an algorithm plugin has been installed
#[async_trait]
pub trait AlgorithmDirectory: Send + Sync {
    /// Install path of `algorithm_id`, `None` if it is not installable
    async fn locate(&self, algorithm_id: &str) -> RegistryResult<Option<PathBuf>>;
}

/// Fixed id to path table
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    paths: HashMap<String, PathBuf>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, algorithm_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.paths.insert(algorithm_id.into(), path.into());
        self
    }
}

#[async_trait]
impl AlgorithmDirectory for StaticDirectory {
    async fn locate(&self, algorithm_id: &str) -> RegistryResult<Option<PathBuf>> {
        Ok(self.paths.get(algorithm_id).cloned())
    }
}
