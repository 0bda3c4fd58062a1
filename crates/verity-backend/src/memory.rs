//! In-memory update backend
//!
//! Keeps every hash in process memory and records the full history of
//! updates per key. Availability can be switched off to simulate a lost
//! connection.

use crate::traits::{Backend, BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    hashes: HashMap<String, HashMap<String, String>>,
    history: HashMap<String, Vec<HashMap<String, String>>>,
}

/// In-memory backend, clones share state
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with a connection error
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Every `store_hash` call made on `key`, oldest first
    pub fn history(&self, key: &str) -> Vec<HashMap<String, String>> {
        self.lock().history.get(key).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Connection("backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn is_connected(&self) -> bool {
        self.check().is_ok()
    }

    async fn store_hash(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        self.check()?;
        let mut state = self.lock();
        let hash: HashMap<String, String> = fields.iter().cloned().collect();
        let snapshot = hash.clone();
        if hash.is_empty() {
            state.hashes.remove(key);
        } else {
            state.hashes.insert(key.to_string(), hash);
        }
        state
            .history
            .entry(key.to_string())
            .or_default()
            .push(snapshot);
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> BackendResult<Option<HashMap<String, String>>> {
        self.check()?;
        Ok(self.lock().hashes.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        self.check()?;
        Ok(self.lock().hashes.remove(key).is_some())
    }
}
