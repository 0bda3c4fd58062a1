//! Redis update backend

use crate::traits::{Backend, BackendError, BackendResult};
use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use verity_core::BrokerConfig;

/// Redis backend implementation
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    config: Arc<RedisBackendConfig>,
}

/// Configuration for Redis backend
#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    /// Connection URL
    pub url: String,

    /// Pool size
    pub pool_size: usize,

    /// Bound on establishing a connection
    pub connect_timeout: Duration,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 4,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&BrokerConfig> for RedisBackendConfig {
    fn from(config: &BrokerConfig) -> Self {
        Self {
            url: config.url(),
            pool_size: config.pool_size,
            connect_timeout: config.connect_timeout(),
        }
    }
}

impl RedisBackend {
    /// Connect with default settings
    pub async fn connect(url: &str) -> BackendResult<Self> {
        let config = RedisBackendConfig {
            url: url.to_string(),
            ..Default::default()
        };
        Self::with_config(config).await
    }

    /// Create a new Redis backend with custom config
    pub async fn with_config(config: RedisBackendConfig) -> BackendResult<Self> {
        let cfg = Config::from_url(&config.url);
        let pool = cfg
            .builder()
            .map_err(|e| BackendError::Connection(e.to_string()))?
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        // Test connection
        let ping = async {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| BackendError::Connection(e.to_string()))?;
            redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await
                .map_err(|e| BackendError::Connection(e.to_string()))
        };
        tokio::time::timeout(config.connect_timeout, ping)
            .await
            .map_err(|_| {
                BackendError::Connection(format!("timed out connecting to {}", config.url))
            })??;

        info!("Connected to Redis backend at {}", config.url);

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> BackendResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| BackendError::Pool(e.to_string()))
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn is_connected(&self) -> bool {
        if let Ok(mut conn) = self.get_conn().await {
            redis::cmd("PING")
                .query_async::<_, String>(&mut *conn)
                .await
                .is_ok()
        } else {
            false
        }
    }

    async fn store_hash(&self, key: &str, fields: &[(String, String)]) -> BackendResult<()> {
        let mut conn = self.get_conn().await?;
        let mut pipe = redis::pipe();
        pipe.atomic().del(key).ignore();
        if !fields.is_empty() {
            pipe.hset_multiple(key, fields).ignore();
        }
        pipe.query_async::<_, ()>(&mut *conn)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?;

        debug!(key = %key, fields = fields.len(), "Stored hash");
        Ok(())
    }

    async fn get_hash(&self, key: &str) -> BackendResult<Option<HashMap<String, String>>> {
        let mut conn = self.get_conn().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| BackendError::Retrieval(e.to_string()))?;

        Ok(if fields.is_empty() { None } else { Some(fields) })
    }

    async fn delete(&self, key: &str) -> BackendResult<bool> {
        let mut conn = self.get_conn().await?;
        let deleted: i32 = conn
            .del(key)
            .await
            .map_err(|e| BackendError::Storage(e.to_string()))?;

        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_core::{JobKind, JobResponse, TaskResponse, TaskStatus};

    // These tests require a running Redis instance
    // Run with: cargo test --package verity-backend -- --ignored

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_redis_backend_connect() {
        let backend = RedisBackend::connect("redis://localhost:6379")
            .await
            .unwrap();
        assert!(backend.is_connected().await);
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_store_and_get_update() {
        let backend = RedisBackend::connect("redis://localhost:6379")
            .await
            .unwrap();

        let job_id = format!("backend-test-{}", std::process::id());
        let response = JobResponse::Task(TaskResponse {
            response_type: "TaskResponse",
            status: TaskStatus::Running,
            elapsed_time: 0,
            start_time: "2024-01-01T00:00:00+00:00".to_string(),
            output: String::new(),
            error_messages: None,
            log_file: "t.log".to_string(),
            task_progress: 40,
        });

        backend
            .store_update(JobKind::Task, &job_id, &response)
            .await
            .unwrap();

        let fields = backend
            .get_update(JobKind::Task, &job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fields["status"], "Running");
        assert_eq!(fields["taskProgress"], "40");

        assert!(backend.delete(&format!("task:{}", job_id)).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires Redis"]
    async fn test_update_replaces_earlier_fields() {
        let backend = RedisBackend::connect("redis://localhost:6379")
            .await
            .unwrap();

        let job_id = format!("backend-replace-{}", std::process::id());
        let mut response = TaskResponse {
            response_type: "TaskResponse",
            status: TaskStatus::Error,
            elapsed_time: 1,
            start_time: "2024-01-01T00:00:00+00:00".to_string(),
            output: String::new(),
            error_messages: Some("boom".to_string()),
            log_file: "t.log".to_string(),
            task_progress: 10,
        };
        backend
            .store_update(JobKind::Task, &job_id, &JobResponse::Task(response.clone()))
            .await
            .unwrap();

        response.status = TaskStatus::Success;
        response.error_messages = None;
        backend
            .store_update(JobKind::Task, &job_id, &JobResponse::Task(response))
            .await
            .unwrap();

        let fields = backend
            .get_update(JobKind::Task, &job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fields["status"], "Success");
        assert!(!fields.contains_key("errorMessages"));

        assert!(backend.delete(&format!("task:{}", job_id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = RedisBackendConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        assert!(matches!(
            RedisBackend::with_config(config).await,
            Err(BackendError::Connection(_))
        ));
    }
}
