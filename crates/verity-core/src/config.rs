//! Configuration structures for verity

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for a verity worker pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerityConfig {
    /// Queue server and stream configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Broadcast control channel names
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Plugin discovery configuration
    #[serde(default)]
    pub plugins: PluginConfig,

    /// Worker configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VerityConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::Error::Configuration(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| crate::Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Merge configuration from file and environment, env vars take precedence
    pub fn load(path: Option<impl AsRef<Path>>) -> crate::Result<Self> {
        let Some(path) = path else {
            return Self::from_env();
        };
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(host) = std::env::var("VERITY_REDIS_HOST") {
            self.broker.host = host;
        }
        if let Ok(port) = std::env::var("VERITY_REDIS_PORT") {
            self.broker.port = port.parse().map_err(|_| {
                crate::Error::Configuration(format!("VERITY_REDIS_PORT is not a port: {}", port))
            })?;
        }
        if let Ok(group) = std::env::var("VERITY_CONSUMER_GROUP") {
            self.broker.consumer_group = group;
        }
        if let Ok(stream) = std::env::var("VERITY_TASK_STREAM") {
            self.broker.task_stream = stream;
        }
        if let Ok(stream) = std::env::var("VERITY_SERVICE_STREAM") {
            self.broker.service_stream = stream;
        }
        if let Ok(root) = std::env::var("VERITY_PLUGIN_ROOT") {
            self.plugins.root = PathBuf::from(root);
        }
        if let Ok(dir) = std::env::var("VERITY_SCHEMA_DIR") {
            self.plugins.schema_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("VERITY_LOG_DIR") {
            self.worker.log_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("VERITY_ERROR_DIR") {
            self.worker.error_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("VERITY_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }
}

/// Queue server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Redis host
    #[serde(default = "default_host")]
    pub host: String,

    /// Redis port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connection pool size
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Consumer group shared by every worker
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Stream carrying algorithm tasks
    #[serde(default = "default_task_stream")]
    pub task_stream: String,

    /// Stream carrying dataset/model validation services
    #[serde(default = "default_service_stream")]
    pub service_stream: String,

    /// How long a stream read blocks before returning empty
    #[serde(default = "default_read_block_ms")]
    pub read_block_ms: u64,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6379
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_pool_size() -> usize {
    4
}

fn default_consumer_group() -> String {
    "MyGroup".to_string()
}

fn default_task_stream() -> String {
    "TestEngineTask".to_string()
}

fn default_service_stream() -> String {
    "TestEngineService".to_string()
}

fn default_read_block_ms() -> u64 {
    2000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_secs: default_connect_timeout(),
            pool_size: default_pool_size(),
            consumer_group: default_consumer_group(),
            task_stream: default_task_stream(),
            service_stream: default_service_stream(),
            read_block_ms: default_read_block_ms(),
        }
    }
}

impl BrokerConfig {
    /// Redis connection URL built from host and port
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Stream read block as a duration
    pub fn read_block(&self) -> Duration {
        Duration::from_millis(self.read_block_ms)
    }
}

/// Broadcast channel names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default = "default_cancel_channel")]
    pub cancel: String,

    #[serde(default = "default_algo_install_channel")]
    pub algo_install: String,

    #[serde(default = "default_algo_update_channel")]
    pub algo_update: String,

    #[serde(default = "default_algo_delete_channel")]
    pub algo_delete: String,

    /// Outbound alert channel
    #[serde(default = "default_alert_channel")]
    pub alert: String,
}

fn default_cancel_channel() -> String {
    "task.cancel".to_string()
}

fn default_algo_install_channel() -> String {
    "algo.install".to_string()
}

fn default_algo_update_channel() -> String {
    "algo.update".to_string()
}

fn default_algo_delete_channel() -> String {
    "algo.delete".to_string()
}

fn default_alert_channel() -> String {
    "alert".to_string()
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            cancel: default_cancel_channel(),
            algo_install: default_algo_install_channel(),
            algo_update: default_algo_update_channel(),
            algo_delete: default_algo_delete_channel(),
            alert: default_alert_channel(),
        }
    }
}

/// Plugin discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directory tree scanned for plugin manifests at startup
    #[serde(default = "default_plugin_root")]
    pub root: PathBuf,

    /// Directory holding the job payload JSON schemas
    #[serde(default = "default_schema_dir")]
    pub schema_dir: PathBuf,

    /// Key prefix of the algorithm install directory hashes
    #[serde(default = "default_algorithm_key_prefix")]
    pub algorithm_key_prefix: String,
}

fn default_plugin_root() -> PathBuf {
    PathBuf::from("./plugins")
}

fn default_schema_dir() -> PathBuf {
    PathBuf::from("./schemas")
}

fn default_algorithm_key_prefix() -> String {
    "algo:".to_string()
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            root: default_plugin_root(),
            schema_dir: default_schema_dir(),
            algorithm_key_prefix: default_algorithm_key_prefix(),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Consumer name prefix, the slot index is appended
    #[serde(default = "default_consumer_prefix")]
    pub consumer_prefix: String,

    /// Minimum number of cores required to launch the pool
    #[serde(default = "default_min_cores")]
    pub min_cores: usize,

    /// Directory for per-job log files
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Directory for per-job error records
    #[serde(default = "default_error_dir")]
    pub error_dir: PathBuf,

    /// How long to wait for a compute result after the child exits
    #[serde(default = "default_result_grace_ms")]
    pub result_grace_ms: u64,

    /// Program run as the isolated compute child (defaults to this executable)
    pub compute_program: Option<PathBuf>,

    /// Graceful shutdown timeout in seconds for pool children
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

fn default_consumer_prefix() -> String {
    "Worker".to_string()
}

fn default_min_cores() -> usize {
    3
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_error_dir() -> PathBuf {
    PathBuf::from("./errors")
}

fn default_result_grace_ms() -> u64 {
    1000
}

fn default_shutdown_timeout() -> u64 {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            consumer_prefix: default_consumer_prefix(),
            min_cores: default_min_cores(),
            log_dir: default_log_dir(),
            error_dir: default_error_dir(),
            result_grace_ms: default_result_grace_ms(),
            compute_program: None,
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

impl WorkerConfig {
    /// Consumer identity for a worker slot. Stable across restarts so the
    /// pending backlog of a crashed slot is picked up by its replacement.
    pub fn consumer_name(&self, index: usize) -> String {
        format!("{}{}", self.consumer_prefix, index)
    }

    pub fn result_grace(&self) -> Duration {
        Duration::from_millis(self.result_grace_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty or compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional env filter directive, overrides `level`
    pub env_filter: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            env_filter: None,
        }
    }
}
