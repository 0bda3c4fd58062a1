//! Common test utilities and fixtures

use crate::fixtures::scenario_registry;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::oneshot;
use verity_backend::{Backend, MemoryBackend};
use verity_broker::{Broker, MemoryBroker};
use verity_core::{JobKind, VerityConfig};
use verity_engine::{Engine, EngineSettings, ProcessSandbox, SchemaStore};
use verity_plugin::Registry;
use verity_worker::{Worker, WorkerError, WorkerResult, WorkerRole};

static INIT: Once = Once::new();

/// How long scenario helpers wait for a worker to react
pub const WAIT: Duration = Duration::from_secs(10);

/// Initialize test environment (logging, etc.)
pub fn init() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("verity_engine=debug,verity_worker=debug,verity_plugin=debug")
            .try_init();
    });
}

/// Check if Redis is available for integration tests
pub async fn redis_available() -> bool {
    matches!(
        tokio::time::timeout(
            Duration::from_secs(1),
            tokio::net::TcpStream::connect("localhost:6379"),
        )
        .await,
        Ok(Ok(_))
    )
}

/// Generate a unique stream, group or channel name
pub fn unique_name(prefix: &str) -> String {
    format!(
        "{}_{}",
        prefix,
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Compute process replaced by a shell script speaking the event protocol
pub fn script_sandbox(script: &str) -> ProcessSandbox {
    ProcessSandbox::new("/bin/sh")
        .with_args(["-c", script])
        .with_result_grace(Duration::from_millis(500))
}

/// Event line printed by a scripted compute process
pub fn progress_line(percent: u8) -> String {
    format!(r#"echo '{{"event":"progress","percent":{}}}'"#, percent)
}

pub fn finished_line(success: bool, value: &Value) -> String {
    format!(
        "echo '{}'",
        json!({"event": "finished", "success": success, "value": value})
    )
}

pub fn task_payload(id: &str, dataset: &Path, model: &Path, algorithm: &str) -> Value {
    json!({
        "id": id,
        "testDataset": dataset.display().to_string(),
        "algorithmId": algorithm,
        "algorithmArgs": {},
        "mode": "upload",
        "modelFile": model.display().to_string(),
    })
}

pub fn status(update: &HashMap<String, String>) -> &str {
    update.get("status").map(String::as_str).unwrap_or_default()
}

pub fn is_terminal(update: &HashMap<String, String>) -> bool {
    matches!(
        status(update),
        "Success" | "Error" | "Cancelled" | "done" | "error"
    )
}

/// Run `worker` until `driver` completes. The interrupt that stops the
/// worker afterwards is the expected ending and maps to `Ok`.
pub async fn run_worker_until<B, S, F>(worker: &Worker<B, S>, driver: F) -> WorkerResult<()>
where
    B: Broker,
    S: Backend,
    F: Future<Output = ()>,
{
    let (stop, stopped) = oneshot::channel::<()>();
    let driver = async move {
        driver.await;
        let _ = stop.send(());
    };
    let shutdown = async {
        let _ = stopped.await;
    };
    let (result, ()) = tokio::join!(worker.run(shutdown), driver);
    match result {
        Err(WorkerError::Interrupted) => Ok(()),
        other => other,
    }
}

/// In-memory deployment with scratch directories and fixture plugins
pub struct Scenario {
    pub dir: TempDir,
    pub broker: MemoryBroker,
    pub backend: MemoryBackend,
    pub config: VerityConfig,
    pub registry: Arc<Registry>,
}

impl Scenario {
    pub fn new() -> Self {
        init();
        let dir = tempfile::tempdir().expect("scratch directory");
        let mut config = VerityConfig::default();
        config.worker.log_dir = dir.path().join("logs");
        config.worker.error_dir = dir.path().join("errors");
        Self {
            dir,
            broker: MemoryBroker::new(),
            backend: MemoryBackend::new(),
            config,
            registry: Arc::new(scenario_registry()),
        }
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("write fixture file");
        path
    }

    /// `valid.sav` table and `model.sav` fixture model
    pub fn upload_files(&self) -> (PathBuf, PathBuf) {
        let dataset = self.write(
            "valid.sav",
            r#"{"columns": ["age", "income", "label"], "rows": [[31, 1200, 0], [45, 3100, 1]]}"#,
        );
        let model = self.write("model.sav", r#"{"model": "linear"}"#);
        (dataset, model)
    }

    pub fn engine(&self, sandbox: ProcessSandbox) -> Arc<Engine> {
        Arc::new(Engine::new(
            Arc::clone(&self.registry),
            SchemaStore::embedded().expect("embedded schemas"),
            sandbox,
            EngineSettings {
                log_dir: self.config.worker.log_dir.clone(),
                error_dir: self.config.worker.error_dir.clone(),
                plugin_root: None,
            },
        ))
    }

    pub fn worker(
        &self,
        role: WorkerRole,
        sandbox: ProcessSandbox,
    ) -> Worker<MemoryBroker, MemoryBackend> {
        Worker::new(
            role,
            self.broker.clone(),
            self.backend.clone(),
            self.engine(sandbox),
            &self.config,
            1,
        )
        .with_read_block(Duration::from_millis(20))
    }

    pub fn stream(&self, role: WorkerRole) -> &str {
        role.stream(&self.config.broker)
    }

    pub async fn submit_task(&self, payload: &Value) -> String {
        let payload = payload.to_string();
        self.broker
            .add_entry(self.stream(WorkerRole::Task), &[("task", payload.as_str())])
            .await
            .expect("submit task")
    }

    pub async fn submit_service(&self, kind: JobKind, payload: &Value) -> String {
        let payload = payload.to_string();
        self.broker
            .add_entry(
                self.stream(WorkerRole::Service),
                &[(kind.stream_field(), payload.as_str())],
            )
            .await
            .expect("submit service")
    }

    pub fn pending(&self, role: WorkerRole) -> Vec<String> {
        self.broker
            .pending_ids(self.stream(role), &self.config.broker.consumer_group)
    }

    /// Poll the backend until the job's latest update satisfies `done`
    pub async fn wait_for_update<P>(&self, kind: JobKind, id: &str, done: P) -> HashMap<String, String>
    where
        P: Fn(&HashMap<String, String>) -> bool,
    {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if let Ok(Some(update)) = self.backend.get_update(kind, id).await {
                if done(&update) {
                    return update;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for an update of {}",
                id
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Every update stored for a job, oldest first
    pub fn history(&self, kind: JobKind, id: &str) -> Vec<HashMap<String, String>> {
        self.backend
            .history(&verity_backend::update_key(kind, id))
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}
