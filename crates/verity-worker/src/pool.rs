//! Process pool launcher
//!
//! The pool is sized once from the available cores:
//! - one capability-check slot, served outside this binary
//! - one service worker
//! - every remaining core runs a task worker
//!
//! Each worker is a separate process running `worker --role <role> --index <n>`.
//! The launcher returns when it is asked to stop or when any worker exits,
//! terminating the rest either way. Workers get SIGTERM first so they can
//! tear down and kill their compute process, and are killed once the
//! shutdown timeout runs out.

use crate::error::{WorkerError, WorkerResult};
use crate::role::WorkerRole;
use futures::future::select_all;
use std::future::Future;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Fewest cores the pool can run on: check, service and one task slot
pub const MIN_CORES: usize = 3;

/// Slots reserved ahead of the task workers
const RESERVED_SLOTS: usize = 2;

/// Worker layout derived from the core count
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    pub cores: usize,
    pub service_workers: usize,
    pub task_workers: usize,
}

impl PoolPlan {
    /// Refuses to plan below `min_cores` (never below [`MIN_CORES`])
    pub fn for_cores(cores: usize, min_cores: usize) -> WorkerResult<Self> {
        let required = min_cores.max(MIN_CORES);
        if cores < required {
            return Err(WorkerError::Pool(format!(
                "{} cores available, at least {} required",
                cores, required
            )));
        }
        Ok(Self {
            cores,
            service_workers: 1,
            task_workers: cores - RESERVED_SLOTS,
        })
    }

    pub fn detect(min_cores: usize) -> WorkerResult<Self> {
        let cores = std::thread::available_parallelism()?.get();
        Self::for_cores(cores, min_cores)
    }

    /// Worker processes to launch with their slot index. Index 0 is the
    /// capability-check slot and is never launched here.
    pub fn workers(&self) -> Vec<(WorkerRole, usize)> {
        let services = (1..=self.service_workers).map(|i| (WorkerRole::Service, i));
        let first_task = 1 + self.service_workers;
        let tasks = (first_task..first_task + self.task_workers).map(|i| (WorkerRole::Task, i));
        services.chain(tasks).collect()
    }
}

struct RunningWorker {
    role: WorkerRole,
    index: usize,
    child: Child,
}

/// Spawns and supervises the worker processes of a [`PoolPlan`]
pub struct PoolLauncher {
    program: PathBuf,
    config_path: Option<PathBuf>,
    envs: Vec<(String, String)>,
    plan: PoolPlan,
    shutdown_timeout: Duration,
}

impl PoolLauncher {
    pub fn new(program: impl Into<PathBuf>, plan: PoolPlan) -> Self {
        Self {
            program: program.into(),
            config_path: None,
            envs: Vec::new(),
            plan,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Pass a configuration file on to every worker
    pub fn with_config(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Set an environment variable on every worker
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn plan(&self) -> &PoolPlan {
        &self.plan
    }

    pub fn command(&self, role: WorkerRole, index: usize) -> Command {
        let mut command = Command::new(&self.program);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        command
            .arg("worker")
            .arg("--role")
            .arg(role.as_str())
            .arg("--index")
            .arg(index.to_string())
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Launch every worker, then wait for `shutdown` or the first worker
    /// exit. An unexpected exit is returned as an error.
    pub async fn run<F>(&self, shutdown: F) -> WorkerResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            cores = self.plan.cores,
            service_workers = self.plan.service_workers,
            task_workers = self.plan.task_workers,
            "Launching worker pool"
        );

        let mut workers = Vec::new();
        for (role, index) in self.plan.workers() {
            let child = self.command(role, index).spawn().map_err(|e| {
                WorkerError::Pool(format!("unable to launch {} worker {}: {}", role, index, e))
            })?;
            debug!(role = %role, index, pid = ?child.id(), "Launched worker");
            workers.push(RunningWorker { role, index, child });
        }
        if workers.is_empty() {
            return Ok(());
        }

        let exited = {
            let waits = select_all(workers.iter_mut().map(|w| Box::pin(w.child.wait())));
            tokio::select! {
                _ = shutdown => None,
                (status, position, _) = waits => Some((position, status)),
            }
        };

        let result = match exited {
            None => {
                info!("Stopping worker pool");
                Err(WorkerError::Interrupted)
            }
            Some((position, status)) => {
                let worker = workers.remove(position);
                let status = describe(status);
                error!(role = %worker.role, index = worker.index, status = %status, "Worker exited");
                Err(WorkerError::Pool(format!(
                    "{} worker {} exited: {}",
                    worker.role, worker.index, status
                )))
            }
        };

        self.terminate(workers).await;
        result
    }

    async fn terminate(&self, mut workers: Vec<RunningWorker>) {
        for worker in &mut workers {
            if let Err(e) = request_stop(&mut worker.child) {
                debug!(role = %worker.role, index = worker.index, error = %e, "Worker already gone");
            }
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        for mut worker in workers {
            match tokio::time::timeout_at(deadline, worker.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(role = %worker.role, index = worker.index, status = %status, "Worker stopped")
                }
                Ok(Err(e)) => warn!(role = %worker.role, index = worker.index, error = %e, "Unable to reap worker"),
                Err(_) => {
                    warn!(role = %worker.role, index = worker.index, "Worker did not stop in time, killing it");
                    if let Err(e) = worker.child.kill().await {
                        warn!(role = %worker.role, index = worker.index, error = %e, "Unable to kill worker");
                    }
                }
            }
        }
    }
}

/// Ask a worker to shut down
#[cfg(unix)]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM)?;
    Ok(())
}

#[cfg(not(unix))]
fn request_stop(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

fn describe(status: std::io::Result<ExitStatus>) -> String {
    match status {
        Ok(status) => status.to_string(),
        Err(e) => format!("unable to wait: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_from_cores() {
        let plan = PoolPlan::for_cores(8, 3).unwrap();
        assert_eq!(plan.service_workers, 1);
        assert_eq!(plan.task_workers, 6);

        let workers = plan.workers();
        assert_eq!(workers.len(), 7);
        assert_eq!(workers[0], (WorkerRole::Service, 1));
        assert_eq!(workers[1], (WorkerRole::Task, 2));
        assert_eq!(workers[6], (WorkerRole::Task, 7));

        assert_eq!(PoolPlan::for_cores(3, 3).unwrap().task_workers, 1);
    }

    #[test]
    fn test_refuses_too_few_cores() {
        assert!(matches!(PoolPlan::for_cores(2, 3), Err(WorkerError::Pool(_))));
        assert!(PoolPlan::for_cores(4, 6).is_err());
        // a lower configured minimum cannot go below what the layout needs
        assert!(PoolPlan::for_cores(2, 1).is_err());
    }

    #[test]
    fn test_worker_command() {
        let launcher = PoolLauncher::new("verity-worker", PoolPlan::for_cores(3, 3).unwrap())
            .with_config(Some(PathBuf::from("verity.toml")))
            .with_env("VERITY_REDIS_HOST", "redis.internal");
        let command = launcher.command(WorkerRole::Task, 2);
        let args: Vec<_> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["--config", "verity.toml", "worker", "--role", "task", "--index", "2"]
        );
        let envs: Vec<_> = command.as_std().get_envs().collect();
        assert_eq!(
            envs,
            [(
                std::ffi::OsStr::new("VERITY_REDIS_HOST"),
                Some(std::ffi::OsStr::new("redis.internal"))
            )]
        );
    }

    /// Executable worker stand-in running `body`
    #[cfg(unix)]
    fn worker_script(dir: &std::path::Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("worker.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shutdown_sends_term_to_workers() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("terminated");
        let program = worker_script(
            dir.path(),
            r#"trap 'echo "$3 $5" >> "$VERITY_TEST_MARKER"; exit 0' TERM
while true; do sleep 0.05; done"#,
        );

        let launcher = PoolLauncher::new(program, PoolPlan::for_cores(3, 3).unwrap())
            .with_env("VERITY_TEST_MARKER", marker.display().to_string())
            .with_shutdown_timeout(Duration::from_secs(5));
        let result = launcher
            .run(tokio::time::sleep(Duration::from_millis(500)))
            .await;
        assert!(matches!(result, Err(WorkerError::Interrupted)));

        let seen = std::fs::read_to_string(&marker).unwrap();
        let mut seen: Vec<_> = seen.lines().collect();
        seen.sort_unstable();
        assert_eq!(seen, ["service 1", "task 2"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stubborn_worker_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let program = worker_script(dir.path(), "trap '' TERM\nwhile true; do sleep 0.05; done");

        let launcher = PoolLauncher::new(program, PoolPlan::for_cores(3, 3).unwrap())
            .with_shutdown_timeout(Duration::from_millis(300));
        let run = launcher.run(tokio::time::sleep(Duration::from_millis(300)));
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("pool did not stop");
        assert!(matches!(result, Err(WorkerError::Interrupted)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exiting_worker_stops_pool() {
        let launcher = PoolLauncher::new("/bin/false", PoolPlan::for_cores(4, 3).unwrap())
            .with_shutdown_timeout(Duration::from_secs(2));
        let result = launcher.run(std::future::pending()).await;
        assert!(matches!(result, Err(WorkerError::Pool(message)) if message.contains("exited")));
    }
}
