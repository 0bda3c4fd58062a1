//! Isolated compute processes
//!
//! Each algorithm run gets its own child process. The child reads a
//! [`ComputeRequest`] from stdin and reports [`ComputeEvent`] lines on
//! stdout. A reader task forwards progress on an unbounded channel and the
//! final result on a channel of capacity one.

use crate::error::{EngineError, EngineResult};
use crate::protocol::{ComputeEvent, ComputeRequest, ComputeResult};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default time to wait for a result after the child exited
pub const DEFAULT_RESULT_GRACE: Duration = Duration::from_millis(500);

/// Launches compute processes
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
    result_grace: Duration,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            result_grace: DEFAULT_RESULT_GRACE,
        }
    }

    /// The running executable's `compute` subcommand
    pub fn current_exe() -> EngineResult<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program).with_args(["compute"]))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_result_grace(mut self, grace: Duration) -> Self {
        self.result_grace = grace;
        self
    }

    pub fn result_grace(&self) -> Duration {
        self.result_grace
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Start a child and hand it the request
    pub async fn spawn(&self, request: &ComputeRequest) -> EngineResult<SandboxProcess> {
        let mut payload = serde_json::to_vec(request)
            .map_err(|e| EngineError::Sandbox(format!("unable to encode request: {}", e)))?;
        payload.push(b'\n');

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Sandbox(format!(
                    "unable to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child may exit without reading its request
            match stdin.write_all(&payload).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    debug!(job_id = %request.job_id, "Compute process closed stdin early");
                }
                Err(e) => {
                    return Err(EngineError::Sandbox(format!(
                        "unable to send request: {}",
                        e
                    )))
                }
            }
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Sandbox("child stdout not captured".to_string()))?;

        let (progress_tx, progress) = mpsc::unbounded_channel();
        let (result_tx, results) = mpsc::channel(1);
        let job_id = request.job_id.clone();

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Error reading compute output");
                        break;
                    }
                };
                match ComputeEvent::parse(&line) {
                    Some(ComputeEvent::Progress { percent }) => {
                        let _ = progress_tx.send(percent.min(100));
                    }
                    Some(ComputeEvent::Finished { success, value }) => {
                        if result_tx.try_send(ComputeResult { success, value }).is_err() {
                            warn!(job_id = %job_id, "Ignoring extra compute result");
                        }
                    }
                    None => debug!(job_id = %job_id, line = %line, "Compute output"),
                }
            }
        });

        Ok(SandboxProcess {
            child,
            progress,
            results,
            reader,
        })
    }
}

/// A running compute process and its event channels. Dropping the child
/// kills the process.
pub struct SandboxProcess {
    pub child: Child,
    pub progress: mpsc::UnboundedReceiver<u8>,
    pub results: mpsc::Receiver<ComputeResult>,
    pub reader: JoinHandle<()>,
}
