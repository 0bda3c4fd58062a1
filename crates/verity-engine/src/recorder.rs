//! Per-job log file and error record list

use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use verity_core::{ErrorList, ErrorRecord};

/// Writes `<log_dir>/<job>.log` and, when errors were recorded,
/// `<error_dir>/<job>.json`.
///
/// Pending records are flushed on drop so an abandoned job still leaves
/// its error file behind.
pub struct JobRecorder {
    job_id: String,
    log_path: PathBuf,
    error_path: PathBuf,
    log: Option<File>,
    errors: ErrorList,
    flushed: bool,
}

impl JobRecorder {
    pub fn open(job_id: &str, log_dir: &Path, error_dir: &Path) -> Self {
        let log_path = log_dir.join(format!("{}.log", job_id));
        let error_path = error_dir.join(format!("{}.json", job_id));

        let log = fs::create_dir_all(log_dir)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&log_path));
        let log = match log {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(job_id = %job_id, path = %log_path.display(), error = %e, "Unable to open job log");
                None
            }
        };

        Self {
            job_id: job_id.to_string(),
            log_path,
            error_path,
            log,
            errors: ErrorList::new(),
            flushed: false,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Path reported as `logFile`
    pub fn log_file(&self) -> String {
        self.log_path.display().to_string()
    }

    pub fn error_file(&self) -> &Path {
        &self.error_path
    }

    fn write_line(&mut self, level: &str, message: &str) {
        if let Some(file) = &mut self.log {
            let line = format!("{} {:<5} {}\n", Utc::now().to_rfc3339(), level, message);
            if let Err(e) = file.write_all(line.as_bytes()) {
                warn!(job_id = %self.job_id, error = %e, "Unable to write job log");
                self.log = None;
            }
        }
    }

    pub fn info(&mut self, message: &str) {
        info!(job_id = %self.job_id, "{}", message);
        self.write_line("INFO", message);
    }

    pub fn warn(&mut self, message: &str) {
        warn!(job_id = %self.job_id, "{}", message);
        self.write_line("WARN", message);
    }

    /// Append an error record and log its description
    pub fn record(&mut self, record: ErrorRecord) {
        error!(job_id = %self.job_id, code = %record.code, "{}", record.description);
        let line = format!("[{}] {}", record.code, record.description);
        self.write_line("ERROR", &line);
        self.errors.push(record);
        self.flushed = false;
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    /// JSON encoded error list, `None` when nothing was recorded
    pub fn error_messages(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(self.errors.to_json_string())
        }
    }

    /// Write the error file and flush the log
    pub fn flush(&mut self) -> io::Result<()> {
        self.flushed = true;
        if let Some(file) = &mut self.log {
            file.flush()?;
        }
        if self.errors.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.error_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.error_path, self.errors.to_json_string())
    }
}

impl Drop for JobRecorder {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        if let Err(e) = self.flush() {
            warn!(job_id = %self.job_id, error = %e, "Unable to flush error records");
        }
    }
}
