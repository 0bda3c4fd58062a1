//! Progress reporting for long running algorithms

use std::sync::Arc;

/// Callback receiving completion percentages (0-100)
#[derive(Clone)]
pub struct ProgressReporter(Arc<dyn Fn(u8) + Send + Sync>);

impl ProgressReporter {
    pub fn new(report: impl Fn(u8) + Send + Sync + 'static) -> Self {
        Self(Arc::new(report))
    }

    /// Reporter that drops every update
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    pub fn report(&self, percent: u8) {
        (self.0)(percent.min(100))
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Completed-over-total counter that reports on every update
#[derive(Debug, Clone)]
pub struct SimpleProgress {
    total: u64,
    completed: u64,
    reporter: Option<ProgressReporter>,
}

impl SimpleProgress {
    pub fn new(total: u64, reporter: Option<ProgressReporter>) -> Self {
        Self {
            total,
            completed: 0,
            reporter,
        }
    }

    pub fn add_total(&mut self, total: u64) {
        self.total += total;
    }

    /// Record `completed` more items and report the new percentage
    pub fn update(&mut self, completed: u64) {
        self.completed += completed;
        if let Some(reporter) = &self.reporter {
            reporter.report(self.percent());
        }
    }

    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed.min(self.total) * 100) / self.total) as u8
    }
}
