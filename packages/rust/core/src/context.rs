//! Per-run state threaded through the pipeline stages.

use chrono::{DateTime, Utc};
use tracing::warn;

use docharvest_crawler::CancelToken;
use docharvest_shared::{RunConfig, RunId, RunReport};

/// Everything one pipeline invocation owns. Nothing here outlives the run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    pub cancel: CancelToken,
    warnings: Vec<String>,
}

impl RunContext {
    pub fn new(config: RunConfig) -> Self {
        Self {
            run_id: RunId::new(),
            config,
            started_at: Utc::now(),
            cancel: CancelToken::new(),
            warnings: Vec::new(),
        }
    }

    /// Share a cancellation token (e.g. one tripped by Ctrl-C).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record a non-fatal problem for the final report.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(run_id = %self.run_id, %message, "run warning");
        self.warnings.push(message);
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// A report for this run with zeroed counters.
    pub fn empty_report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.to_string(),
            started_at: Some(self.started_at),
            finished_at: Some(Utc::now()),
            warnings: self.warnings.clone(),
            ..Default::default()
        }
    }
}
