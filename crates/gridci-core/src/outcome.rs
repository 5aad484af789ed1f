//! Job outcomes and per-job reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobOutcome {
    /// The job ran and exited cleanly.
    Success,

    /// The job ran and failed, or could not be run at all.
    Failure {
        /// True when the failure was a forced termination at the deadline.
        timed_out: bool,
    },

    /// A prerequisite was unmet; the job never started.
    Skipped { reason: String },

    /// The enclosing run was cancelled before or during execution.
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failure { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }

    pub fn timed_out(&self) -> bool {
        matches!(self, JobOutcome::Failure { timed_out: true })
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Success => write!(f, "success"),
            JobOutcome::Failure { timed_out: true } => write!(f, "failure (timeout)"),
            JobOutcome::Failure { timed_out: false } => write!(f, "failure"),
            JobOutcome::Skipped { reason } => write!(f, "skipped ({reason})"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything recorded about one scheduled job.
///
/// Exactly one report exists per expanded job spec; a scheduled job is never
/// left in an unknown state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Job id from the spec.
    pub job_id: String,

    pub outcome: JobOutcome,

    /// Process exit code, when the job got as far as spawning.
    pub exit_code: Option<i32>,

    /// Combined captured output.
    pub log: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    /// Report for a job that never started.
    pub fn unstarted(job_id: impl Into<String>, outcome: JobOutcome) -> Self {
        Self {
            job_id: job_id.into(),
            outcome,
            exit_code: None,
            log: String::new(),
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }
}
