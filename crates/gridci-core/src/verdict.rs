//! Verdict aggregation over job reports.

use crate::outcome::{JobOutcome, JobReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Single aggregate status of an entire run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
    Cancelled,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Success => write!(f, "success"),
            Verdict::Failure => write!(f, "failure"),
            Verdict::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fold job reports into one verdict.
///
/// Strict fail-closed policy:
/// - any `Cancelled` outcome -> `Cancelled`
/// - else any `Failure` -> `Failure`
/// - else any `Skipped` -> `Failure` (a skip is an incomplete run, and an
///   incomplete run must not gate green)
/// - else -> `Success` (an empty job set is a vacuous pass)
pub fn aggregate(reports: &[JobReport]) -> Verdict {
    let mut verdict = Verdict::Success;
    for report in reports {
        match report.outcome {
            JobOutcome::Cancelled => return Verdict::Cancelled,
            JobOutcome::Failure { .. } | JobOutcome::Skipped { .. } => {
                verdict = Verdict::Failure;
            }
            JobOutcome::Success => {}
        }
    }
    verdict
}

/// Complete result of one run: verdict plus the per-job breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique run identifier.
    pub run_id: String,

    pub verdict: Verdict,

    /// One entry per expanded job spec, in expansion order.
    pub jobs: Vec<JobReport>,

    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,

    pub generated_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(run_id: impl Into<String>, jobs: Vec<JobReport>, duration_ms: u64) -> Self {
        Self {
            run_id: run_id.into(),
            verdict: aggregate(&jobs),
            jobs,
            duration_ms,
            generated_at: Utc::now(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_success()).count()
    }

    pub fn failure_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_failure()).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_skipped()).count()
    }

    pub fn cancelled_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.outcome.is_cancelled()).count()
    }
}
