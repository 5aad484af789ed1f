//! Error types for the execution layer.

use gridci_core::MatrixError;
use gridci_env::EnvError;

/// Errors produced while orchestrating or executing a run.
///
/// Per-job failures (timeouts, non-zero exits, unmet prerequisites) are not
/// errors at this level; they are recorded in the job's report. Only fatal
/// pre-expansion problems and probe-artifact handling surface here.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("invalid matrix: {0}")]
    InvalidMatrix(#[from] MatrixError),

    #[error("environment error: {0}")]
    Environment(#[from] EnvError),

    #[error("platform probe '{job_id}' produced unusable output: {detail}")]
    ProbeOutput { job_id: String, detail: String },

    #[error("platform probe '{job_id}' failed: {detail}")]
    ProbeFailed { job_id: String, detail: String },

    #[error("platform probe '{job_id}' timed out after {timeout_secs}s")]
    ProbeTimedOut { job_id: String, timeout_secs: u64 },

    #[error("platform probe '{job_id}' cancelled")]
    ProbeCancelled { job_id: String },
}

/// Result type for execution operations.
pub type ExecResult<T> = std::result::Result<T, ExecError>;
