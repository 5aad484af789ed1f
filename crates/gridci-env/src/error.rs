//! Error types for the environment layer.

/// Errors produced while resolving, building, or publishing environments.
#[derive(Debug, thiserror::Error)]
pub enum EnvError {
    #[error(
        "environment {fingerprint} unavailable: pull failed ({pull_error}); build failed ({build_error})"
    )]
    EnvironmentUnavailable {
        fingerprint: String,
        pull_error: String,
        build_error: String,
    },

    #[error("pull of {fingerprint} failed: {detail}")]
    PullFailed { fingerprint: String, detail: String },

    #[error("build of {fingerprint} exited with code {exit_code}: {detail}")]
    BuildFailed {
        fingerprint: String,
        exit_code: i32,
        detail: String,
    },

    #[error("build of {fingerprint} timed out after {timeout_secs}s")]
    BuildTimeout {
        fingerprint: String,
        timeout_secs: u64,
    },

    #[error("push of {fingerprint} failed: {detail}")]
    PushFailed { fingerprint: String, detail: String },

    #[error("registry {url} unreachable: {detail}")]
    RegistryUnreachable { url: String, detail: String },

    #[error("credential store error: {0}")]
    CredentialStore(String),

    #[error("build process error: {0}")]
    BuildIo(#[from] std::io::Error),
}
