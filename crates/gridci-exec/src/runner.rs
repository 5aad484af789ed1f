//! Job execution: one spec, one environment, one typed outcome.

use crate::executor::Executor;
use gridci_core::{JobOutcome, JobReport, JobSpec, TargetPlatform};
use gridci_env::{CredentialProvider, EnvironmentHandle};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Launch prefix wrapping the job into the environment's runtime; the
    /// image reference is appended after it. An empty launcher runs the
    /// payload directly, for environments materialized onto the host (and
    /// for tests).
    pub launcher: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            launcher: vec![
                "docker".to_string(),
                "run".to_string(),
                "--rm".to_string(),
            ],
        }
    }
}

impl RunnerConfig {
    /// Run payloads directly, without a container launcher.
    pub fn direct() -> Self {
        Self { launcher: Vec::new() }
    }
}

/// Raw result of a spawned command.
pub(crate) struct CapturedRun {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Build the argv for a spec inside an environment, applying the emulation
/// shim for foreign targets.
pub(crate) fn build_argv(
    config: &RunnerConfig,
    host: &TargetPlatform,
    spec: &JobSpec,
    env: &EnvironmentHandle,
) -> Vec<String> {
    let executor = Executor::for_target(host, spec.target.as_ref());
    let wrapped = executor.wrap(&spec.command);
    if config.launcher.is_empty() {
        wrapped
    } else {
        let mut argv = config.launcher.clone();
        argv.push(env.reference().to_string());
        argv.extend(wrapped);
        argv
    }
}

/// Spawn `argv`, capturing output, racing completion against the timeout and
/// run-level cancellation. The child is killed when either loses the race.
pub(crate) async fn spawn_captured(
    argv: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> std::io::Result<CapturedRun> {
    let (exe, args) = argv
        .split_first()
        .ok_or_else(|| std::io::Error::other("empty command"))?;

    let child = Command::new(exe)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    // Dropping `wait_with_output` kills the child (kill_on_drop), which
    // bounds the grace period after a timeout or cancellation.
    tokio::select! {
        output = child.wait_with_output() => {
            let output = output?;
            Ok(CapturedRun {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
                cancelled: false,
            })
        }
        _ = tokio::time::sleep(timeout) => {
            Ok(CapturedRun {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: true,
                cancelled: false,
            })
        }
        _ = cancel.cancelled() => {
            Ok(CapturedRun {
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
                cancelled: true,
            })
        }
    }
}

/// Executes one job spec inside an acquired environment.
pub struct JobRunner {
    config: RunnerConfig,
    credentials: Arc<dyn CredentialProvider>,
    host: TargetPlatform,
}

impl JobRunner {
    pub fn new(config: RunnerConfig, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            credentials,
            host: TargetPlatform::host(),
        }
    }

    /// Override the host platform (used to exercise emulation paths in tests).
    pub fn with_host(mut self, host: TargetPlatform) -> Self {
        self.host = host;
        self
    }

    /// Run one job to a report.
    ///
    /// Every scheduled spec gets exactly one report: unmet prerequisites map
    /// to `Skipped`, timeouts to `Failure` with the timeout marker,
    /// cancellation to `Cancelled`, spawn errors to `Failure`. Nothing is
    /// ever left unknown.
    pub async fn run(
        &self,
        spec: &JobSpec,
        env: &EnvironmentHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> JobReport {
        if cancel.is_cancelled() {
            return JobReport::unstarted(&spec.id, JobOutcome::Cancelled);
        }

        // Prerequisites first: a job we cannot run is skipped, not failed.
        for prerequisite in &spec.requires {
            let available = match self.credentials.get(prerequisite).await {
                Ok(found) => found.is_some(),
                Err(err) => {
                    warn!(job = %spec.id, prerequisite = %prerequisite, error = %err, "credential lookup failed");
                    false
                }
            };
            if !available {
                info!(job = %spec.id, prerequisite = %prerequisite, "prerequisite unmet, skipping");
                return JobReport::unstarted(
                    &spec.id,
                    JobOutcome::Skipped {
                        reason: format!("missing prerequisite: {prerequisite}"),
                    },
                );
            }
        }

        let argv = build_argv(&self.config, &self.host, spec, env);
        debug!(job = %spec.id, command = ?argv, timeout_secs = timeout.as_secs(), "starting job");

        let start = Instant::now();
        let captured = match spawn_captured(&argv, timeout, cancel).await {
            Ok(captured) => captured,
            Err(err) => {
                warn!(job = %spec.id, error = %err, "failed to spawn job");
                return JobReport {
                    job_id: spec.id.clone(),
                    outcome: JobOutcome::Failure { timed_out: false },
                    exit_code: None,
                    log: format!("failed to spawn job: {err}"),
                    duration_ms: start.elapsed().as_millis() as u64,
                    finished_at: Utc::now(),
                };
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut log = captured.stdout;
        if !captured.stderr.is_empty() {
            if !log.is_empty() {
                log.push('\n');
            }
            log.push_str(&captured.stderr);
        }

        let outcome = if captured.cancelled {
            info!(job = %spec.id, "job cancelled");
            JobOutcome::Cancelled
        } else if captured.timed_out {
            warn!(job = %spec.id, timeout_secs = timeout.as_secs(), "job timed out, terminated");
            log.push_str(&format!(
                "\njob timed out after {}s and was terminated",
                timeout.as_secs()
            ));
            JobOutcome::Failure { timed_out: true }
        } else if captured.exit_code == Some(0) {
            JobOutcome::Success
        } else {
            JobOutcome::Failure { timed_out: false }
        };

        JobReport {
            job_id: spec.id.clone(),
            outcome,
            exit_code: captured.exit_code,
            log,
            duration_ms,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridci_core::{fingerprint, EnvironmentInputs, JobKind, Prerequisite};
    use gridci_env::fakes::NullCredentials;
    use gridci_env::{Credential, EnvironmentImage, ResolutionSource, StaticCredentials};
    use std::collections::BTreeMap;

    fn spec(command: &[&str]) -> JobSpec {
        let env_inputs = EnvironmentInputs::new(["3.11", "linux"]);
        JobSpec {
            id: "test-job".to_string(),
            template: "test".to_string(),
            axis_values: BTreeMap::new(),
            shard: None,
            fingerprint: fingerprint(&env_inputs).unwrap(),
            env_inputs,
            kind: JobKind::Command,
            command: command.iter().map(|s| s.to_string()).collect(),
            requires: Vec::new(),
            target: None,
            timeout_secs: None,
        }
    }

    fn env() -> EnvironmentHandle {
        let env_inputs = EnvironmentInputs::new(["3.11", "linux"]);
        EnvironmentHandle::new(
            EnvironmentImage {
                fingerprint: fingerprint(&env_inputs).unwrap(),
                reference: "test/env:abc".to_string(),
                built_at: Utc::now(),
                size_bytes: None,
            },
            ResolutionSource::Built,
        )
    }

    fn runner() -> JobRunner {
        JobRunner::new(RunnerConfig::direct(), Arc::new(NullCredentials))
    }

    #[tokio::test]
    async fn test_successful_job() {
        let report = runner()
            .run(
                &spec(&["echo", "hello"]),
                &env(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.outcome, JobOutcome::Success);
        assert_eq!(report.exit_code, Some(0));
        assert!(report.log.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_job() {
        let report = runner()
            .run(
                &spec(&["false"]),
                &env(),
                Duration::from_secs(10),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.outcome, JobOutcome::Failure { timed_out: false });
        assert_eq!(report.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_timeout_is_marked_and_bounded() {
        let start = Instant::now();
        let report = runner()
            .run(
                &spec(&["sleep", "30"]),
                &env(),
                Duration::from_millis(100),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.outcome, JobOutcome::Failure { timed_out: true });
        assert!(report.log.contains("timed out"));
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "termination must happen within a bounded grace period"
        );
    }

    #[tokio::test]
    async fn test_spawn_error_is_failure() {
        let report = runner()
            .run(
                &spec(&["definitely-not-a-real-binary-7f3a"]),
                &env(),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(report.outcome, JobOutcome::Failure { timed_out: false });
        assert!(report.log.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_pre_cancelled_job_never_starts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = runner()
            .run(&spec(&["echo", "hi"]), &env(), Duration::from_secs(5), &cancel)
            .await;
        assert_eq!(report.outcome, JobOutcome::Cancelled);
        assert_eq!(report.exit_code, None);
    }

    #[tokio::test]
    async fn test_cancellation_terminates_in_flight_job() {
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let report = runner()
            .run(&spec(&["sleep", "30"]), &env(), Duration::from_secs(60), &cancel)
            .await;
        assert_eq!(report.outcome, JobOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_prerequisite_skips() {
        let mut job = spec(&["echo", "hi"]);
        job.requires = vec![Prerequisite::SshCredential];

        let report = runner()
            .run(&job, &env(), Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(matches!(report.outcome, JobOutcome::Skipped { .. }));
        assert_eq!(report.exit_code, None);
    }

    #[tokio::test]
    async fn test_satisfied_prerequisite_runs() {
        let mut job = spec(&["echo", "hi"]);
        job.requires = vec![Prerequisite::SshCredential];

        let credentials = StaticCredentials::new().with(
            Prerequisite::SshCredential,
            Credential::new("ssh", "key-material"),
        );
        let runner = JobRunner::new(RunnerConfig::direct(), Arc::new(credentials));

        let report = runner
            .run(&job, &env(), Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert_eq!(report.outcome, JobOutcome::Success);
    }

    #[test]
    fn test_launcher_argv_includes_reference() {
        let config = RunnerConfig::default();
        let host = TargetPlatform::new("linux", "x86_64");
        let argv = build_argv(&config, &host, &spec(&["run-tests"]), &env());
        assert_eq!(
            argv,
            vec!["docker", "run", "--rm", "test/env:abc", "run-tests"]
        );
    }

    #[test]
    fn test_foreign_target_argv_uses_emulator() {
        let config = RunnerConfig::direct();
        let host = TargetPlatform::new("linux", "x86_64");
        let mut job = spec(&["probe"]);
        job.target = Some(TargetPlatform::new("linux", "aarch64"));
        let argv = build_argv(&config, &host, &job, &env());
        assert_eq!(argv, vec!["qemu-aarch64", "probe"]);
    }
}
