//! Platform descriptor generation.
//!
//! A platform probe is a job whose payload prints a JSON description of the
//! execution platform it runs on, for downstream packaging. Foreign
//! architectures run the probe under emulation, with stretched timeouts.

use crate::error::{ExecError, ExecResult};
use crate::executor::Executor;
use crate::runner::{build_argv, spawn_captured, RunnerConfig};
use chrono::{DateTime, Utc};
use gridci_core::{JobOutcome, JobReport, JobSpec, TargetPlatform};
use gridci_env::EnvironmentHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What a probe prints on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ProbeOutput {
    os: String,
    arch: String,
    abi: String,
    #[serde(default)]
    capabilities: BTreeMap<String, bool>,
}

/// Descriptor of an execution platform, consumed by packaging downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDescriptor {
    pub os: String,
    pub arch: String,

    /// ABI identifier (e.g. "gnu", "musl").
    pub abi: String,

    /// Native-capability flags reported by the probe.
    pub capabilities: BTreeMap<String, bool>,

    pub probed_at: DateTime<Utc>,
}

/// Runs platform probes and parses their descriptors.
pub struct PlatformArtifactGenerator {
    config: RunnerConfig,
    host: TargetPlatform,
}

impl PlatformArtifactGenerator {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            host: TargetPlatform::host(),
        }
    }

    /// Override the host platform (used to exercise emulation paths in tests).
    pub fn with_host(mut self, host: TargetPlatform) -> Self {
        self.host = host;
        self
    }

    /// Run the probe described by `spec` and parse its descriptor.
    ///
    /// `timeout` is the already-stretched deadline: callers multiply the base
    /// timeout by the executor's factor for emulated targets.
    pub async fn generate(
        &self,
        spec: &JobSpec,
        env: &EnvironmentHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ExecResult<PlatformDescriptor> {
        let executor = Executor::for_target(&self.host, spec.target.as_ref());
        if executor.is_emulated() {
            info!(job = %spec.id, target = ?spec.target, "probing under emulation");
        }

        let argv = build_argv(&self.config, &self.host, spec, env);
        let captured = spawn_captured(&argv, timeout, cancel)
            .await
            .map_err(|err| ExecError::ProbeFailed {
                job_id: spec.id.clone(),
                detail: format!("failed to spawn probe: {err}"),
            })?;

        if captured.cancelled {
            return Err(ExecError::ProbeCancelled {
                job_id: spec.id.clone(),
            });
        }
        if captured.timed_out {
            return Err(ExecError::ProbeTimedOut {
                job_id: spec.id.clone(),
                timeout_secs: timeout.as_secs(),
            });
        }
        if captured.exit_code != Some(0) {
            return Err(ExecError::ProbeFailed {
                job_id: spec.id.clone(),
                detail: format!(
                    "probe exited with {:?}: {}",
                    captured.exit_code,
                    captured.stderr.trim()
                ),
            });
        }

        let output: ProbeOutput =
            serde_json::from_str(captured.stdout.trim()).map_err(|err| {
                ExecError::ProbeOutput {
                    job_id: spec.id.clone(),
                    detail: err.to_string(),
                }
            })?;

        Ok(PlatformDescriptor {
            os: output.os,
            arch: output.arch,
            abi: output.abi,
            capabilities: output.capabilities,
            probed_at: Utc::now(),
        })
    }

    /// Run a probe as a pool job, folding the result into a report.
    ///
    /// Success embeds the serialized descriptor in the log so the artifact
    /// survives in the per-job breakdown; any probe error is a `Failure`
    /// (with the timeout marker preserved).
    pub async fn run_as_job(
        &self,
        spec: &JobSpec,
        env: &EnvironmentHandle,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> JobReport {
        if cancel.is_cancelled() {
            return JobReport::unstarted(&spec.id, JobOutcome::Cancelled);
        }

        let start = Instant::now();
        match self.generate(spec, env, timeout, cancel).await {
            Ok(descriptor) => JobReport {
                job_id: spec.id.clone(),
                outcome: JobOutcome::Success,
                exit_code: Some(0),
                log: serde_json::to_string_pretty(&descriptor)
                    .unwrap_or_else(|err| format!("descriptor serialization failed: {err}")),
                duration_ms: start.elapsed().as_millis() as u64,
                finished_at: Utc::now(),
            },
            Err(err) => {
                warn!(job = %spec.id, error = %err, "platform probe failed");
                let outcome = match &err {
                    ExecError::ProbeCancelled { .. } => JobOutcome::Cancelled,
                    ExecError::ProbeTimedOut { .. } => JobOutcome::Failure { timed_out: true },
                    _ => JobOutcome::Failure { timed_out: false },
                };
                JobReport {
                    job_id: spec.id.clone(),
                    outcome,
                    exit_code: None,
                    log: err.to_string(),
                    duration_ms: start.elapsed().as_millis() as u64,
                    finished_at: Utc::now(),
                }
            }
        }
    }
}
