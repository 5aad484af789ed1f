//! Run orchestration: expand, resolve, execute, aggregate.

use crate::error::ExecResult;
use crate::executor::Executor;
use crate::platform::PlatformArtifactGenerator;
use crate::pool::{PreparedJob, WorkerPool};
use crate::runner::JobRunner;
use gridci_core::{
    expand, EnvironmentFingerprint, EnvironmentInputs, JobKind, JobOutcome, JobReport, Matrix,
    RunReport, TargetPlatform,
};
use gridci_env::{CacheMode, EnvironmentCache, EnvironmentHandle};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// Why this run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// On-change run: reuse published environments wherever possible.
    Incremental,

    /// Scheduled full refresh: rebuild and republish every environment.
    ScheduledRefresh,
}

impl RunMode {
    fn cache_mode(self) -> CacheMode {
        match self {
            RunMode::Incremental => CacheMode::PreferPull,
            RunMode::ScheduledRefresh => CacheMode::ForceBuild,
        }
    }
}

/// A run request: the matrix plus execution knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub matrix: Matrix,

    /// Run-level environment inputs (base layer revision, install script
    /// digests); combined with axis values per job.
    pub base_inputs: EnvironmentInputs,

    pub mode: RunMode,

    /// Maximum jobs running at once.
    pub parallelism: usize,

    /// Default per-job timeout; templates may override, emulated targets are
    /// stretched on top.
    pub default_timeout_secs: u64,
}

impl RunRequest {
    pub fn new(matrix: Matrix, base_inputs: EnvironmentInputs) -> Self {
        Self {
            matrix,
            base_inputs,
            mode: RunMode::Incremental,
            parallelism: 4,
            default_timeout_secs: 600,
        }
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn with_default_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.default_timeout_secs = timeout_secs;
        self
    }
}

/// Drives one run end to end.
pub struct Orchestrator {
    cache: Arc<EnvironmentCache>,
    runner: Arc<JobRunner>,
    generator: Arc<PlatformArtifactGenerator>,
    host: TargetPlatform,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<EnvironmentCache>,
        runner: Arc<JobRunner>,
        generator: Arc<PlatformArtifactGenerator>,
    ) -> Self {
        Self {
            cache,
            runner,
            generator,
            host: TargetPlatform::host(),
        }
    }

    /// Override the host platform (used to exercise emulation paths in tests).
    pub fn with_host(mut self, host: TargetPlatform) -> Self {
        self.host = host;
        self
    }

    /// Execute a run request to a complete report.
    ///
    /// Only a malformed matrix aborts the run; every other failure is local
    /// to a job and lands in its report. The report always contains one entry
    /// per expanded spec.
    pub async fn execute(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> ExecResult<RunReport> {
        let start = Instant::now();
        let run_id = format!("run-{}", Uuid::new_v4());

        // Fatal pre-expansion errors abort before any job runs.
        let specs = expand(&request.matrix, &request.base_inputs)?;
        info!(run_id = %run_id, jobs = specs.len(), mode = ?request.mode, "run expanded");

        // Resolve each distinct fingerprint up front, off the job execution
        // path. Resolutions for different fingerprints proceed in parallel;
        // the cache single-flights duplicates. Builds are shared resources
        // and are not tied to this run's cancellation.
        let mut distinct: HashMap<EnvironmentFingerprint, EnvironmentInputs> = HashMap::new();
        for spec in &specs {
            distinct
                .entry(spec.fingerprint.clone())
                .or_insert_with(|| spec.env_inputs.clone());
        }

        let cache_mode = request.mode.cache_mode();
        let mut resolutions = JoinSet::new();
        for (fp, inputs) in distinct {
            let cache = Arc::clone(&self.cache);
            resolutions.spawn(async move {
                let result = cache.resolve(&fp, &inputs, cache_mode).await;
                (fp, result)
            });
        }

        let mut envs: HashMap<EnvironmentFingerprint, Result<EnvironmentHandle, String>> =
            HashMap::new();
        while let Some(joined) = resolutions.join_next().await {
            match joined {
                Ok((fp, Ok(handle))) => {
                    envs.insert(fp, Ok(handle));
                }
                Ok((fp, Err(err))) => {
                    // Local to this fingerprint; sibling environments are fine.
                    warn!(fingerprint = %fp.short(), error = %err, "environment unavailable");
                    envs.insert(fp, Err(err.to_string()));
                }
                Err(err) => warn!(error = %err, "environment resolution task failed"),
            }
        }

        // Partition: jobs with an environment run in the pool, the rest are
        // already failed.
        let mut settled: Vec<Option<JobReport>> = specs.iter().map(|_| None).collect();
        let mut runnable: Vec<(usize, PreparedJob)> = Vec::new();
        for (idx, spec) in specs.into_iter().enumerate() {
            let env = match envs.get(&spec.fingerprint) {
                Some(Ok(handle)) => handle.clone(),
                Some(Err(detail)) => {
                    settled[idx] = Some(JobReport {
                        job_id: spec.id.clone(),
                        outcome: JobOutcome::Failure { timed_out: false },
                        exit_code: None,
                        log: detail.clone(),
                        duration_ms: 0,
                        finished_at: chrono::Utc::now(),
                    });
                    continue;
                }
                None => {
                    settled[idx] = Some(JobReport {
                        job_id: spec.id.clone(),
                        outcome: JobOutcome::Failure { timed_out: false },
                        exit_code: None,
                        log: "environment resolution never completed".to_string(),
                        duration_ms: 0,
                        finished_at: chrono::Utc::now(),
                    });
                    continue;
                }
            };

            let base = spec.timeout_secs.unwrap_or(request.default_timeout_secs);
            let executor = Executor::for_target(&self.host, spec.target.as_ref());
            let timeout = Duration::from_secs(base * u64::from(executor.timeout_factor()));

            runnable.push((idx, PreparedJob { spec, env, timeout }));
        }

        let (indices, jobs): (Vec<usize>, Vec<PreparedJob>) = runnable.into_iter().unzip();

        let runner = Arc::clone(&self.runner);
        let generator = Arc::clone(&self.generator);
        let run_job = move |job: PreparedJob, cancel: CancellationToken| {
            let runner = Arc::clone(&runner);
            let generator = Arc::clone(&generator);
            async move {
                match job.spec.kind {
                    JobKind::Command => {
                        runner.run(&job.spec, &job.env, job.timeout, &cancel).await
                    }
                    JobKind::PlatformProbe => {
                        generator
                            .run_as_job(&job.spec, &job.env, job.timeout, &cancel)
                            .await
                    }
                }
            }
        };

        let pool = WorkerPool::new(request.parallelism);
        let reports = pool.run_all(jobs, cancel, run_job).await;
        for (idx, report) in indices.into_iter().zip(reports) {
            settled[idx] = Some(report);
        }

        let jobs: Vec<JobReport> = settled
            .into_iter()
            .map(|slot| {
                // Every slot is filled: env failures above, pool reports here.
                slot.unwrap_or_else(|| {
                    JobReport::unstarted("unknown", JobOutcome::Failure { timed_out: false })
                })
            })
            .collect();

        let report = RunReport::new(run_id.clone(), jobs, start.elapsed().as_millis() as u64);
        info!(
            run_id = %run_id,
            verdict = %report.verdict,
            success = report.success_count(),
            failed = report.failure_count(),
            skipped = report.skipped_count(),
            cancelled = report.cancelled_count(),
            "run finished"
        );
        Ok(report)
    }
}
