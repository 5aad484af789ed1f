//! Bounded-parallelism worker pool.
//!
//! Jobs are independent once dispatched; the pool only bounds how many run
//! at once and restores expansion order in the returned reports. Each job is
//! bounded by its own timeout, so one slow job never stalls the collection of
//! the others' reports.

use gridci_core::{JobOutcome, JobReport, JobSpec};
use gridci_env::EnvironmentHandle;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A spec paired with its resolved environment and effective timeout.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub spec: JobSpec,
    pub env: EnvironmentHandle,
    pub timeout: Duration,
}

/// Executes prepared jobs with at most `parallelism` running concurrently.
pub struct WorkerPool {
    parallelism: usize,
}

impl WorkerPool {
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }

    /// Run all jobs and return one report per job, in input order.
    ///
    /// `run_job` executes a single job; the pool handles slot assignment and
    /// cancellation. Jobs cancelled before they acquire a slot are recorded
    /// `Cancelled` without ever starting.
    pub async fn run_all<F, Fut>(
        &self,
        jobs: Vec<PreparedJob>,
        cancel: CancellationToken,
        run_job: F,
    ) -> Vec<JobReport>
    where
        F: Fn(PreparedJob, CancellationToken) -> Fut + Clone + Send + 'static,
        Fut: Future<Output = JobReport> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let job_ids: Vec<String> = jobs.iter().map(|job| job.spec.id.clone()).collect();
        let mut join_set = JoinSet::new();

        for (idx, job) in jobs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let run_job = run_job.clone();

            join_set.spawn(async move {
                // Biased so an already-cancelled run always beats a free slot.
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return (idx, JobReport::unstarted(&job.spec.id, JobOutcome::Cancelled));
                    }
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => {
                            return (idx, JobReport::unstarted(&job.spec.id, JobOutcome::Cancelled));
                        }
                    },
                };

                let report = run_job(job, cancel).await;
                drop(permit);
                (idx, report)
            });
        }

        let mut slots: Vec<Option<JobReport>> = job_ids.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = Some(report),
                Err(err) => warn!(error = %err, "worker task failed"),
            }
        }

        // A panicked worker still owes its job a report.
        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| JobReport {
                    job_id: job_ids[idx].clone(),
                    outcome: JobOutcome::Failure { timed_out: false },
                    exit_code: None,
                    log: "worker task panicked".to_string(),
                    duration_ms: 0,
                    finished_at: chrono::Utc::now(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridci_core::{fingerprint, EnvironmentInputs, JobKind};
    use gridci_env::{EnvironmentImage, ResolutionSource};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn prepared(id: &str) -> PreparedJob {
        let env_inputs = EnvironmentInputs::new(["3.11"]);
        let fp = fingerprint(&env_inputs).unwrap();
        PreparedJob {
            spec: JobSpec {
                id: id.to_string(),
                template: "test".to_string(),
                axis_values: BTreeMap::new(),
                shard: None,
                fingerprint: fp.clone(),
                env_inputs,
                kind: JobKind::Command,
                command: vec!["echo".to_string()],
                requires: Vec::new(),
                target: None,
                timeout_secs: None,
            },
            env: EnvironmentHandle::new(
                EnvironmentImage {
                    fingerprint: fp,
                    reference: "test/env:abc".to_string(),
                    built_at: chrono::Utc::now(),
                    size_bytes: None,
                },
                ResolutionSource::Built,
            ),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_reports_preserve_input_order() {
        let pool = WorkerPool::new(4);
        let jobs = vec![prepared("a"), prepared("b"), prepared("c")];

        let reports = pool
            .run_all(jobs, CancellationToken::new(), |job, _cancel| async move {
                // Later jobs finish first to exercise reordering.
                let delay = match job.spec.id.as_str() {
                    "a" => 60,
                    "b" => 30,
                    _ => 5,
                };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                JobReport::unstarted(&job.spec.id, JobOutcome::Success)
            })
            .await;

        let ids: Vec<&str> = reports.iter().map(|r| r.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        static IN_FLIGHT: AtomicU32 = AtomicU32::new(0);
        static MAX_SEEN: AtomicU32 = AtomicU32::new(0);

        let pool = WorkerPool::new(2);
        let jobs: Vec<PreparedJob> = (0..8).map(|i| prepared(&format!("job-{i}"))).collect();

        let reports = pool
            .run_all(jobs, CancellationToken::new(), |job, _cancel| async move {
                let now = IN_FLIGHT.fetch_add(1, Ordering::SeqCst) + 1;
                MAX_SEEN.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
                JobReport::unstarted(&job.spec.id, JobOutcome::Success)
            })
            .await;

        assert_eq!(reports.len(), 8);
        assert!(MAX_SEEN.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_cancelled_pool_reports_every_job() {
        let pool = WorkerPool::new(1);
        let jobs: Vec<PreparedJob> = (0..4).map(|i| prepared(&format!("job-{i}"))).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reports = pool
            .run_all(jobs, cancel, |job, _cancel| async move {
                JobReport::unstarted(&job.spec.id, JobOutcome::Success)
            })
            .await;

        assert_eq!(reports.len(), 4);
        // Queued jobs never started; every one still got a report.
        assert!(reports.iter().all(|r| r.outcome == JobOutcome::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_parallelism_clamps_to_one() {
        let pool = WorkerPool::new(0);
        let reports = pool
            .run_all(
                vec![prepared("only")],
                CancellationToken::new(),
                |job, _cancel| async move {
                    JobReport::unstarted(&job.spec.id, JobOutcome::Success)
                },
            )
            .await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, JobOutcome::Success);
    }
}
