//! End-to-end orchestrator tests with in-memory environment fakes.

use gridci_core::{
    expand, Axis, AxisSelection, EnvironmentInputs, JobKind, JobOutcome, JobTemplate, Matrix,
    Prerequisite, Verdict,
};
use gridci_env::fakes::{CountingBuilder, MemoryRegistry, NullCredentials, StaticPushCredentials};
use gridci_env::{Credential, CredentialProvider, EnvironmentCache, StaticCredentials};
use gridci_exec::{JobRunner, Orchestrator, PlatformArtifactGenerator, RunMode, RunRequest, RunnerConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn base_inputs() -> EnvironmentInputs {
    EnvironmentInputs::new(["base-layer-rev-7"])
}

fn orchestrator_with(
    registry: Arc<MemoryRegistry>,
    builder: Arc<CountingBuilder>,
    credentials: Arc<dyn CredentialProvider>,
) -> Orchestrator {
    let cache = Arc::new(EnvironmentCache::new(
        registry,
        builder,
        Arc::new(StaticPushCredentials),
    ));
    let runner = Arc::new(JobRunner::new(RunnerConfig::direct(), credentials));
    let generator = Arc::new(PlatformArtifactGenerator::new(RunnerConfig::direct()));
    Orchestrator::new(cache, runner, generator)
}

fn orchestrator() -> Orchestrator {
    orchestrator_with(
        Arc::new(MemoryRegistry::new()),
        Arc::new(CountingBuilder::new()),
        Arc::new(NullCredentials),
    )
}

/// Matrix `{version: [A, B]} x 2 shards` runs four jobs to a green verdict,
/// building one environment per version.
#[tokio::test]
async fn test_sharded_matrix_all_green() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A", "B"])],
        vec![JobTemplate::new("suite", &["version"], vec!["echo".to_string(), "ok".to_string()])
            .with_shards(2)],
    );
    let builder = Arc::new(CountingBuilder::new());
    let orchestrator = orchestrator_with(
        Arc::new(MemoryRegistry::new()),
        Arc::clone(&builder),
        Arc::new(NullCredentials),
    );

    let report = orchestrator
        .execute(
            RunRequest::new(matrix, base_inputs()).with_parallelism(4),
            CancellationToken::new(),
        )
        .await
        .expect("run failed");

    assert_eq!(report.verdict, Verdict::Success);
    assert_eq!(report.jobs.len(), 4);
    assert_eq!(report.success_count(), 4);
    // Two versions, two environments; shards share them.
    assert_eq!(builder.build_count(), 2);
}

/// A job missing its prerequisite is skipped, the rest succeed, and the
/// verdict still fails closed.
#[tokio::test]
async fn test_missing_prerequisite_fails_the_gate() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![
            JobTemplate::new("unit", &["version"], vec!["echo".to_string(), "ok".to_string()])
                .with_shards(2),
            JobTemplate::new("vcs-it", &["version"], vec!["echo".to_string(), "ok".to_string()])
                .with_requires(vec![Prerequisite::SshCredential]),
        ],
    );

    let report = orchestrator()
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");

    assert_eq!(report.verdict, Verdict::Failure);
    assert_eq!(report.jobs.len(), 3);
    assert_eq!(report.success_count(), 2);
    assert_eq!(report.skipped_count(), 1);
    let skipped = report
        .jobs
        .iter()
        .find(|j| j.outcome.is_skipped())
        .expect("one job skipped");
    assert!(skipped.job_id.starts_with("vcs-it"));
}

/// The same matrix goes green once the credential is supplied.
#[tokio::test]
async fn test_satisfied_prerequisite_goes_green() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![JobTemplate::new("vcs-it", &["version"], vec!["echo".to_string(), "ok".to_string()])
            .with_requires(vec![Prerequisite::SshCredential])],
    );
    let credentials = StaticCredentials::new().with(
        Prerequisite::SshCredential,
        Credential::new("ssh", "key-material"),
    );
    let orchestrator = orchestrator_with(
        Arc::new(MemoryRegistry::new()),
        Arc::new(CountingBuilder::new()),
        Arc::new(credentials),
    );

    let report = orchestrator
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");
    assert_eq!(report.verdict, Verdict::Success);
}

/// A job over its deadline is terminated and marked as a timeout failure
/// within a bounded grace period.
#[tokio::test]
async fn test_job_timeout_is_recorded() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![
            JobTemplate::new("slow", &["version"], vec!["sleep".to_string(), "30".to_string()])
                .with_timeout_secs(1),
            JobTemplate::new("fast", &["version"], vec!["echo".to_string(), "ok".to_string()]),
        ],
    );

    let start = Instant::now();
    let report = orchestrator()
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(report.verdict, Verdict::Failure);

    let slow = report.jobs.iter().find(|j| j.job_id.starts_with("slow")).unwrap();
    assert_eq!(slow.outcome, JobOutcome::Failure { timed_out: true });
    assert!(slow.log.contains("timed out"));

    // The slow job did not stall its sibling.
    let fast = report.jobs.iter().find(|j| j.job_id.starts_with("fast")).unwrap();
    assert_eq!(fast.outcome, JobOutcome::Success);
}

/// Cancelling the run terminates in-flight jobs and records queued ones as
/// cancelled; the verdict is Cancelled.
#[tokio::test]
async fn test_run_cancellation() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A", "B", "C", "D"])],
        vec![JobTemplate::new("slow", &["version"], vec!["sleep".to_string(), "30".to_string()])],
    );

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let start = Instant::now();
    let report = orchestrator()
        .execute(
            RunRequest::new(matrix, base_inputs()).with_parallelism(2),
            cancel,
        )
        .await
        .expect("run failed");

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(report.verdict, Verdict::Cancelled);
    assert_eq!(report.jobs.len(), 4);
    assert!(report.jobs.iter().all(|j| j.outcome.is_cancelled()));
}

/// An unavailable environment fails only the jobs that needed it.
#[tokio::test]
async fn test_environment_failure_is_local() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A", "B"])],
        vec![JobTemplate::new("suite", &["version"], vec!["echo".to_string(), "ok".to_string()])],
    );

    // Publish version A's environment, then break the builder: A pulls, B
    // cannot be built.
    let specs = expand(&matrix, &base_inputs()).expect("expand failed");
    let registry = Arc::new(MemoryRegistry::new());
    registry.preload(specs[0].fingerprint.clone(), "prebuilt:a");

    let builder = Arc::new(CountingBuilder::new());
    builder.fail_builds();

    let orchestrator = orchestrator_with(registry, builder, Arc::new(NullCredentials));
    let report = orchestrator
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");

    assert_eq!(report.verdict, Verdict::Failure);
    assert_eq!(report.success_count(), 1);
    assert_eq!(report.failure_count(), 1);
    let failed = report.jobs.iter().find(|j| j.outcome.is_failure()).unwrap();
    assert!(failed.log.contains("unavailable"));
}

/// A platform probe template produces a descriptor artifact in its report.
#[tokio::test]
async fn test_platform_probe_job() {
    let probe_json =
        r#"{"os":"linux","arch":"x86_64","abi":"gnu","capabilities":{"ssl":true}}"#;
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![JobTemplate::new(
            "platform",
            &["version"],
            vec!["echo".to_string(), probe_json.to_string()],
        )
        .with_kind(JobKind::PlatformProbe)],
    );

    let report = orchestrator()
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");

    assert_eq!(report.verdict, Verdict::Success);
    assert!(report.jobs[0].log.contains("\"arch\": \"x86_64\""));
}

/// A scheduled refresh rebuilds environments even when they are published.
#[tokio::test]
async fn test_scheduled_refresh_rebuilds() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![JobTemplate::new("suite", &["version"], vec!["echo".to_string(), "ok".to_string()])],
    );

    let specs = expand(&matrix, &base_inputs()).expect("expand failed");
    let registry = Arc::new(MemoryRegistry::new());
    registry.preload(specs[0].fingerprint.clone(), "stale:a");
    let builder = Arc::new(CountingBuilder::new());

    let orchestrator = orchestrator_with(
        Arc::clone(&registry),
        Arc::clone(&builder),
        Arc::new(NullCredentials),
    );
    let report = orchestrator
        .execute(
            RunRequest::new(matrix, base_inputs()).with_mode(RunMode::ScheduledRefresh),
            CancellationToken::new(),
        )
        .await
        .expect("run failed");

    assert_eq!(report.verdict, Verdict::Success);
    assert_eq!(builder.build_count(), 1, "refresh must not reuse the stale image");
}

/// A template selecting no axis values contributes nothing, and an empty run
/// is a vacuous pass.
#[tokio::test]
async fn test_empty_expansion_is_vacuous_pass() {
    let matrix = Matrix::new(
        vec![Axis::new("version", ["A"])],
        vec![JobTemplate::new("suite", &["version"], vec!["echo".to_string()])
            .with_axis("version", AxisSelection::Only(vec!["Z".to_string()]))],
    );

    let report = orchestrator()
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await
        .expect("run failed");
    assert_eq!(report.verdict, Verdict::Success);
    assert!(report.jobs.is_empty());
}

/// A malformed matrix aborts before any job runs.
#[tokio::test]
async fn test_invalid_matrix_aborts() {
    let matrix = Matrix::new(
        vec![Axis::new("version", Vec::<String>::new())],
        vec![JobTemplate::new("suite", &["version"], vec!["echo".to_string()])],
    );

    let result = orchestrator()
        .execute(RunRequest::new(matrix, base_inputs()), CancellationToken::new())
        .await;
    assert!(result.is_err());
}
