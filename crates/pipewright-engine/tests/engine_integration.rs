//! Integration tests for the run coordinator with fakes and the real shell.

use std::sync::Arc;
use std::time::Duration;

use pipewright_core::{
    ChangeContext, EnvMap, JobStatus, JobTemplate, Matrix, PipelineDocument, PlatformSpec,
    RunStatus, StepSpec, StepStatus, TriggerRule,
};
use pipewright_engine::fakes::{FakeExecutor, FakeProvisioner, StepBehavior};
use pipewright_engine::{
    LocalProvisioner, Provisioner, RunCoordinator, RunOptions, ScriptExecutor, ShellExecutor,
};

fn vars(pairs: &[(&str, &str)]) -> EnvMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn job(name: &str, steps: Vec<StepSpec>) -> JobTemplate {
    JobTemplate {
        name: name.to_string(),
        timeout_secs: 600,
        platform: PlatformSpec {
            pool_image: "ubuntu-22.04".to_string(),
            container_image: None,
        },
        matrix: Matrix::default(),
        variables: EnvMap::new(),
        steps,
    }
}

fn document(jobs: Vec<JobTemplate>) -> PipelineDocument {
    PipelineDocument {
        name: "integration".to_string(),
        trigger: TriggerRule {
            included_branches: vec!["master".to_string()],
            excluded_paths: vec!["docs/*".to_string()],
        },
        variables: EnvMap::new(),
        max_concurrency: 2,
        jobs,
    }
}

fn change_on_master() -> ChangeContext {
    ChangeContext {
        branch: "master".to_string(),
        changed_paths: vec!["src/main.rs".to_string()],
    }
}

fn fake_coordinator(
    executor: Arc<FakeExecutor>,
    provisioner: Arc<FakeProvisioner>,
) -> RunCoordinator {
    RunCoordinator::new(executor, provisioner, RunOptions::default())
}

/// Test: end-to-end run over the real shell executor and local provisioner.
#[tokio::test]
async fn test_successful_run_with_shell_executor() {
    let coordinator = RunCoordinator::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(LocalProvisioner::new()),
        RunOptions::default(),
    );

    let doc = document(vec![
        job(
            "greet",
            vec![
                StepSpec::new("say hello", "echo hello"),
                StepSpec::new("say world", "echo world"),
            ],
        ),
        job("probe", vec![StepSpec::new("pwd", "pwd")]),
    ]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.passed_jobs(), 2);
    assert_eq!(result.failed_jobs(), 0);
    let greet = &result.job_results[0];
    assert_eq!(greet.status, JobStatus::Succeeded);
    assert!(greet.step_results[0].output.contains("hello"));
    assert!(greet.step_results[1].output.contains("world"));
}

/// Test: failing shell step fails its job and the run.
#[tokio::test]
async fn test_failing_shell_step_fails_run() {
    let coordinator = RunCoordinator::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(LocalProvisioner::new()),
        RunOptions::default(),
    );

    let doc = document(vec![job("broken", vec![StepSpec::new("fail", "false")])]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.job_results[0].status, JobStatus::Failed);
    assert_eq!(result.job_results[0].step_results[0].exit_code, Some(1));
}

/// Test: a change touching only excluded paths skips the run entirely.
#[tokio::test]
async fn test_trigger_skips_docs_only_change() {
    let executor = Arc::new(FakeExecutor::new());
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let doc = document(vec![job("build", vec![StepSpec::new("compile", "make")])]);
    let change = ChangeContext {
        branch: "master".to_string(),
        changed_paths: vec!["docs/readme.md".to_string()],
    };

    let result = coordinator.run(&doc, &change).await.expect("run failed");

    assert_eq!(result.status, RunStatus::Skipped);
    assert!(result.job_results.is_empty());
    assert!(executor.executed_steps().is_empty());
    assert_eq!(provisioner.acquired_count(), 0);
}

/// Test: first non-zero exit stops the sequence; later steps are Skipped,
/// never omitted.
#[tokio::test]
async fn test_fail_fast_step_sequence() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior("two", StepBehavior::exit(1).with_output("boom"));
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let doc = document(vec![job(
        "sequence",
        vec![
            StepSpec::new("one", "true"),
            StepSpec::new("two", "exit 1"),
            StepSpec::new("three", "true"),
            StepSpec::new("four", "true"),
        ],
    )]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    let steps = &result.job_results[0].step_results;
    assert_eq!(steps.len(), 4);
    assert_eq!(steps[0].status, StepStatus::Succeeded);
    assert_eq!(steps[1].status, StepStatus::Failed);
    assert_eq!(steps[2].status, StepStatus::Skipped);
    assert_eq!(steps[3].status, StepStatus::Skipped);
    assert_eq!(result.job_results[0].status, JobStatus::Failed);
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(executor.executed_steps(), vec!["one", "two"]);
}

/// Test: matrix variants run concurrently under the configured bound.
#[tokio::test(start_paused = true)]
async fn test_matrix_variants_run_concurrently() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior(
        "work",
        StepBehavior::default().with_latency(Duration::from_millis(200)),
    );
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let mut template = job("build", vec![StepSpec::new("work", "make")]);
    template.matrix = Matrix::from_pairs(vec![
        ("a".to_string(), vars(&[("X", "1")])),
        ("b".to_string(), vars(&[("X", "2")])),
    ]);
    let doc = document(vec![template]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.job_results.len(), 2);
    assert_eq!(result.job_results[0].display_name, "build [a]");
    assert_eq!(result.job_results[1].display_name, "build [b]");
    assert_eq!(executor.max_in_flight(), 2, "both variants should overlap");
}

/// Test: concurrency never exceeds the bound even with more instances.
#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_bound() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior(
        "work",
        StepBehavior::default().with_latency(Duration::from_millis(100)),
    );
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let mut template = job("build", vec![StepSpec::new("work", "make")]);
    template.matrix = Matrix::from_pairs(vec![
        ("a".to_string(), EnvMap::new()),
        ("b".to_string(), EnvMap::new()),
        ("c".to_string(), EnvMap::new()),
        ("d".to_string(), EnvMap::new()),
    ]);
    let doc = document(vec![template]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.job_results.len(), 4);
    assert!(
        executor.max_in_flight() <= 2,
        "concurrency {} exceeded bound 2",
        executor.max_in_flight()
    );
}

/// Test: a job exceeding its timeout ends TimedOut and fails the run.
#[tokio::test(start_paused = true)]
async fn test_job_timeout_ends_timed_out() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior(
        "sleep",
        StepBehavior::default().with_latency(Duration::from_secs(3600)),
    );
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let mut slow = job(
        "slow",
        vec![
            StepSpec::new("sleep", "sleep 3600"),
            StepSpec::new("after", "true"),
        ],
    );
    slow.timeout_secs = 5;
    let doc = document(vec![slow]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Failed);
    let job_result = &result.job_results[0];
    assert_eq!(job_result.status, JobStatus::TimedOut);
    assert_eq!(job_result.step_results[0].status, StepStatus::TimedOut);
    assert_eq!(job_result.step_results[1].status, StepStatus::Skipped);
    assert_eq!(provisioner.released_count(), provisioner.acquired_count());
}

/// Test: cancellation tears down the in-flight job and reports the queued
/// one as Canceled instead of dropping it.
#[tokio::test(start_paused = true)]
async fn test_cancellation_marks_in_flight_and_queued() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior(
        "work",
        StepBehavior::default().with_latency(Duration::from_secs(60)),
    );
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = RunCoordinator::new(
        Arc::clone(&executor) as Arc<dyn ScriptExecutor>,
        Arc::clone(&provisioner) as Arc<dyn Provisioner>,
        RunOptions {
            max_concurrency: Some(1),
            ..RunOptions::default()
        },
    );

    let doc = document(vec![
        job("first", vec![StepSpec::new("work", "make")]),
        job("second", vec![StepSpec::new("work", "make")]),
    ]);

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Canceled);
    let first = &result.job_results[0];
    assert_eq!(first.status, JobStatus::Canceled);
    assert_eq!(first.step_results[0].status, StepStatus::Canceled);
    let second = &result.job_results[1];
    assert_eq!(second.status, JobStatus::Canceled);
    assert_eq!(second.step_results[0].status, StepStatus::Skipped);
    assert_eq!(provisioner.released_count(), provisioner.acquired_count());
}

/// Test: a provisioning failure yields a synthetic step record and leaves
/// sibling jobs untouched.
#[tokio::test]
async fn test_provisioning_failure_is_isolated() {
    let executor = Arc::new(FakeExecutor::new());
    let provisioner = Arc::new(FakeProvisioner::new());
    provisioner.fail_acquire_for("doomed");
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let doc = document(vec![
        job("doomed", vec![StepSpec::new("never runs", "true")]),
        job("healthy", vec![StepSpec::new("runs", "true")]),
    ]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Failed);

    let doomed = &result.job_results[0];
    assert_eq!(doomed.status, JobStatus::Failed);
    assert_eq!(doomed.step_results[0].display_name, "provision agent");
    assert_eq!(doomed.step_results[0].status, StepStatus::Failed);
    assert!(doomed.step_results[0].output.contains("no agent available"));
    assert_eq!(doomed.step_results[1].status, StepStatus::Skipped);

    let healthy = &result.job_results[1];
    assert_eq!(healthy.status, JobStatus::Succeeded);
    assert_eq!(provisioner.released_count(), provisioner.acquired_count());
}

/// Test: a configuration error aborts before anything executes.
#[tokio::test]
async fn test_configuration_error_executes_nothing() {
    let executor = Arc::new(FakeExecutor::new());
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let mut broken = job("broken", vec![StepSpec::new("step", "true")]);
    broken.platform.container_image = Some("rust:$(UNDEFINED_VERSION)".to_string());
    let doc = document(vec![
        job("fine", vec![StepSpec::new("step", "true")]),
        broken,
    ]);

    let err = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect_err("run must fail");
    assert!(err.to_string().contains("UNDEFINED_VERSION"));
    assert!(executor.executed_steps().is_empty());
    assert_eq!(provisioner.acquired_count(), 0);
}

/// Test: step overrides win over matrix, matrix over template, template
/// over run, and sibling steps never see each other's overrides.
#[tokio::test]
async fn test_env_precedence_and_step_isolation() {
    let executor = Arc::new(FakeExecutor::new());
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let mut template = job(
        "envjob",
        vec![
            StepSpec::new("overriding", "true").with_env("LEVEL", "step"),
            StepSpec::new("observing", "true"),
        ],
    );
    template.variables = vars(&[("LEVEL", "template"), ("T_ONLY", "t")]);
    template.matrix = Matrix::from_pairs(vec![(
        "only".to_string(),
        vars(&[("LEVEL", "matrix"), ("M_ONLY", "m")]),
    )]);

    let mut doc = document(vec![template]);
    doc.variables = vars(&[("LEVEL", "run"), ("R_ONLY", "r")]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");
    assert_eq!(result.status, RunStatus::Succeeded);

    let overriding = executor.env_for("overriding").expect("step executed");
    assert_eq!(overriding.get("LEVEL").map(String::as_str), Some("step"));
    assert_eq!(overriding.get("R_ONLY").map(String::as_str), Some("r"));
    assert_eq!(overriding.get("T_ONLY").map(String::as_str), Some("t"));
    assert_eq!(overriding.get("M_ONLY").map(String::as_str), Some("m"));

    let observing = executor.env_for("observing").expect("step executed");
    assert_eq!(
        observing.get("LEVEL").map(String::as_str),
        Some("matrix"),
        "sibling step must not see the override"
    );
}

/// Test: spawn-level executor failure is recorded as a failed step with
/// exit_code -1, not a crash.
#[tokio::test]
async fn test_spawn_error_recorded_as_failed_step() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior("exec", StepBehavior::spawn_error());
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = fake_coordinator(Arc::clone(&executor), Arc::clone(&provisioner));

    let doc = document(vec![job("spawnfail", vec![StepSpec::new("exec", "true")])]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    assert_eq!(result.status, RunStatus::Failed);
    let step = &result.job_results[0].step_results[0];
    assert_eq!(step.status, StepStatus::Failed);
    assert_eq!(step.exit_code, Some(-1));
    assert!(step.output.contains("fake spawn failure"));
}

/// Test: long step output is truncated to the configured bound.
#[tokio::test]
async fn test_output_truncation() {
    let executor = Arc::new(FakeExecutor::new());
    executor.set_behavior(
        "chatty",
        StepBehavior::default().with_output("y".repeat(4096)),
    );
    let provisioner = Arc::new(FakeProvisioner::new());
    let coordinator = RunCoordinator::new(
        Arc::clone(&executor) as Arc<dyn ScriptExecutor>,
        Arc::clone(&provisioner) as Arc<dyn Provisioner>,
        RunOptions {
            output_limit_bytes: 256,
            ..RunOptions::default()
        },
    );

    let doc = document(vec![job("noisy", vec![StepSpec::new("chatty", "yes")])]);

    let result = coordinator
        .run(&doc, &change_on_master())
        .await
        .expect("run failed");

    let step = &result.job_results[0].step_results[0];
    assert_eq!(step.status, StepStatus::Succeeded);
    assert!(step.output.len() < 4096);
    assert!(step.output.ends_with("[output truncated]"));
}
