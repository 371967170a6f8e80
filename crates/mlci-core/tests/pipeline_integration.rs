//! End-to-end pipeline runs against scripted steps and in-memory ledgers.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mlci_core::domain::job::JobAction;
use mlci_core::graph::PipelineGraph;
use mlci_core::ledger::{LedgerStatus, RunEvent, RunEventKind, RunRecord};
use mlci_core::retention::{RetentionMarker, RETENTION_MARKER};
use mlci_core::steps::summary::{self, SUMMARY_MD};
use mlci_core::workspace::JOB_LOG;
use mlci_core::{
    abort_pair, push_graph, scheduled_graph, AbortSignal, BuiltinExecutor, FsRunLedger,
    JobContext, JobSpec, JobState, MemoryRunLedger, MlciError, NoopPreflight, Orchestrator,
    PipelineConfig, Preflight, Result, RunLedger, RunStatus, RunVerdict, StepExecutor,
    StepOutcome, ToolchainPreflight, Trigger, Workspace,
};

/// Per-job behaviour for [`ScriptedExecutor`].
#[derive(Clone, Default)]
struct Script {
    exit_code: i32,
    /// Declared artifacts the job "forgets" to write.
    omit: Vec<&'static str>,
}

/// Writes every declared artifact and exits with the scripted code.
/// Summary jobs run the real summary step.
#[derive(Default)]
struct ScriptedExecutor {
    scripts: HashMap<&'static str, Script>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    fn with(mut self, job: &'static str, script: Script) -> Self {
        self.scripts.insert(job, script);
        self
    }

    fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext<'_>) -> Result<StepOutcome> {
        self.executed.lock().unwrap().push(job.id.clone());
        if job.action == JobAction::Summary {
            return summary::run(job, ctx);
        }
        let script = self.scripts.get(job.id.as_str()).cloned().unwrap_or_default();
        if let Some(dir) = ctx.artifact_dir {
            for decl in &job.artifacts {
                if !script.omit.iter().any(|name| *name == decl.name) {
                    std::fs::write(dir.join(&decl.path), format!("{} output", decl.name))?;
                }
            }
        }
        if script.exit_code == 0 {
            Ok(StepOutcome::success(format!("{} ok\n", job.id)))
        } else {
            Ok(StepOutcome::failure(
                script.exit_code,
                format!("{} failed\n", job.id),
                format!("{} exited with code {}", job.id, script.exit_code),
            ))
        }
    }
}

struct FailingPreflight;

#[async_trait]
impl Preflight for FailingPreflight {
    async fn check(&self, _graph: &PipelineGraph, _ws: &Workspace) -> Vec<String> {
        vec!["python interpreter 'python' not available".to_string()]
    }
}

fn workspace() -> (tempfile::TempDir, Workspace) {
    let root = tempfile::tempdir().unwrap();
    let ws = Workspace::open(root.path(), &PipelineConfig::default()).unwrap();
    (root, ws)
}

fn orchestrator(
    executor: Arc<ScriptedExecutor>,
    ledger: Arc<MemoryRunLedger>,
) -> Orchestrator {
    Orchestrator::new(executor, Arc::new(NoopPreflight), ledger)
}

fn state(report: &mlci_core::RunReport, job: &str) -> JobState {
    report.job(job).unwrap().state
}

#[tokio::test]
async fn test_all_jobs_pass() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default());
    let ledger = Arc::new(MemoryRunLedger::new());
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor.clone(), ledger.clone())
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.verdict, RunVerdict::Passed);
    assert_eq!(report.exit_code(), 0);
    assert!(report.jobs.iter().all(|j| j.state == JobState::Passed));
    assert_eq!(
        executor.executed(),
        vec!["lint", "test", "train", "integration-test", "summary", "notify"]
    );

    for dir in [
        "lint-reports",
        "test-results",
        "model-artifacts",
        "integration-test",
        "pipeline-summary",
    ] {
        let dir = ws.artifacts_root().join(dir);
        assert!(dir.join(JOB_LOG).is_file(), "{} has no job log", dir.display());
        assert!(dir.join(RETENTION_MARKER).is_file());
    }
    let summary = std::fs::read_to_string(ws.artifacts_root().join("pipeline-summary").join(SUMMARY_MD)).unwrap();
    assert!(summary.contains("PASSED"));
    assert!(!summary.contains("not produced"));
}

#[tokio::test]
async fn test_failing_tests_skip_training_and_integration() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default().with(
        "test",
        Script {
            exit_code: 1,
            ..Script::default()
        },
    ));
    let ledger = Arc::new(MemoryRunLedger::new());
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor.clone(), ledger)
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(state(&report, "test"), JobState::FailedBlocking);
    assert_eq!(state(&report, "train"), JobState::Skipped);
    assert_eq!(state(&report, "integration-test"), JobState::Skipped);
    assert_eq!(state(&report, "summary"), JobState::Passed);
    assert_eq!(state(&report, "notify"), JobState::Passed);
    assert_eq!(report.verdict, RunVerdict::Failed);
    assert_eq!(report.exit_code(), 1);

    // Never attempted.
    let executed = executor.executed();
    assert!(!executed.contains(&"train".to_string()));
    assert!(!executed.contains(&"integration-test".to_string()));

    assert_eq!(
        report.job("train").unwrap().reason.as_deref(),
        Some("upstream 'test' is failed-blocking")
    );
    let summary = std::fs::read_to_string(ws.artifacts_root().join("pipeline-summary").join(SUMMARY_MD)).unwrap();
    assert!(summary.contains("`train` / model: not produced"));
    assert!(report.render_text().contains("train [skipped]"));
}

#[tokio::test]
async fn test_lint_failure_does_not_fail_run() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default().with(
        "lint",
        Script {
            exit_code: 1,
            ..Script::default()
        },
    ));
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor.clone(), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(state(&report, "lint"), JobState::FailedNonBlocking);
    for job in ["test", "train", "integration-test", "summary", "notify"] {
        assert_eq!(state(&report, job), JobState::Passed, "{job}");
    }
    assert_eq!(report.verdict, RunVerdict::Passed);
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_scheduled_run_only_trains_and_validates() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default());
    let graph = scheduled_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor.clone(), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Schedule, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(executor.executed(), vec!["train", "integration-test"]);
    assert!(report.job("lint").is_none());
    assert!(report.job("test").is_none());
    assert_eq!(report.trigger, Trigger::Schedule);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_training_without_model_fails_blocking() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default().with(
        "train",
        Script {
            exit_code: 0,
            omit: vec!["model"],
        },
    ));
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor, Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    let train = report.job("train").unwrap();
    assert_eq!(train.state, JobState::FailedBlocking);
    assert_eq!(train.exit_code, Some(0));
    assert!(train.reason.as_deref().unwrap().contains("model"));
    assert_eq!(state(&report, "integration-test"), JobState::Skipped);
    assert_eq!(report.exit_code(), 1);

    let log = std::fs::read_to_string(ws.artifacts_root().join("model-artifacts").join(JOB_LOG)).unwrap();
    assert!(log.contains("required artifacts not produced: model"));
}

#[tokio::test]
async fn test_unchanged_inputs_give_identical_state_sequence() {
    let (_root, ws) = workspace();
    let graph = push_graph(&PipelineConfig::default()).unwrap();
    let make = || {
        Arc::new(ScriptedExecutor::default().with(
            "lint",
            Script {
                exit_code: 1,
                ..Script::default()
            },
        ))
    };
    let ledger = Arc::new(MemoryRunLedger::new());

    let first = orchestrator(make(), ledger.clone())
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();
    let second = orchestrator(make(), ledger.clone())
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.state_sequence(), second.state_sequence());
    assert_eq!(ledger.list_runs().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_model_retained_longer_than_coverage() {
    let (_root, ws) = workspace();
    let graph = push_graph(&PipelineConfig::default()).unwrap();
    orchestrator(Arc::new(ScriptedExecutor::default()), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    let model = RetentionMarker::read(&ws.artifacts_root().join("model-artifacts"))
        .unwrap()
        .unwrap();
    let tests = RetentionMarker::read(&ws.artifacts_root().join("test-results"))
        .unwrap()
        .unwrap();
    assert_eq!(model.retention_days, 90);
    assert_eq!(tests.retention_days, 30);
    assert!(model.retention_days >= tests.retention_days);
}

#[tokio::test]
async fn test_ledger_records_every_transition() {
    let (_root, ws) = workspace();
    let ledger = Arc::new(MemoryRunLedger::new());
    let executor = Arc::new(ScriptedExecutor::default().with(
        "test",
        Script {
            exit_code: 2,
            ..Script::default()
        },
    ));
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor, ledger.clone())
        .run(&graph, Trigger::Manual, &ws, AbortSignal::never())
        .await
        .unwrap();

    let events = ledger.get_events(&report.run_id).await.unwrap();
    let kinds: Vec<RunEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds.first(), Some(&RunEventKind::RunStarted));
    assert_eq!(kinds.last(), Some(&RunEventKind::RunFinished));
    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::JobSkipped).count(),
        2
    );
    // lint, test, summary, notify started and finished.
    assert_eq!(
        kinds.iter().filter(|k| **k == RunEventKind::JobStarted).count(),
        4
    );
    for (i, event) in events.iter().enumerate() {
        assert_eq!(event.seq, i as u64 + 1);
    }

    let record = ledger.get_run(&report.run_id).await.unwrap();
    assert_eq!(record.status, LedgerStatus::Finished);
    assert_eq!(record.graph, "push");
    assert_eq!(record.report.unwrap().exit_code(), 1);
}

#[tokio::test]
async fn test_setup_failure_runs_no_jobs() {
    let (_root, ws) = workspace();
    let executor = Arc::new(ScriptedExecutor::default());
    let ledger = Arc::new(MemoryRunLedger::new());
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = Orchestrator::new(executor.clone(), Arc::new(FailingPreflight), ledger.clone())
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::SetupFailed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.jobs.is_empty());
    assert!(executor.executed().is_empty());
    assert!(report.render_text().contains("SETUP FAILED"));
    assert!(report.render_text().contains("not available"));

    let record = ledger.get_run(&report.run_id).await.unwrap();
    assert_eq!(record.status, LedgerStatus::Finished);
}

/// Blocks inside `train` until the run is aborted.
struct HangingExecutor {
    started: Arc<tokio::sync::Notify>,
}

#[async_trait]
impl StepExecutor for HangingExecutor {
    async fn execute(&self, job: &JobSpec, _ctx: &JobContext<'_>) -> Result<StepOutcome> {
        if job.id == "train" {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(StepOutcome::success(""))
    }
}

#[tokio::test]
async fn test_abort_fails_in_flight_job_and_skips_rest() {
    let (_root, ws) = workspace();
    let started = Arc::new(tokio::sync::Notify::new());
    let executor = Arc::new(HangingExecutor {
        started: started.clone(),
    });
    let graph = scheduled_graph(&PipelineConfig::default()).unwrap();
    let (handle, signal) = abort_pair();

    tokio::spawn(async move {
        started.notified().await;
        handle.abort();
    });

    let report = Orchestrator::new(executor, Arc::new(NoopPreflight), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Schedule, &ws, signal)
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(state(&report, "train"), JobState::FailedBlocking);
    assert_eq!(state(&report, "integration-test"), JobState::Skipped);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_failure() {
    let (_root, ws) = workspace();
    let started = Arc::new(tokio::sync::Notify::new());
    let executor = Arc::new(HangingExecutor { started });
    let mut config = PipelineConfig::default();
    config.training.timeout_secs = 5;
    let graph = scheduled_graph(&config).unwrap();

    let report = Orchestrator::new(executor, Arc::new(NoopPreflight), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Schedule, &ws, AbortSignal::never())
        .await
        .unwrap();

    let train = report.job("train").unwrap();
    assert_eq!(train.state, JobState::FailedBlocking);
    assert!(train.reason.as_deref().unwrap().contains("timed out"));
    assert_eq!(report.status, RunStatus::Completed);
}

fn write_executable(path: &Path, body: &str) -> PathBuf {
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
    path.to_path_buf()
}

/// Stands in for every Python tool the pipeline invokes.
const FAKE_TOOLCHAIN: &str = r#"case "$1" in
  --version) echo "Python 3.11.8" ;;
  -m)
    case "$2" in
      pytest)
        for a in "$@"; do
          case "$a" in
            --cov-report=xml:*) printf '<coverage line-rate="0.87"></coverage>\n' > "${a#--cov-report=xml:}" ;;
            --cov-report=html:*) mkdir -p "${a#--cov-report=html:}" ;;
            --junitxml=*) printf '<testsuite/>\n' > "${a#--junitxml=}" ;;
          esac
        done
        echo "==== 12 passed, 2 deselected in 0.42s ====" ;;
      *) echo "$2: no findings" ;;
    esac ;;
  -c)
    case "$3" in
      *.joblib) cat > /dev/null; echo '{"prediction": 1, "probability": 0.73, "risk": "HIGH"}' ;;
    esac ;;
  src/train_pipeline.py)
    mkdir -p models
    printf 'trained-model' > models/heart_disease_pipeline_prod.joblib
    echo "Training complete" ;;
esac"#;

#[tokio::test]
async fn test_builtin_steps_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let r = root.path();
    std::fs::create_dir_all(r.join("src")).unwrap();
    std::fs::create_dir_all(r.join("tests")).unwrap();
    std::fs::write(r.join("src/train_pipeline.py"), "").unwrap();

    let mut config = PipelineConfig::default();
    config.python = write_executable(&r.join("python"), FAKE_TOOLCHAIN)
        .display()
        .to_string();
    let ws = Workspace::open(r, &config).unwrap();
    let ledger = Arc::new(FsRunLedger::new(ws.state_dir()).unwrap());
    let orchestrator = Orchestrator::new(
        Arc::new(BuiltinExecutor::new(config.clone()).unwrap()),
        Arc::new(ToolchainPreflight::new(config.clone())),
        ledger.clone(),
    );
    let graph = push_graph(&config).unwrap();

    let report = orchestrator
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0, "{}", report.render_text());
    let artifacts = ws.artifacts_root();
    assert!(artifacts.join("lint-reports/flake8-report.txt").is_file());
    assert!(artifacts.join("test-results/coverage.xml").is_file());
    assert!(artifacts.join("test-results/htmlcov").is_dir());
    assert_eq!(
        std::fs::read(artifacts.join("model-artifacts/heart_disease_pipeline_prod.joblib")).unwrap(),
        b"trained-model"
    );

    let test_summary: serde_json::Value = serde_json::from_slice(
        &std::fs::read(artifacts.join("test-results/test-summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(test_summary["counts"]["passed"], 12);
    assert_eq!(test_summary["coverage_percent"], 87.0);

    let integration: serde_json::Value = serde_json::from_slice(
        &std::fs::read(artifacts.join("integration-test/integration-report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(integration["passed"], true);
    assert_eq!(integration["response"]["risk"], "HIGH");

    let runs = ledger.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_id, report.run_id);
    assert!(runs[0].report.is_some());
}

#[tokio::test]
async fn test_builtin_preflight_reports_missing_entry_point() {
    let root = tempfile::tempdir().unwrap();
    let mut config = PipelineConfig::default();
    config.python = write_executable(&root.path().join("python"), FAKE_TOOLCHAIN)
        .display()
        .to_string();
    let ws = Workspace::open(root.path(), &config).unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(BuiltinExecutor::new(config.clone()).unwrap()),
        Arc::new(ToolchainPreflight::new(config.clone())),
        Arc::new(MemoryRunLedger::new()),
    );

    let report = orchestrator
        .run(&scheduled_graph(&config).unwrap(), Trigger::Schedule, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::SetupFailed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.setup_problems[0].contains("train_pipeline.py"));
    assert!(!ws.artifacts_root().join("model-artifacts").exists());
}

#[tokio::test]
async fn test_unwritable_artifacts_root_fails_jobs_not_run() {
    let (root, ws) = workspace();
    std::fs::write(root.path().join("artifacts"), b"not a directory").unwrap();
    let executor = Arc::new(ScriptedExecutor::default());
    let ledger = Arc::new(MemoryRunLedger::new());
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let report = orchestrator(executor.clone(), ledger.clone())
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(state(&report, "lint"), JobState::FailedNonBlocking);
    assert_eq!(state(&report, "test"), JobState::FailedBlocking);
    assert!(report
        .job("test")
        .unwrap()
        .reason
        .as_deref()
        .unwrap()
        .contains("cannot prepare artifact directory"));
    assert_eq!(state(&report, "train"), JobState::Skipped);
    assert_eq!(state(&report, "integration-test"), JobState::Skipped);
    assert_eq!(state(&report, "summary"), JobState::FailedNonBlocking);
    assert_eq!(state(&report, "notify"), JobState::Passed);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.exit_code(), 1);
    // Only the job without a directory reached its step.
    assert_eq!(executor.executed(), vec!["notify"]);

    let record = ledger.get_run(&report.run_id).await.unwrap();
    assert_eq!(record.status, LedgerStatus::Finished);
}

/// Rejects the `job_started` event for one job.
struct BrokenLedger {
    inner: MemoryRunLedger,
    reject_start_of: &'static str,
}

#[async_trait]
impl RunLedger for BrokenLedger {
    async fn create_run(&self, record: RunRecord) -> Result<()> {
        self.inner.create_run(record).await
    }

    async fn append_event(&self, run_id: &str, event: RunEvent) -> Result<()> {
        if event.kind == RunEventKind::JobStarted && event.payload["job"] == self.reject_start_of {
            return Err(MlciError::Ledger("disk full".to_string()));
        }
        self.inner.append_event(run_id, event).await
    }

    async fn finish_run(&self, report: &mlci_core::RunReport) -> Result<()> {
        self.inner.finish_run(report).await
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.inner.get_run(run_id).await
    }

    async fn get_events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        self.inner.get_events(run_id).await
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        self.inner.list_runs().await
    }
}

#[tokio::test]
async fn test_ledger_failure_still_finishes_run_record() {
    let (_root, ws) = workspace();
    let ledger = Arc::new(BrokenLedger {
        inner: MemoryRunLedger::new(),
        reject_start_of: "test",
    });
    let graph = push_graph(&PipelineConfig::default()).unwrap();

    let err = Orchestrator::new(
        Arc::new(ScriptedExecutor::default()),
        Arc::new(NoopPreflight),
        ledger.clone(),
    )
    .run(&graph, Trigger::Push, &ws, AbortSignal::never())
    .await
    .unwrap_err();
    assert!(err.to_string().contains("disk full"));

    let runs = ledger.list_runs().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, LedgerStatus::Finished);
    let report = runs[0].report.clone().unwrap();
    assert_eq!(report.status, RunStatus::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(state(&report, "lint"), JobState::Passed);
    assert_eq!(state(&report, "test"), JobState::FailedBlocking);
    for job in ["train", "integration-test", "summary", "notify"] {
        assert_eq!(state(&report, job), JobState::Skipped, "{job}");
    }
}

#[tokio::test]
async fn test_skipped_job_leaves_no_stale_output() {
    let (_root, ws) = workspace();
    let graph = push_graph(&PipelineConfig::default()).unwrap();
    orchestrator(Arc::new(ScriptedExecutor::default()), Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();
    let models = ws.artifacts_root().join("model-artifacts");
    assert!(models.join(JOB_LOG).is_file());

    let failing = Arc::new(ScriptedExecutor::default().with(
        "test",
        Script {
            exit_code: 1,
            ..Script::default()
        },
    ));
    let report = orchestrator(failing, Arc::new(MemoryRunLedger::new()))
        .run(&graph, Trigger::Push, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(state(&report, "train"), JobState::Skipped);
    assert!(!models.exists());
    assert!(!ws.artifacts_root().join("integration-test").exists());
    assert!(ws.artifacts_root().join("test-results").join(JOB_LOG).is_file());
}

#[tokio::test]
async fn test_entry_point_keeping_existing_model_passes() {
    let root = tempfile::tempdir().unwrap();
    let r = root.path();
    std::fs::create_dir_all(r.join("src")).unwrap();
    std::fs::create_dir_all(r.join("models")).unwrap();
    std::fs::write(r.join("src/train_pipeline.py"), "").unwrap();
    std::fs::write(r.join("models/heart_disease_pipeline_prod.joblib"), b"kept-model").unwrap();

    let mut config = PipelineConfig::default();
    config.python = write_executable(&r.join("python"), UP_TO_DATE_TOOLCHAIN)
        .display()
        .to_string();
    let ws = Workspace::open(r, &config).unwrap();
    let orchestrator = Orchestrator::new(
        Arc::new(BuiltinExecutor::new(config.clone()).unwrap()),
        Arc::new(ToolchainPreflight::new(config.clone())),
        Arc::new(MemoryRunLedger::new()),
    );

    let report = orchestrator
        .run(&scheduled_graph(&config).unwrap(), Trigger::Schedule, &ws, AbortSignal::never())
        .await
        .unwrap();

    assert_eq!(state(&report, "train"), JobState::Passed, "{}", report.render_text());
    assert_eq!(state(&report, "integration-test"), JobState::Passed);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(
        std::fs::read(ws.artifacts_root().join("model-artifacts/heart_disease_pipeline_prod.joblib")).unwrap(),
        b"kept-model"
    );
}

/// Training exits 0 without rewriting the model.
const UP_TO_DATE_TOOLCHAIN: &str = r#"case "$1" in
  --version) echo "Python 3.11.8" ;;
  -c)
    case "$3" in
      *.joblib) cat > /dev/null; echo '{"prediction": 1, "probability": 0.73, "risk": "HIGH"}' ;;
    esac ;;
  src/train_pipeline.py) echo "model up to date" ;;
esac"#;
