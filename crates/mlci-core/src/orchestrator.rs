//! Pipeline orchestrator: runs a [`PipelineGraph`] one job at a time in
//! topological order.
//!
//! Per job:
//! - any blocking dependency not satisfied → `skipped`, never attempted
//! - otherwise the job's directory is emptied, the step runs under its
//!   timeout, and the outcome is `passed` only when the step exits 0 and
//!   every required artifact exists
//! - an abort marks the in-flight job `failed-blocking` and every job not
//!   yet started `skipped`
//!
//! Every transition is recorded in the run ledger.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{error, info, warn};

use crate::abort::AbortSignal;
use crate::domain::artifact::ArtifactRecord;
use crate::domain::job::JobSpec;
use crate::domain::run::{JobOutcome, RunReport, RunStatus, RunVerdict, Trigger};
use crate::domain::state::{JobInstance, JobState};
use crate::error::{MlciError, Result};
use crate::graph::PipelineGraph;
use crate::ledger::{RunEventKind, RunLedger, RunRecorder};
use crate::preflight::Preflight;
use crate::retention::RetentionMarker;
use crate::steps::{JobContext, StepExecutor, StepOutcome};
use crate::workspace::{Workspace, JOB_LOG};

/// How an attempted job ended, before classification.
enum Attempt {
    Finished(Result<StepOutcome>),
    TimedOut,
    Aborted,
}

pub struct Orchestrator {
    executor: Arc<dyn StepExecutor>,
    preflight: Arc<dyn Preflight>,
    ledger: Arc<dyn RunLedger>,
}

impl Orchestrator {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        preflight: Arc<dyn Preflight>,
        ledger: Arc<dyn RunLedger>,
    ) -> Self {
        Self {
            executor,
            preflight,
            ledger,
        }
    }

    /// Generate a sortable run id.
    pub fn new_run_id() -> String {
        let uuid = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &uuid[..8])
    }

    /// Execute `graph` to completion (or abort).
    ///
    /// Job failures, including errors on a job's own directory, are part of
    /// the report. `Err` is returned only when the run cannot continue (for
    /// example a broken ledger); the ledger still receives a finished record
    /// in which the in-flight job failed and the rest were skipped.
    pub async fn run(
        &self,
        graph: &PipelineGraph,
        trigger: Trigger,
        ws: &Workspace,
        mut abort: AbortSignal,
    ) -> Result<RunReport> {
        let order = graph.topological_order()?;
        let run_id = Self::new_run_id();
        let started_at = Utc::now();
        let mut recorder =
            RunRecorder::start(self.ledger.clone(), &run_id, graph.name(), trigger).await?;
        info!(run_id = %run_id, graph = %graph.name(), trigger = %trigger, jobs = order.len(), "Run started");

        let problems = self.preflight.check(graph, ws).await;
        if !problems.is_empty() {
            for problem in &problems {
                error!(run_id = %run_id, "Setup problem: {problem}");
            }
            let report = RunReport {
                run_id,
                trigger,
                status: RunStatus::SetupFailed,
                verdict: RunVerdict::Failed,
                jobs: Vec::new(),
                setup_problems: problems,
                started_at,
                finished_at: Utc::now(),
            };
            recorder.finish(&report).await?;
            return Ok(report);
        }

        let mut progress = Progress::default();
        let outcome = self
            .run_jobs(&order, &run_id, trigger, ws, &mut abort, &mut recorder, &mut progress)
            .await;

        if let Err(e) = outcome {
            error!(run_id = %run_id, error = %e, "Run interrupted");
            let jobs = order
                .iter()
                .map(|job| progress.interrupted_outcome(job, ws, &e))
                .collect();
            let report = RunReport {
                run_id,
                trigger,
                status: RunStatus::Aborted,
                verdict: RunVerdict::Failed,
                jobs,
                setup_problems: Vec::new(),
                started_at,
                finished_at: Utc::now(),
            };
            if let Err(finish) = recorder.finish(&report).await {
                error!(run_id = %report.run_id, error = %finish, "Could not finalize interrupted run");
            }
            return Err(e);
        }

        let verdict = if progress.aborted {
            RunVerdict::Failed
        } else {
            RunVerdict::from_outcomes(&progress.outcomes)
        };
        let report = RunReport {
            run_id,
            trigger,
            status: if progress.aborted {
                RunStatus::Aborted
            } else {
                RunStatus::Completed
            },
            verdict,
            jobs: progress.outcomes,
            setup_problems: Vec::new(),
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            run_id = %report.run_id,
            verdict = ?report.verdict,
            exit_code = report.exit_code(),
            duration_ms = report.duration_ms(),
            "Run finished"
        );
        recorder.finish(&report).await?;
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_jobs(
        &self,
        order: &[&JobSpec],
        run_id: &str,
        trigger: Trigger,
        ws: &Workspace,
        abort: &mut AbortSignal,
        recorder: &mut RunRecorder,
        progress: &mut Progress,
    ) -> Result<()> {
        for &job in order {
            let mut instance = JobInstance::new(&job.id);

            let skip_reason = if progress.aborted || abort.is_aborted() {
                progress.aborted = true;
                Some("run aborted before this job started".to_string())
            } else {
                job.blocking_dependencies().find_map(|dep| {
                    let state = progress.state(dep);
                    (!state.satisfies_dependency())
                        .then(|| format!("upstream '{dep}' is {state}"))
                })
            };

            if let Some(reason) = skip_reason {
                instance.transition(JobState::Skipped)?;
                warn!(run_id = %run_id, job = %job.id, reason = %reason, "Job skipped");
                if let Err(e) = ws.clear_artifact_dir(job) {
                    warn!(job = %job.id, error = %e, "Could not clear artifact directory of skipped job");
                }
                progress.push(skipped_outcome(job, ws, reason.clone()));
                recorder
                    .record(
                        RunEventKind::JobSkipped,
                        serde_json::json!({ "job": job.id, "reason": reason }),
                    )
                    .await?;
                continue;
            }

            instance.transition(JobState::Running)?;
            progress.states.insert(job.id.clone(), JobState::Running);
            info!(run_id = %run_id, job = %job.id, action = job.action.label(), "Job started");
            recorder
                .record(
                    RunEventKind::JobStarted,
                    serde_json::json!({ "job": job.id, "action": job.action.label() }),
                )
                .await?;

            let start = Instant::now();
            let (dir, attempt) = match ws.prepare_artifact_dir(job) {
                Ok(dir) => {
                    let ctx = JobContext {
                        run_id,
                        trigger,
                        workspace: ws,
                        artifact_dir: dir.as_deref(),
                        upstream: &progress.outcomes,
                    };
                    let attempt = self.attempt(job, &ctx, abort).await;
                    (dir, attempt)
                }
                Err(e) => (
                    None,
                    Attempt::Finished(Err(MlciError::StepLaunch {
                        step: job.id.clone(),
                        reason: format!("cannot prepare artifact directory: {e}"),
                    })),
                ),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            if matches!(attempt, Attempt::Aborted) {
                progress.aborted = true;
            }
            let (mut outcome, log) = classify(job, dir.as_deref(), attempt, duration_ms);

            if let Some(dir) = dir.as_deref() {
                let marker = RetentionMarker::new(&job.id, run_id, job.retention_days(), Utc::now());
                if let Err(e) = write_job_files(dir, &log, &marker) {
                    record_failure(job, &mut outcome, format!("cannot write job files: {e}"));
                }
            }
            instance.transition(outcome.state)?;

            match outcome.state {
                JobState::Passed => {
                    info!(run_id = %run_id, job = %job.id, duration_ms, "Job passed")
                }
                JobState::FailedNonBlocking => warn!(
                    run_id = %run_id,
                    job = %job.id,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "Job failed (non-blocking)"
                ),
                _ => error!(
                    run_id = %run_id,
                    job = %job.id,
                    reason = outcome.reason.as_deref().unwrap_or(""),
                    "Job failed"
                ),
            }
            let event = serde_json::json!({
                "job": job.id,
                "state": outcome.state,
                "exit_code": outcome.exit_code,
                "reason": outcome.reason,
                "duration_ms": outcome.duration_ms,
            });
            progress.push(outcome);
            recorder.record(RunEventKind::JobFinished, event).await?;
        }
        Ok(())
    }

    /// Run one step under its timeout, racing the abort signal.
    async fn attempt(
        &self,
        job: &JobSpec,
        ctx: &JobContext<'_>,
        abort: &mut AbortSignal,
    ) -> Attempt {
        let step = async {
            let fut = self.executor.execute(job, ctx);
            if job.timeout_secs > 0 {
                match tokio::time::timeout(Duration::from_secs(job.timeout_secs), fut).await {
                    Ok(result) => Attempt::Finished(result),
                    Err(_) => Attempt::TimedOut,
                }
            } else {
                Attempt::Finished(fut.await)
            }
        };
        tokio::select! {
            attempt = step => attempt,
            _ = abort.aborted() => Attempt::Aborted,
        }
    }
}

/// Job states and outcomes accumulated while a run progresses.
#[derive(Default)]
struct Progress {
    states: HashMap<String, JobState>,
    outcomes: Vec<JobOutcome>,
    aborted: bool,
}

impl Progress {
    fn state(&self, job_id: &str) -> JobState {
        self.states.get(job_id).copied().unwrap_or(JobState::Pending)
    }

    fn push(&mut self, outcome: JobOutcome) {
        self.states.insert(outcome.job_id.clone(), outcome.state);
        self.outcomes.push(outcome);
    }

    /// Terminal outcome for `job` when the run stops on `err`.
    fn interrupted_outcome(&self, job: &JobSpec, ws: &Workspace, err: &MlciError) -> JobOutcome {
        if let Some(done) = self.outcomes.iter().find(|o| o.job_id == job.id) {
            return done.clone();
        }
        if self.state(&job.id) == JobState::Running {
            let mut outcome = skipped_outcome(job, ws, String::new());
            outcome.state = JobState::FailedBlocking;
            outcome.reason = Some(format!("run interrupted: {err}"));
            return outcome;
        }
        skipped_outcome(job, ws, "run interrupted before this job started".to_string())
    }
}

const ABORTED_REASON: &str = "aborted while running";

/// Artifact records for a job that never ran.
fn skipped_outcome(job: &JobSpec, ws: &Workspace, reason: String) -> JobOutcome {
    let dir = ws.artifact_dir(job);
    JobOutcome {
        job_id: job.id.clone(),
        display_name: job.display_name.clone(),
        state: JobState::Skipped,
        blocking: job.blocking,
        exit_code: None,
        reason: Some(reason),
        duration_ms: 0,
        artifacts: job
            .artifacts
            .iter()
            .map(|decl| ArtifactRecord::not_produced(&job.id, decl, dir.as_deref()))
            .collect(),
    }
}

/// Turn an attempt into a terminal outcome plus the text for `job.log`.
fn classify(
    job: &JobSpec,
    dir: Option<&Path>,
    attempt: Attempt,
    duration_ms: u64,
) -> (JobOutcome, String) {
    let artifacts: Vec<ArtifactRecord> = job
        .artifacts
        .iter()
        .map(|decl| match dir {
            Some(dir) => ArtifactRecord::inspect(&job.id, decl, dir),
            None => ArtifactRecord::not_produced(&job.id, decl, None),
        })
        .collect();

    let (state, exit_code, reason, log) = match attempt {
        Attempt::Finished(Ok(step)) => {
            let missing: Vec<&str> = job
                .artifacts
                .iter()
                .zip(&artifacts)
                .filter(|(decl, rec)| decl.required && !rec.produced)
                .map(|(decl, _)| decl.name.as_str())
                .collect();
            if !step.passed() {
                let reason = step
                    .detail
                    .clone()
                    .unwrap_or_else(|| format!("exited with code {}", step.exit_code));
                (JobState::failed(job.blocking), Some(step.exit_code), Some(reason), step.log)
            } else if !missing.is_empty() {
                let reason = format!("required artifacts not produced: {}", missing.join(", "));
                (JobState::failed(job.blocking), Some(step.exit_code), Some(reason), step.log)
            } else {
                (JobState::Passed, Some(0), None, step.log)
            }
        }
        Attempt::Finished(Err(e)) => {
            let reason = e.to_string();
            (JobState::failed(job.blocking), None, Some(reason.clone()), reason)
        }
        Attempt::TimedOut => {
            let reason = format!("timed out after {} seconds", job.timeout_secs);
            (JobState::failed(job.blocking), None, Some(reason.clone()), reason)
        }
        Attempt::Aborted => (
            JobState::FailedBlocking,
            None,
            Some(ABORTED_REASON.to_string()),
            ABORTED_REASON.to_string(),
        ),
    };

    let mut log = log;
    if let Some(reason) = &reason {
        if !log.contains(reason.as_str()) {
            if !log.is_empty() && !log.ends_with('\n') {
                log.push('\n');
            }
            log.push_str(&format!("mlci: {reason}\n"));
        }
    }

    (
        JobOutcome {
            job_id: job.id.clone(),
            display_name: job.display_name.clone(),
            state,
            blocking: job.blocking,
            exit_code,
            reason,
            duration_ms,
            artifacts,
        },
        log,
    )
}

fn write_job_files(dir: &Path, log: &str, marker: &RetentionMarker) -> Result<()> {
    std::fs::write(dir.join(JOB_LOG), log)?;
    marker.write(dir)
}

/// Fail `outcome` for an error found after the step ran, keeping any
/// earlier reason.
fn record_failure(job: &JobSpec, outcome: &mut JobOutcome, reason: String) {
    if outcome.state == JobState::Passed {
        outcome.state = JobState::failed(job.blocking);
    }
    outcome.reason = Some(match outcome.reason.take() {
        Some(earlier) => format!("{earlier}; {reason}"),
        None => reason,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::artifact::ArtifactDecl;
    use crate::domain::job::JobAction;

    fn job() -> JobSpec {
        JobSpec::new("train", "Train", JobAction::Train { verbose: false })
            .in_dir("model-artifacts")
            .artifact(ArtifactDecl::required("model", "model.joblib", 90))
            .artifact(ArtifactDecl::optional("notes", "notes.txt", 30))
    }

    #[test]
    fn test_exit_zero_without_required_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (outcome, log) = classify(
            &job(),
            Some(dir.path()),
            Attempt::Finished(Ok(StepOutcome::success("trained\n"))),
            5,
        );
        assert_eq!(outcome.state, JobState::FailedBlocking);
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.reason.unwrap().contains("model"));
        assert!(log.starts_with("trained\n"));
        assert!(log.contains("required artifacts not produced"));
    }

    #[test]
    fn test_optional_artifact_may_be_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("model.joblib"), b"m").unwrap();
        let (outcome, _) = classify(
            &job(),
            Some(dir.path()),
            Attempt::Finished(Ok(StepOutcome::success(""))),
            5,
        );
        assert_eq!(outcome.state, JobState::Passed);
        assert!(outcome.artifacts[0].produced);
        assert!(!outcome.artifacts[1].produced);
    }

    #[test]
    fn test_non_blocking_job_fails_non_blocking() {
        let job = job().non_blocking();
        let (outcome, _) = classify(
            &job,
            None,
            Attempt::Finished(Ok(StepOutcome::failure(1, "", "flake8 reported findings"))),
            1,
        );
        assert_eq!(outcome.state, JobState::FailedNonBlocking);
        assert_eq!(outcome.reason.as_deref(), Some("flake8 reported findings"));
    }

    #[test]
    fn test_step_error_and_timeout_are_failures() {
        let err = MlciError::StepLaunch {
            step: "train".to_string(),
            reason: "python: not found".to_string(),
        };
        let (outcome, log) = classify(&job(), None, Attempt::Finished(Err(err)), 1);
        assert_eq!(outcome.state, JobState::FailedBlocking);
        assert!(log.contains("python: not found"));

        let (outcome, _) = classify(&job().non_blocking(), None, Attempt::TimedOut, 1);
        assert_eq!(outcome.state, JobState::FailedNonBlocking);
    }

    #[test]
    fn test_abort_is_always_blocking() {
        let (outcome, _) = classify(&job().non_blocking(), None, Attempt::Aborted, 1);
        assert_eq!(outcome.state, JobState::FailedBlocking);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(Orchestrator::new_run_id(), Orchestrator::new_run_id());
    }
}
