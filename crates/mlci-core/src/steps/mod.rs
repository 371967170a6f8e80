//! Step implementations: what a job actually does when it runs.
//!
//! The orchestrator only sees the [`StepExecutor`] seam. [`BuiltinExecutor`]
//! dispatches each [`JobAction`] to its step; tests substitute scripted
//! executors.

pub mod integration;
pub mod notify;
pub mod quality_gate;
pub mod runner;
pub mod summary;
pub mod test_suite;
pub mod training;

use std::path::Path;

use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::domain::job::{JobAction, JobSpec};
use crate::domain::run::{JobOutcome, Trigger};
use crate::error::{MlciError, Result};
use crate::workspace::Workspace;

pub use runner::{CommandOutput, CommandSpec, StepRunner};

/// Everything a step may read while it runs.
pub struct JobContext<'a> {
    pub run_id: &'a str,
    pub trigger: Trigger,
    pub workspace: &'a Workspace,

    /// The job's own (freshly emptied) artifact directory.
    pub artifact_dir: Option<&'a Path>,

    /// Outcomes of every job that finished earlier in this run, in order.
    pub upstream: &'a [JobOutcome],
}

impl<'a> JobContext<'a> {
    /// The artifact directory, or an error for steps that need one.
    pub fn require_dir(&self, job: &JobSpec) -> Result<&'a Path> {
        self.artifact_dir.ok_or_else(|| MlciError::StepLaunch {
            step: job.id.clone(),
            reason: "job declares no artifact directory".to_string(),
        })
    }

    pub fn upstream_job(&self, job_id: &str) -> Option<&'a JobOutcome> {
        self.upstream.iter().find(|o| o.job_id == job_id)
    }
}

/// Raw result of a step, before artifact checks.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// 0 on success.
    pub exit_code: i32,

    /// Verbatim output, written to the job log.
    pub log: String,

    /// One-line explanation of a failure.
    pub detail: Option<String>,
}

impl StepOutcome {
    pub fn success(log: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            log: log.into(),
            detail: None,
        }
    }

    pub fn failure(exit_code: i32, log: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            exit_code,
            log: log.into(),
            detail: Some(detail.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes one job.
///
/// `Err` means the step could not be carried out at all (the job fails with
/// the error as its reason); a step that ran and failed returns `Ok` with a
/// non-zero exit code.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext<'_>) -> Result<StepOutcome>;
}

/// Runs the real tools configured by [`PipelineConfig`].
pub struct BuiltinExecutor {
    config: PipelineConfig,
    http: reqwest::Client,
}

impl BuiltinExecutor {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mlci/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[async_trait]
impl StepExecutor for BuiltinExecutor {
    async fn execute(&self, job: &JobSpec, ctx: &JobContext<'_>) -> Result<StepOutcome> {
        match &job.action {
            JobAction::QualityGate { tools, strict } => {
                quality_gate::run(&self.config, job, ctx, tools, *strict).await
            }
            JobAction::TestSuite { coverage } => {
                test_suite::run(&self.config, job, ctx, *coverage).await
            }
            JobAction::Train { verbose } => training::run(&self.config, job, ctx, *verbose).await,
            JobAction::IntegrationValidation => {
                integration::run(&self.config, &self.http, job, ctx).await
            }
            JobAction::Summary => summary::run(job, ctx),
            JobAction::Notify => notify::run(&self.config, &self.http, ctx).await,
        }
    }
}
