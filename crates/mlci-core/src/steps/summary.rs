//! Run summary: a Markdown page and a JSON document built from the
//! outcomes of every job that ran before it.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{JobContext, StepOutcome};
use crate::domain::job::JobSpec;
use crate::domain::run::{JobOutcome, RunVerdict, Trigger};
use crate::domain::state::JobState;
use crate::error::Result;

pub const SUMMARY_MD: &str = "summary.md";
pub const SUMMARY_JSON: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub name: String,
    pub path: PathBuf,
    pub produced: bool,
    pub retention_days: u32,
    pub digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryJob {
    pub job_id: String,
    pub display_name: String,
    pub state: JobState,
    pub blocking: bool,
    pub reason: Option<String>,
    pub artifacts: Vec<SummaryArtifact>,
}

/// Summary of the jobs finished so far in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub run_id: String,
    pub trigger: Trigger,
    pub verdict: RunVerdict,
    pub passed: usize,
    pub failed: usize,
    pub failed_non_blocking: usize,
    pub skipped: usize,
    pub jobs: Vec<SummaryJob>,
    pub generated_at: DateTime<Utc>,
}

impl PipelineSummary {
    pub fn from_outcomes(run_id: &str, trigger: Trigger, outcomes: &[JobOutcome]) -> Self {
        let count = |s: JobState| outcomes.iter().filter(|o| o.state == s).count();
        Self {
            run_id: run_id.to_string(),
            trigger,
            verdict: RunVerdict::from_outcomes(outcomes),
            passed: count(JobState::Passed),
            failed: count(JobState::FailedBlocking),
            failed_non_blocking: count(JobState::FailedNonBlocking),
            skipped: count(JobState::Skipped),
            jobs: outcomes
                .iter()
                .map(|o| SummaryJob {
                    job_id: o.job_id.clone(),
                    display_name: o.display_name.clone(),
                    state: o.state,
                    blocking: o.blocking,
                    reason: o.reason.clone(),
                    artifacts: o
                        .artifacts
                        .iter()
                        .map(|a| SummaryArtifact {
                            name: a.name.clone(),
                            path: a.path.clone(),
                            produced: a.produced,
                            retention_days: a.retention_days,
                            digest: a.short_digest().map(str::to_string),
                        })
                        .collect(),
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }

    pub fn from_context(ctx: &JobContext<'_>) -> Self {
        Self::from_outcomes(ctx.run_id, ctx.trigger, ctx.upstream)
    }

    /// One-line headline for logs and notifications.
    pub fn headline(&self) -> String {
        format!(
            "{}: {} passed, {} failed, {} failed (non-blocking), {} skipped",
            match self.verdict {
                RunVerdict::Passed => "PASSED",
                RunVerdict::Failed => "FAILED",
            },
            self.passed,
            self.failed,
            self.failed_non_blocking,
            self.skipped
        )
    }

    pub fn render_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Pipeline summary\n");
        let _ = writeln!(
            md,
            "Run `{}` (trigger: {}): **{}**\n",
            self.run_id,
            self.trigger,
            self.headline()
        );
        let _ = writeln!(md, "| Job | State | Blocking | Details |");
        let _ = writeln!(md, "|-----|-------|----------|---------|");
        for job in &self.jobs {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} |",
                job.display_name,
                job.state,
                if job.blocking { "yes" } else { "no" },
                job.reason.as_deref().unwrap_or("")
            );
        }

        let _ = writeln!(md, "\n## Artifacts\n");
        for job in &self.jobs {
            for artifact in &job.artifacts {
                let status = if artifact.produced {
                    match &artifact.digest {
                        Some(d) => format!("produced (sha256 {d})"),
                        None => "produced".to_string(),
                    }
                } else {
                    "not produced".to_string()
                };
                let _ = writeln!(
                    md,
                    "- `{}` / {}: {}, kept {} days",
                    job.job_id, artifact.name, status, artifact.retention_days
                );
            }
        }
        md
    }
}

pub fn run(job: &JobSpec, ctx: &JobContext<'_>) -> Result<StepOutcome> {
    let dir = ctx.require_dir(job)?;
    let summary = PipelineSummary::from_context(ctx);
    let markdown = summary.render_markdown();
    std::fs::write(dir.join(SUMMARY_MD), &markdown)?;
    std::fs::write(dir.join(SUMMARY_JSON), serde_json::to_vec_pretty(&summary)?)?;
    Ok(StepOutcome::success(markdown))
}
