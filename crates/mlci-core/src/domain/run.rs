//! Runs: one execution of a pipeline graph, and the report it produces.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::artifact::ArtifactRecord;
use crate::domain::state::JobState;
use crate::error::MlciError;

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Code pushed to the repository.
    Push,
    /// Started by hand.
    Manual,
    /// Fired by the calendar trigger.
    Schedule,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Push => "push",
            Trigger::Manual => "manual",
            Trigger::Schedule => "schedule",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = MlciError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(Trigger::Push),
            "manual" | "workflow_dispatch" => Ok(Trigger::Manual),
            "schedule" | "scheduled" => Ok(Trigger::Schedule),
            other => Err(MlciError::Config(format!("unknown trigger: {other}"))),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every job reached a terminal state.
    Completed,
    /// The triggering environment aborted the run.
    Aborted,
    /// The environment check failed before any job started.
    SetupFailed,
}

/// Overall pass/fail verdict of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Passed,
    Failed,
}

impl RunVerdict {
    /// A run fails iff at least one job failed blocking.
    pub fn from_outcomes(outcomes: &[JobOutcome]) -> Self {
        if outcomes
            .iter()
            .any(|o| o.state == JobState::FailedBlocking)
        {
            RunVerdict::Failed
        } else {
            RunVerdict::Passed
        }
    }
}

/// Terminal result of one job in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub display_name: String,
    pub state: JobState,
    pub blocking: bool,

    /// Exit code when the job was attempted.
    pub exit_code: Option<i32>,

    /// Why the job failed or was skipped.
    pub reason: Option<String>,

    pub duration_ms: u64,
    pub artifacts: Vec<ArtifactRecord>,
}

impl JobOutcome {
    /// Whether the job was attempted.
    pub fn attempted(&self) -> bool {
        self.state != JobState::Skipped
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub trigger: Trigger,
    pub status: RunStatus,
    pub verdict: RunVerdict,
    pub jobs: Vec<JobOutcome>,

    /// Problems found by the environment check (only for `SetupFailed`).
    pub setup_problems: Vec<String>,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Process exit code: 0 passed, 1 failed, 2 setup failed.
    pub fn exit_code(&self) -> i32 {
        match (self.status, self.verdict) {
            (RunStatus::SetupFailed, _) => 2,
            (_, RunVerdict::Failed) => 1,
            (_, RunVerdict::Passed) => 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code() == 0
    }

    /// Look up a job outcome by id.
    pub fn job(&self, job_id: &str) -> Option<&JobOutcome> {
        self.jobs.iter().find(|j| j.job_id == job_id)
    }

    /// Ordered `(job_id, state)` pairs.
    pub fn state_sequence(&self) -> Vec<(String, JobState)> {
        self.jobs
            .iter()
            .map(|j| (j.job_id.clone(), j.state))
            .collect()
    }

    pub fn count(&self, state: JobState) -> usize {
        self.jobs.iter().filter(|j| j.state == state).count()
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }

    /// Human-readable summary listing every job and why it ended where it did.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Run {} ({}): {}\n",
            self.run_id,
            self.trigger,
            match (self.status, self.verdict) {
                (RunStatus::SetupFailed, _) => "SETUP FAILED",
                (RunStatus::Aborted, _) => "ABORTED",
                (_, RunVerdict::Passed) => "PASSED",
                (_, RunVerdict::Failed) => "FAILED",
            }
        ));

        for problem in &self.setup_problems {
            out.push_str(&format!("  ! {problem}\n"));
        }

        for job in &self.jobs {
            let mark = match job.state {
                JobState::Passed => "✓",
                JobState::FailedBlocking => "✗",
                JobState::FailedNonBlocking => "!",
                JobState::Skipped => "-",
                JobState::Pending | JobState::Running => "?",
            };
            out.push_str(&format!("  {} {} [{}]", mark, job.job_id, job.state));
            if let Some(code) = job.exit_code {
                out.push_str(&format!(" exit={code}"));
            }
            if job.attempted() {
                out.push_str(&format!(" {}ms", job.duration_ms));
            }
            if let Some(reason) = &job.reason {
                out.push_str(&format!(": {reason}"));
            }
            out.push('\n');
        }

        if !self.jobs.is_empty() {
            out.push_str(&format!(
                "Summary: {} passed, {} failed, {} failed (non-blocking), {} skipped\n",
                self.count(JobState::Passed),
                self.count(JobState::FailedBlocking),
                self.count(JobState::FailedNonBlocking),
                self.count(JobState::Skipped),
            ));
        }
        out.push_str(&format!("Duration: {}ms\n", self.duration_ms()));
        out
    }
}
