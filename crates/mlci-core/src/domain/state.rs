//! Per-job lifecycle state machine.
//!
//! ```text
//! pending ─┬─> running ─┬─> passed
//!          │            ├─> failed_blocking
//!          │            └─> failed_non_blocking
//!          └─> skipped
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MlciError, Result};

/// Lifecycle state of a job instance within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Passed,
    FailedBlocking,
    FailedNonBlocking,
    Skipped,
}

impl JobState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Passed
                | JobState::FailedBlocking
                | JobState::FailedNonBlocking
                | JobState::Skipped
        )
    }

    /// Whether a dependent job may start on top of this state.
    ///
    /// A non-blocking failure is recorded but never halts the graph.
    pub fn satisfies_dependency(self) -> bool {
        matches!(self, JobState::Passed | JobState::FailedNonBlocking)
    }

    /// Whether the job failed.
    pub fn is_failure(self) -> bool {
        matches!(self, JobState::FailedBlocking | JobState::FailedNonBlocking)
    }

    /// Failure state for a job with the given blocking flag.
    pub fn failed(blocking: bool) -> Self {
        if blocking {
            JobState::FailedBlocking
        } else {
            JobState::FailedNonBlocking
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) | (JobState::Pending, JobState::Skipped) => true,
            (JobState::Running, JobState::Passed)
            | (JobState::Running, JobState::FailedBlocking)
            | (JobState::Running, JobState::FailedNonBlocking) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Passed => "passed",
            JobState::FailedBlocking => "failed-blocking",
            JobState::FailedNonBlocking => "failed-non-blocking",
            JobState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job's current state plus the guard that keeps transitions legal.
#[derive(Debug, Clone)]
pub struct JobInstance {
    job_id: String,
    state: JobState,
}

impl JobInstance {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Pending,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(MlciError::InvalidTransition {
                job: self.job_id.clone(),
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut job = JobInstance::new("test");
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Passed).unwrap();
        assert_eq!(job.state(), JobState::Passed);
        assert!(job.state().is_terminal());
    }

    #[test]
    fn test_skipped_job_cannot_start() {
        let mut job = JobInstance::new("train");
        job.transition(JobState::Skipped).unwrap();
        let err = job.transition(JobState::Running).unwrap_err();
        assert!(matches!(err, MlciError::InvalidTransition { .. }));
    }

    #[test]
    fn test_pending_cannot_jump_to_passed() {
        let mut job = JobInstance::new("lint");
        assert!(job.transition(JobState::Passed).is_err());
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            JobState::Passed,
            JobState::FailedBlocking,
            JobState::FailedNonBlocking,
            JobState::Skipped,
        ] {
            for next in [
                JobState::Pending,
                JobState::Running,
                JobState::Passed,
                JobState::Skipped,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(JobState::Passed.satisfies_dependency());
        assert!(JobState::FailedNonBlocking.satisfies_dependency());
        assert!(!JobState::FailedBlocking.satisfies_dependency());
        assert!(!JobState::Skipped.satisfies_dependency());
    }

    #[test]
    fn test_failed_respects_blocking_flag() {
        assert_eq!(JobState::failed(true), JobState::FailedBlocking);
        assert_eq!(JobState::failed(false), JobState::FailedNonBlocking);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&JobState::FailedNonBlocking).unwrap();
        assert_eq!(json, "\"failed_non_blocking\"");
    }
}
