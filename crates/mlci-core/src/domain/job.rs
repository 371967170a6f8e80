//! Job definitions: the static nodes of a pipeline graph.

use serde::{Deserialize, Serialize};

use crate::domain::artifact::ArtifactDecl;
use crate::steps::quality_gate::LintTool;

/// Well-known job identifiers of the reference pipeline.
pub mod ids {
    pub const LINT: &str = "lint";
    pub const TEST: &str = "test";
    pub const TRAIN: &str = "train";
    pub const INTEGRATION: &str = "integration-test";
    pub const SUMMARY: &str = "summary";
    pub const NOTIFY: &str = "notify";
}

/// What a job does when it runs.
///
/// A closed set: every variant maps to exactly one step implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobAction {
    /// Run static checks. With `strict`, informational checks fail the job too.
    QualityGate { tools: Vec<LintTool>, strict: bool },

    /// Run the pytest suite, optionally collecting coverage.
    TestSuite { coverage: bool },

    /// Invoke the external training entry point.
    Train { verbose: bool },

    /// Load the trained model and issue one inference call.
    IntegrationValidation,

    /// Render the run summary from upstream outcomes.
    Summary,

    /// Publish the run summary.
    Notify,
}

impl JobAction {
    /// Short label used in logs and plans.
    pub fn label(&self) -> &'static str {
        match self {
            JobAction::QualityGate { .. } => "quality_gate",
            JobAction::TestSuite { .. } => "test_suite",
            JobAction::Train { .. } => "train",
            JobAction::IntegrationValidation => "integration_validation",
            JobAction::Summary => "summary",
            JobAction::Notify => "notify",
        }
    }
}

/// An upstream edge. A blocking edge gates the dependent job on the
/// upstream outcome; a non-blocking edge only orders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub job: String,
    pub blocking: bool,
}

/// Static definition of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Stable identifier, unique within a graph.
    pub id: String,

    /// Human-readable name.
    pub display_name: String,

    /// Ordered upstream dependencies.
    pub depends_on: Vec<Dependency>,

    /// Whether a failure of this job halts downstream jobs and fails the run.
    pub blocking: bool,

    /// What to run.
    pub action: JobAction,

    /// Directory (under the artifacts root) owned by this job.
    pub artifact_dir: Option<String>,

    /// Artifacts this job declares.
    pub artifacts: Vec<ArtifactDecl>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl JobSpec {
    /// Create a blocking job with no dependencies, owning a directory named after its id.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, action: JobAction) -> Self {
        let id = id.into();
        Self {
            artifact_dir: Some(id.clone()),
            id,
            display_name: display_name.into(),
            depends_on: Vec::new(),
            blocking: true,
            action,
            artifacts: Vec::new(),
            timeout_secs: 0,
        }
    }

    /// Mark this job non-blocking.
    pub fn non_blocking(mut self) -> Self {
        self.blocking = false;
        self
    }

    /// Add a blocking dependency on `job`.
    pub fn needs(mut self, job: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            job: job.into(),
            blocking: true,
        });
        self
    }

    /// Add an ordering-only dependency on `job`.
    pub fn after(mut self, job: impl Into<String>) -> Self {
        self.depends_on.push(Dependency {
            job: job.into(),
            blocking: false,
        });
        self
    }

    /// Set the artifact directory.
    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.artifact_dir = Some(dir.into());
        self
    }

    /// This job writes no artifact directory.
    pub fn without_dir(mut self) -> Self {
        self.artifact_dir = None;
        self
    }

    /// Declare an artifact.
    pub fn artifact(mut self, decl: ArtifactDecl) -> Self {
        self.artifacts.push(decl);
        self
    }

    /// Set the timeout.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Ids of blocking upstream jobs.
    pub fn blocking_dependencies(&self) -> impl Iterator<Item = &str> {
        self.depends_on
            .iter()
            .filter(|d| d.blocking)
            .map(|d| d.job.as_str())
    }

    /// Longest retention among declared artifacts.
    pub fn retention_days(&self) -> u32 {
        self.artifacts
            .iter()
            .map(|a| a.retention_days)
            .max()
            .unwrap_or(0)
    }
}
