//! Error types for pipeline definition and execution.

use thiserror::Error;

/// Errors produced by the mlci pipeline layer.
#[derive(Debug, Error)]
pub enum MlciError {
    /// A job id was declared twice in the same graph.
    #[error("duplicate job id in pipeline graph: {job}")]
    DuplicateJob { job: String },

    /// A dependency references a job that is not in the graph.
    #[error("job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    /// A referenced job was not found.
    #[error("job not found in graph: {job}")]
    JobNotFound { job: String },

    /// A dependency cycle was detected in the job graph.
    #[error("dependency cycle detected involving jobs: {jobs:?}")]
    DependencyCycle { jobs: Vec<String> },

    /// Two jobs declared the same artifact directory.
    #[error("artifact directory '{dir}' is shared by jobs '{first}' and '{second}'")]
    SharedArtifactDir {
        dir: String,
        first: String,
        second: String,
    },

    /// A job instance attempted an illegal state transition.
    #[error("invalid job state transition for '{job}': {from} -> {to}")]
    InvalidTransition {
        job: String,
        from: String,
        to: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A schedule expression could not be parsed.
    #[error("invalid schedule '{expr}': {reason}")]
    Schedule { expr: String, reason: String },

    /// A step was misconfigured or could not be launched.
    #[error("step '{step}' failed to launch: {reason}")]
    StepLaunch { step: String, reason: String },

    /// A prediction did not satisfy the training-time contract.
    #[error("prediction contract violation: {0}")]
    Contract(String),

    /// Run ledger persistence failed.
    #[error("run ledger error: {0}")]
    Ledger(String),

    /// Run not found in the ledger.
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, MlciError>;
