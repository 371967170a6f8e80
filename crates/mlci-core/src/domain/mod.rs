//! Pipeline domain model: jobs, artifacts, job states and runs.

pub mod artifact;
pub mod job;
pub mod run;
pub mod state;

pub use artifact::{ArtifactDecl, ArtifactRecord};
pub use job::{ids, Dependency, JobAction, JobSpec};
pub use run::{JobOutcome, RunReport, RunStatus, RunVerdict, Trigger};
pub use state::{JobInstance, JobState};
