//! mlci: orchestration for an ML training pipeline.
//!
//! Models the CI/CD pipeline around an external training entry point and
//! prediction service:
//! - a static job DAG ([`graph`], [`pipeline`]) evaluated in topological order
//! - blocking and non-blocking failure propagation ([`orchestrator`])
//! - steps for static checks, tests, training and integration validation
//!   ([`steps`])
//! - artifact collection with per-job retention ([`retention`])
//! - a calendar trigger for periodic retraining ([`schedule`])
//! - an append-only run ledger ([`ledger`])

pub mod abort;
pub mod clean;
pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod ledger;
pub mod orchestrator;
pub mod pipeline;
pub mod prediction;
pub mod preflight;
pub mod retention;
pub mod schedule;
pub mod steps;
pub mod telemetry;
pub mod workspace;

// Re-export key types
pub use abort::{abort_pair, AbortHandle, AbortSignal};
pub use config::PipelineConfig;
pub use domain::{
    ArtifactDecl, ArtifactRecord, JobAction, JobOutcome, JobSpec, JobState, RunReport, RunStatus,
    RunVerdict, Trigger,
};
pub use error::{MlciError, Result};
pub use graph::PipelineGraph;
pub use ledger::{FsRunLedger, MemoryRunLedger, RunLedger};
pub use orchestrator::Orchestrator;
pub use pipeline::{graph_for_trigger, push_graph, scheduled_graph, Target};
pub use preflight::{NoopPreflight, Preflight, ToolchainPreflight};
pub use schedule::{CronSchedule, Scheduler};
pub use steps::{BuiltinExecutor, JobContext, StepExecutor, StepOutcome};
pub use workspace::Workspace;
