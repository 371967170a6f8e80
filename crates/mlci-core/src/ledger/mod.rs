//! Run ledger: append-only record of every pipeline run.
//!
//! The event stream is the ground truth of a run; the [`RunRecord`] is an
//! index over it, finalized with the [`RunReport`] once the run ends.
//!
//! Implementations:
//! - [`FsRunLedger`]: JSON files under the workspace state directory.
//! - [`MemoryRunLedger`]: in-process, for tests.

pub mod fs;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::run::{RunReport, Trigger};
use crate::error::Result;

pub use fs::FsRunLedger;
pub use memory::MemoryRunLedger;

/// Kind of a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted,
    JobStarted,
    JobFinished,
    JobSkipped,
    RunFinished,
}

/// A single event in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    /// Monotonic sequence number within the run, starting at 1.
    pub seq: u64,
    pub kind: RunEventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    Running,
    Finished,
}

/// Index entry for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub graph: String,
    pub trigger: Trigger,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<RunReport>,
}

impl RunRecord {
    pub fn new(run_id: &str, graph: &str, trigger: Trigger) -> Self {
        Self {
            run_id: run_id.to_string(),
            graph: graph.to_string(),
            trigger,
            status: LedgerStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            report: None,
        }
    }
}

/// Persistence for runs.
///
/// Guarantees:
/// - Events are ordered by `seq` within a run.
/// - A finished run accepts no further events.
#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Register a new run.
    async fn create_run(&self, record: RunRecord) -> Result<()>;

    /// Append an event to a running run.
    async fn append_event(&self, run_id: &str, event: RunEvent) -> Result<()>;

    /// Finalize a run with its report.
    async fn finish_run(&self, report: &RunReport) -> Result<()>;

    async fn get_run(&self, run_id: &str) -> Result<RunRecord>;

    async fn get_events(&self, run_id: &str) -> Result<Vec<RunEvent>>;

    /// All runs, newest first.
    async fn list_runs(&self) -> Result<Vec<RunRecord>>;
}

/// Records one run's events with monotonic sequence numbers.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: String,
    next_seq: u64,
}

impl RunRecorder {
    /// Register the run and emit `run_started`.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        run_id: &str,
        graph: &str,
        trigger: Trigger,
    ) -> Result<Self> {
        ledger
            .create_run(RunRecord::new(run_id, graph, trigger))
            .await?;
        let mut recorder = Self {
            ledger,
            run_id: run_id.to_string(),
            next_seq: 1,
        };
        recorder
            .record(
                RunEventKind::RunStarted,
                serde_json::json!({ "graph": graph, "trigger": trigger }),
            )
            .await?;
        Ok(recorder)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub async fn record(&mut self, kind: RunEventKind, payload: serde_json::Value) -> Result<()> {
        let event = RunEvent {
            seq: self.next_seq,
            kind,
            payload,
            timestamp: Utc::now(),
        };
        self.ledger.append_event(&self.run_id, event).await?;
        self.next_seq += 1;
        Ok(())
    }

    /// Emit `run_finished` and finalize the record.
    pub async fn finish(mut self, report: &RunReport) -> Result<()> {
        self.record(
            RunEventKind::RunFinished,
            serde_json::json!({
                "status": report.status,
                "verdict": report.verdict,
                "exit_code": report.exit_code(),
            }),
        )
        .await?;
        self.ledger.finish_run(report).await
    }
}
