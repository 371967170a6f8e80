//! Filesystem-backed run ledger.
//!
//! Layout: `<root>/runs/<run_id>/record.json` and
//! `<root>/runs/<run_id>/events.jsonl` (one JSON event per line).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tempfile::NamedTempFile;

use super::{LedgerStatus, RunEvent, RunLedger, RunRecord};
use crate::domain::run::RunReport;
use crate::error::{MlciError, Result};

const RECORD_FILE: &str = "record.json";
const EVENTS_FILE: &str = "events.jsonl";

pub struct FsRunLedger {
    runs_dir: PathBuf,
}

impl FsRunLedger {
    /// Create a ledger rooted at `root`. Creates `root/runs/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let runs_dir = root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty() || run_id.contains(['/', '\\']) || run_id.starts_with('.') {
            return Err(MlciError::Ledger(format!("invalid run id: {run_id:?}")));
        }
        Ok(self.runs_dir.join(run_id))
    }

    fn read_record(&self, run_id: &str) -> Result<RunRecord> {
        let path = self.run_dir(run_id)?.join(RECORD_FILE);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MlciError::RunNotFound {
                    run_id: run_id.to_string(),
                }
            } else {
                MlciError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Atomic write: temp file in the same directory, then rename.
    fn write_record(&self, record: &RunRecord) -> Result<()> {
        let dir = self.run_dir(&record.run_id)?;
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut tmp, record)?;
        tmp.write_all(b"\n")?;
        tmp.persist(dir.join(RECORD_FILE)).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl RunLedger for FsRunLedger {
    async fn create_run(&self, record: RunRecord) -> Result<()> {
        if self.run_dir(&record.run_id)?.join(RECORD_FILE).exists() {
            return Err(MlciError::Ledger(format!(
                "run {} already exists",
                record.run_id
            )));
        }
        self.write_record(&record)
    }

    async fn append_event(&self, run_id: &str, event: RunEvent) -> Result<()> {
        let record = self.read_record(run_id)?;
        if record.status != LedgerStatus::Running {
            return Err(MlciError::Ledger(format!("run {run_id} is already finished")));
        }
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_dir(run_id)?.join(EVENTS_FILE))?;
        file.write_all(&line)?;
        Ok(())
    }

    async fn finish_run(&self, report: &RunReport) -> Result<()> {
        let mut record = self.read_record(&report.run_id)?;
        if record.status != LedgerStatus::Running {
            return Err(MlciError::Ledger(format!(
                "run {} is already finished",
                report.run_id
            )));
        }
        record.status = LedgerStatus::Finished;
        record.finished_at = Some(Utc::now());
        record.report = Some(report.clone());
        self.write_record(&record)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        self.read_record(run_id)
    }

    async fn get_events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        // Existence check first so an unknown run is an error, not an empty list.
        self.read_record(run_id)?;
        let path = self.run_dir(run_id)?.join(EVENTS_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(MlciError::from))
            .collect()
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let run_id = entry.file_name().to_string_lossy().into_owned();
            match self.read_record(&run_id) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "Skipping unreadable run record"),
            }
        }
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::{RunStatus, RunVerdict, Trigger};
    use crate::ledger::RunEventKind;

    fn make_ledger() -> (tempfile::TempDir, FsRunLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FsRunLedger::new(dir.path()).unwrap();
        (dir, ledger)
    }

    fn event(seq: u64, kind: RunEventKind) -> RunEvent {
        RunEvent {
            seq,
            kind,
            payload: serde_json::json!({ "job": "test" }),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_events_persist_in_order() {
        let (_dir, ledger) = make_ledger();
        ledger
            .create_run(RunRecord::new("r1", "push", Trigger::Push))
            .await
            .unwrap();
        ledger
            .append_event("r1", event(1, RunEventKind::RunStarted))
            .await
            .unwrap();
        ledger
            .append_event("r1", event(2, RunEventKind::JobStarted))
            .await
            .unwrap();

        let events = ledger.get_events("r1").await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[1].kind, RunEventKind::JobStarted);
    }

    #[tokio::test]
    async fn test_finish_persists_report() {
        let (dir, ledger) = make_ledger();
        ledger
            .create_run(RunRecord::new("r1", "scheduled", Trigger::Schedule))
            .await
            .unwrap();
        let report = RunReport {
            run_id: "r1".to_string(),
            trigger: Trigger::Schedule,
            status: RunStatus::Completed,
            verdict: RunVerdict::Failed,
            jobs: Vec::new(),
            setup_problems: Vec::new(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };
        ledger.finish_run(&report).await.unwrap();

        // A fresh ledger over the same directory sees the finished run.
        let reopened = FsRunLedger::new(dir.path()).unwrap();
        let record = reopened.get_run("r1").await.unwrap();
        assert_eq!(record.status, LedgerStatus::Finished);
        assert_eq!(record.report.unwrap().verdict, RunVerdict::Failed);
        assert!(reopened
            .append_event("r1", event(3, RunEventKind::JobStarted))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let (_dir, ledger) = make_ledger();
        let mut older = RunRecord::new("a", "push", Trigger::Push);
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        ledger.create_run(older).await.unwrap();
        ledger
            .create_run(RunRecord::new("b", "push", Trigger::Manual))
            .await
            .unwrap();

        let runs = ledger.list_runs().await.unwrap();
        let ids: Vec<&str> = runs.iter().map(|r| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_run_ids() {
        let (_dir, ledger) = make_ledger();
        assert!(ledger.get_run("../etc").await.is_err());
        assert!(ledger.get_run("").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let (_dir, ledger) = make_ledger();
        let err = ledger.get_events("nope").await.unwrap_err();
        assert!(matches!(err, MlciError::RunNotFound { .. }));
    }
}
