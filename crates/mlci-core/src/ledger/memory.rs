//! In-memory run ledger (testing only).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::{LedgerStatus, RunEvent, RunLedger, RunRecord};
use crate::domain::run::RunReport;
use crate::error::{MlciError, Result};

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

/// Run ledger backed by a `HashMap<run_id, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, RunState>>> {
        self.runs
            .lock()
            .map_err(|_| MlciError::Ledger("memory ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(&self, record: RunRecord) -> Result<()> {
        let mut runs = self.lock()?;
        if runs.contains_key(&record.run_id) {
            return Err(MlciError::Ledger(format!(
                "run {} already exists",
                record.run_id
            )));
        }
        runs.insert(
            record.run_id.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(())
    }

    async fn append_event(&self, run_id: &str, event: RunEvent) -> Result<()> {
        let mut runs = self.lock()?;
        let state = runs.get_mut(run_id).ok_or_else(|| MlciError::RunNotFound {
            run_id: run_id.to_string(),
        })?;
        if state.record.status != LedgerStatus::Running {
            return Err(MlciError::Ledger(format!("run {run_id} is already finished")));
        }
        state.events.push(event);
        Ok(())
    }

    async fn finish_run(&self, report: &RunReport) -> Result<()> {
        let mut runs = self.lock()?;
        let state = runs
            .get_mut(&report.run_id)
            .ok_or_else(|| MlciError::RunNotFound {
                run_id: report.run_id.clone(),
            })?;
        if state.record.status != LedgerStatus::Running {
            return Err(MlciError::Ledger(format!(
                "run {} is already finished",
                report.run_id
            )));
        }
        state.record.status = LedgerStatus::Finished;
        state.record.finished_at = Some(Utc::now());
        state.record.report = Some(report.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<RunRecord> {
        let runs = self.lock()?;
        runs.get(run_id)
            .map(|s| s.record.clone())
            .ok_or_else(|| MlciError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn get_events(&self, run_id: &str) -> Result<Vec<RunEvent>> {
        let runs = self.lock()?;
        runs.get(run_id)
            .map(|s| s.events.clone())
            .ok_or_else(|| MlciError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    async fn list_runs(&self) -> Result<Vec<RunRecord>> {
        let runs = self.lock()?;
        let mut records: Vec<RunRecord> = runs.values().map(|s| s.record.clone()).collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.run_id.cmp(&a.run_id))
        });
        Ok(records)
    }
}
