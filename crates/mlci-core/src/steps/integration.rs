//! Integration validation: one inference call against the trained model.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::runner::{CommandSpec, StepRunner};
use super::training::MODEL_ARTIFACT;
use super::{JobContext, StepOutcome};
use crate::config::{PipelineConfig, ProbeConfig};
use crate::domain::job::{ids, JobSpec};
use crate::error::Result;
use crate::prediction::{HeartPatient, PredictionResponse};

pub const INTEGRATION_REPORT: &str = "integration-report.json";

/// Directory the training job owns in every built-in graph.
pub const MODEL_ARTIFACT_DIR: &str = "model-artifacts";

const PROBE_PROGRAM: &str = include_str!("../../assets/probe.py");

/// Contents of `integration-report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationReport {
    pub mode: String,
    pub model_path: Option<PathBuf>,
    pub request: HeartPatient,
    pub response: Option<PredictionResponse>,
    pub passed: bool,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Model produced upstream in this run, else the conventional location.
fn locate_model(config: &PipelineConfig, ctx: &JobContext<'_>) -> PathBuf {
    ctx.upstream_job(ids::TRAIN)
        .into_iter()
        .flat_map(|o| o.artifacts.iter())
        .find(|a| a.name == MODEL_ARTIFACT && a.produced)
        .map(|a| a.path.clone())
        .unwrap_or_else(|| {
            ctx.workspace
                .artifacts_root()
                .join(MODEL_ARTIFACT_DIR)
                .join(config.training.model_file_name())
        })
}

async fn probe_command(
    config: &PipelineConfig,
    job: &JobSpec,
    ctx: &JobContext<'_>,
    model: &Path,
    request: &HeartPatient,
    log: &mut String,
) -> Result<std::result::Result<PredictionResponse, String>> {
    if !model.is_file() {
        return Ok(Err(format!("model artifact not found at {}", model.display())));
    }
    let spec = CommandSpec::new(&config.python)
        .args(["-c", PROBE_PROGRAM])
        .arg(model.display().to_string())
        .stdin(serde_json::to_vec(request)?)
        .current_dir(ctx.workspace.root());
    let output = StepRunner::run(&job.id, &spec).await?;
    log.push_str(&output.combined());

    if !output.passed() {
        return Ok(Err(format!("probe exited with code {}", output.code())));
    }
    let Some(line) = output.stdout.lines().rev().find(|l| !l.trim().is_empty()) else {
        return Ok(Err("probe printed no prediction".to_string()));
    };
    Ok(serde_json::from_str(line.trim()).map_err(|e| format!("unparseable prediction: {e}")))
}

async fn probe_http(
    http: &reqwest::Client,
    base_url: &str,
    timeout: Duration,
    request: &HeartPatient,
    log: &mut String,
) -> std::result::Result<PredictionResponse, String> {
    let base = base_url.trim_end_matches('/');

    let live = http
        .get(format!("{base}/"))
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| format!("GET / failed: {e}"))?;
    log.push_str(&format!("GET {base}/ -> {}\n", live.status()));
    if !live.status().is_success() {
        return Err(format!("GET / returned {}", live.status()));
    }

    let resp = http
        .post(format!("{base}/predict"))
        .json(request)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| format!("POST /predict failed: {e}"))?;
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| format!("reading /predict body failed: {e}"))?;
    log.push_str(&format!("POST {base}/predict -> {status}\n{body}\n"));
    if !status.is_success() {
        return Err(format!("POST /predict returned {status}"));
    }
    serde_json::from_str(&body).map_err(|e| format!("unparseable prediction: {e}"))
}

pub async fn run(
    config: &PipelineConfig,
    http: &reqwest::Client,
    job: &JobSpec,
    ctx: &JobContext<'_>,
) -> Result<StepOutcome> {
    let dir = ctx.require_dir(job)?;
    let request = HeartPatient::reference();
    let mut log = String::new();

    let (mode, model_path, probed) = match &config.integration.probe {
        ProbeConfig::Command => {
            let model = locate_model(config, ctx);
            let probed = probe_command(config, job, ctx, &model, &request, &mut log).await?;
            ("command", Some(model), probed)
        }
        ProbeConfig::Http { base_url } => {
            let timeout = Duration::from_secs(config.integration.timeout_secs.max(1));
            let probed = probe_http(http, base_url, timeout, &request, &mut log).await;
            ("http", None, probed)
        }
    };

    let (response, error) = match probed {
        Ok(resp) => match resp.validate() {
            Ok(()) => (Some(resp), None),
            Err(e) => (Some(resp), Some(e.to_string())),
        },
        Err(e) => (None, Some(e)),
    };

    let report = IntegrationReport {
        mode: mode.to_string(),
        model_path,
        request,
        response,
        passed: error.is_none(),
        error,
        checked_at: Utc::now(),
    };
    std::fs::write(
        dir.join(INTEGRATION_REPORT),
        serde_json::to_vec_pretty(&report)?,
    )?;

    if let Some(err) = report.error {
        warn!(error = %err, "Integration validation failed");
        log.push_str(&err);
        log.push('\n');
        return Ok(StepOutcome::failure(1, log, err));
    }
    if let Some(resp) = &report.response {
        info!(
            prediction = resp.prediction,
            probability = resp.probability,
            risk = ?resp.risk_level(),
            "Integration validation passed"
        );
    }
    Ok(StepOutcome::success(log))
}
