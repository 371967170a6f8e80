//! Run notification: a log line, plus a webhook POST when configured.

use tracing::{info, warn};

use super::summary::PipelineSummary;
use super::{JobContext, StepOutcome};
use crate::config::PipelineConfig;
use crate::domain::run::RunVerdict;
use crate::error::Result;

pub async fn run(
    config: &PipelineConfig,
    http: &reqwest::Client,
    ctx: &JobContext<'_>,
) -> Result<StepOutcome> {
    let summary = PipelineSummary::from_context(ctx);
    let headline = summary.headline();
    match summary.verdict {
        RunVerdict::Passed => info!(run_id = %ctx.run_id, "{headline}"),
        RunVerdict::Failed => warn!(run_id = %ctx.run_id, "{headline}"),
    }
    let mut log = format!("{headline}\n");

    let Some(url) = config.notify.webhook_url.as_deref() else {
        log.push_str("no webhook configured; logged only\n");
        return Ok(StepOutcome::success(log));
    };

    match http.post(url).json(&summary).send().await {
        Ok(resp) if resp.status().is_success() => {
            log.push_str(&format!("webhook accepted ({})\n", resp.status()));
            Ok(StepOutcome::success(log))
        }
        Ok(resp) => {
            let detail = format!("webhook returned {}", resp.status());
            log.push_str(&detail);
            Ok(StepOutcome::failure(1, log, detail))
        }
        Err(e) => {
            let detail = format!("webhook delivery failed: {e}");
            log.push_str(&detail);
            Ok(StepOutcome::failure(1, log, detail))
        }
    }
}
