//! Training entry point invocation.
//!
//! The entry point is opaque: success is exit 0 plus a model file at the
//! configured path. With `require_fresh_model` the file must also be new or
//! rewritten by this invocation. The model and the captured output are
//! copied into the job's artifact directory.

use std::path::Path;
use std::time::SystemTime;

use tracing::{info, warn};

use super::runner::{CommandSpec, StepRunner};
use super::{JobContext, StepOutcome};
use crate::config::PipelineConfig;
use crate::domain::job::JobSpec;
use crate::error::Result;

pub const TRAINING_LOG: &str = "training.log";

/// Name of the model artifact declared by training jobs.
pub const MODEL_ARTIFACT: &str = "model";

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

pub async fn run(
    config: &PipelineConfig,
    job: &JobSpec,
    ctx: &JobContext<'_>,
    verbose: bool,
) -> Result<StepOutcome> {
    let dir = ctx.require_dir(job)?;
    let model_path = ctx.workspace.path(&config.training.model_path);
    let before = modified(&model_path);

    let mut spec = CommandSpec::new(&config.python)
        .arg(config.training.entry_point.display().to_string())
        .current_dir(ctx.workspace.root());
    if verbose {
        spec = spec.arg("--verbose");
    }
    let output = StepRunner::run(&job.id, &spec).await?;
    let log = output.combined();
    std::fs::write(dir.join(TRAINING_LOG), &log)?;

    if !output.passed() {
        return Ok(StepOutcome::failure(
            output.code(),
            log,
            format!("training entry point exited with code {}", output.code()),
        ));
    }

    let produced = match (before, modified(&model_path)) {
        (_, None) => false,
        (Some(before), Some(after)) if config.training.require_fresh_model => after != before,
        (_, Some(_)) => true,
    };
    if !produced {
        warn!(model = %model_path.display(), "Training exited 0 without writing a model");
        return Ok(StepOutcome::failure(
            1,
            log,
            format!("model file not produced at {}", config.training.model_path.display()),
        ));
    }
    if before == modified(&model_path) {
        info!(model = %model_path.display(), "Entry point kept the existing model");
    }

    let dest = dir.join(config.training.model_file_name());
    let bytes = std::fs::copy(&model_path, &dest)?;
    info!(model = %dest.display(), bytes, "Model artifact collected");
    Ok(StepOutcome::success(log))
}
