//! Environment check run before any job starts.
//!
//! A problem found here ends the run as `setup_failed` without entering the
//! job state machine.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{PipelineConfig, ProbeConfig};
use crate::domain::job::JobAction;
use crate::graph::PipelineGraph;
use crate::steps::runner::{CommandSpec, StepRunner};
use crate::workspace::Workspace;

const PREFLIGHT_TIMEOUT_SECS: u64 = 60;

/// Prints the names of modules that cannot be imported; exits 1 if any.
const FIND_MISSING_MODULES: &str = "import importlib.util, sys\n\
missing = [m for m in sys.argv[1:] if importlib.util.find_spec(m) is None]\n\
print(' '.join(missing))\n\
sys.exit(1 if missing else 0)\n";

#[async_trait]
pub trait Preflight: Send + Sync {
    /// Human-readable problems; empty means the environment is usable.
    async fn check(&self, graph: &PipelineGraph, ws: &Workspace) -> Vec<String>;
}

/// Accepts any environment.
pub struct NoopPreflight;

#[async_trait]
impl Preflight for NoopPreflight {
    async fn check(&self, _graph: &PipelineGraph, _ws: &Workspace) -> Vec<String> {
        Vec::new()
    }
}

/// Checks the interpreter, the Python modules the graph needs, and the
/// training entry point.
pub struct ToolchainPreflight {
    config: PipelineConfig,
}

impl ToolchainPreflight {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Python modules required by the jobs in `graph`, sorted.
    pub fn required_modules(&self, graph: &PipelineGraph) -> Vec<&'static str> {
        let mut modules = BTreeSet::new();
        for job in graph.jobs() {
            match &job.action {
                JobAction::QualityGate { tools, .. } => {
                    modules.extend(tools.iter().map(|t| t.module()));
                }
                JobAction::TestSuite { coverage } => {
                    modules.insert("pytest");
                    if *coverage {
                        modules.insert("pytest_cov");
                    }
                    if self.config.tests.parallel {
                        modules.insert("xdist");
                    }
                }
                JobAction::IntegrationValidation => {
                    if self.config.integration.probe == ProbeConfig::Command {
                        modules.insert("joblib");
                        modules.insert("pandas");
                    }
                }
                JobAction::Train { .. } | JobAction::Summary | JobAction::Notify => {}
            }
        }
        modules.into_iter().collect()
    }

    fn needs_training_entry(graph: &PipelineGraph) -> bool {
        graph
            .jobs()
            .iter()
            .any(|j| matches!(j.action, JobAction::Train { .. }))
    }

    fn needs_interpreter(graph: &PipelineGraph) -> bool {
        graph
            .jobs()
            .iter()
            .any(|j| !matches!(j.action, JobAction::Summary | JobAction::Notify))
    }
}

#[async_trait]
impl Preflight for ToolchainPreflight {
    async fn check(&self, graph: &PipelineGraph, ws: &Workspace) -> Vec<String> {
        let mut problems = Vec::new();

        if Self::needs_training_entry(graph) {
            let entry = ws.path(&self.config.training.entry_point);
            if !entry.is_file() {
                problems.push(format!(
                    "training entry point {} not found",
                    self.config.training.entry_point.display()
                ));
            }
        }

        if !Self::needs_interpreter(graph) {
            return problems;
        }

        let version = CommandSpec::new(&self.config.python)
            .arg("--version")
            .current_dir(ws.root())
            .timeout_secs(PREFLIGHT_TIMEOUT_SECS);
        match StepRunner::run("preflight", &version).await {
            Ok(out) if out.passed() => {
                debug!(python = %out.combined().trim(), "Interpreter available");
            }
            Ok(out) => {
                problems.push(format!(
                    "python interpreter '{}' failed to start (exit {})",
                    self.config.python,
                    out.code()
                ));
                return problems;
            }
            Err(e) => {
                problems.push(format!(
                    "python interpreter '{}' not available: {}",
                    self.config.python, e
                ));
                return problems;
            }
        }

        let modules = self.required_modules(graph);
        if modules.is_empty() {
            return problems;
        }
        let probe = CommandSpec::new(&self.config.python)
            .args(["-c", FIND_MISSING_MODULES])
            .args(modules.iter().copied())
            .current_dir(ws.root())
            .timeout_secs(PREFLIGHT_TIMEOUT_SECS);
        match StepRunner::run("preflight", &probe).await {
            Ok(out) if out.passed() => {}
            Ok(out) => {
                let missing = out.stdout.trim();
                if missing.is_empty() {
                    problems.push(format!(
                        "module check failed (exit {}): {}",
                        out.code(),
                        out.stderr.trim()
                    ));
                } else {
                    problems.push(format!("missing python modules: {missing}"));
                }
            }
            Err(e) => problems.push(format!("module check could not run: {e}")),
        }

        problems
    }
}
