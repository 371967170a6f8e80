//! Static analysis: flake8, pylint and black against the configured sources.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::runner::{CommandOutput, CommandSpec, StepRunner};
use super::{JobContext, StepOutcome};
use crate::config::{LintConfig, PipelineConfig};
use crate::domain::job::JobSpec;
use crate::error::Result;
use crate::workspace::Workspace;

/// How a tool's failure counts toward the job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// A failure fails the (non-blocking) lint job.
    NonBlocking,
    /// Reported only, unless the gate runs strict.
    Informational,
}

/// Supported analysis tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LintTool {
    /// Style check.
    Flake8,
    /// Defect-pattern check.
    Pylint,
    /// Format check.
    Black,
}

impl LintTool {
    pub const ALL: [LintTool; 3] = [LintTool::Flake8, LintTool::Pylint, LintTool::Black];

    pub const fn policy(self) -> FailurePolicy {
        match self {
            LintTool::Flake8 | LintTool::Pylint => FailurePolicy::NonBlocking,
            LintTool::Black => FailurePolicy::Informational,
        }
    }

    /// Python module invoked with `-m`.
    pub const fn module(self) -> &'static str {
        match self {
            LintTool::Flake8 => "flake8",
            LintTool::Pylint => "pylint",
            LintTool::Black => "black",
        }
    }

    /// Report file written into the lint artifact directory.
    pub const fn report_file(self) -> &'static str {
        match self {
            LintTool::Flake8 => "flake8-report.txt",
            LintTool::Pylint => "pylint-report.txt",
            LintTool::Black => "black-report.txt",
        }
    }

    /// Check-mode arguments (after `-m <module>`). Never mutates sources.
    pub fn check_args(self, lint: &LintConfig, paths: &[String]) -> Vec<String> {
        let mut args = vec!["-m".to_string(), self.module().to_string()];
        match self {
            LintTool::Flake8 => {
                args.extend(paths.iter().cloned());
                args.push(format!("--max-line-length={}", lint.max_line_length));
                args.push("--statistics".to_string());
            }
            LintTool::Pylint => {
                args.extend(paths.iter().cloned());
                args.push(format!("--max-line-length={}", lint.max_line_length));
            }
            LintTool::Black => {
                args.push("--check".to_string());
                args.push("--diff".to_string());
                args.push(format!("--line-length={}", lint.max_line_length));
                args.extend(paths.iter().cloned());
            }
        }
        args
    }

    /// Whether a failure of this tool fails the gate.
    pub fn counts(self, strict: bool) -> bool {
        strict || self.policy() == FailurePolicy::NonBlocking
    }
}

impl fmt::Display for LintTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.module())
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool: LintTool,
    pub exit_code: i32,
    pub counted: bool,
}

impl ToolResult {
    pub fn failed(&self) -> bool {
        self.exit_code != 0
    }
}

/// Configured source paths that exist in the workspace.
fn existing_paths(ws: &Workspace, lint: &LintConfig) -> Vec<String> {
    lint.paths
        .iter()
        .filter(|p| ws.path(p.as_str()).exists())
        .cloned()
        .collect()
}

/// Run every tool, writing one verbatim report per tool.
pub async fn run(
    config: &PipelineConfig,
    job: &JobSpec,
    ctx: &JobContext<'_>,
    tools: &[LintTool],
    strict: bool,
) -> Result<StepOutcome> {
    let dir = ctx.require_dir(job)?;
    let paths = existing_paths(ctx.workspace, &config.lint);
    let mut log = String::new();

    if paths.is_empty() {
        warn!(job = %job.id, "No configured source paths exist, nothing to check");
        log.push_str("no configured source paths exist; nothing to check\n");
        for tool in tools {
            std::fs::write(dir.join(tool.report_file()), &log)?;
        }
        return Ok(StepOutcome::success(log));
    }

    let mut results = Vec::with_capacity(tools.len());
    for &tool in tools {
        let spec = CommandSpec::new(&config.python)
            .args(tool.check_args(&config.lint, &paths))
            .current_dir(ctx.workspace.root());
        let output = StepRunner::run(&job.id, &spec).await?;
        let report = output.combined();
        std::fs::write(dir.join(tool.report_file()), &report)?;

        let result = ToolResult {
            tool,
            exit_code: output.code(),
            counted: tool.counts(strict),
        };
        if result.failed() {
            warn!(tool = %tool, exit_code = result.exit_code, counted = result.counted, "Lint tool reported findings");
        } else {
            info!(tool = %tool, "Lint tool passed");
        }

        log.push_str(&format!("== {} (exit {}) ==\n", tool, result.exit_code));
        log.push_str(&report);
        if !report.ends_with('\n') {
            log.push('\n');
        }
        results.push(result);
    }

    let failing: Vec<String> = results
        .iter()
        .filter(|r| r.failed() && r.counted)
        .map(|r| r.tool.to_string())
        .collect();

    if failing.is_empty() {
        Ok(StepOutcome::success(log))
    } else {
        Ok(StepOutcome::failure(
            1,
            log,
            format!("{} reported findings", failing.join(", ")),
        ))
    }
}

/// Reformat sources in place with black. Runs outside any graph.
pub async fn format_sources(config: &PipelineConfig, ws: &Workspace) -> Result<CommandOutput> {
    let paths = existing_paths(ws, &config.lint);
    let spec = CommandSpec::new(&config.python)
        .args(["-m", LintTool::Black.module()])
        .arg(format!("--line-length={}", config.lint.max_line_length))
        .args(paths)
        .current_dir(ws.root())
        .timeout_secs(config.lint.timeout_secs);
    StepRunner::run("format", &spec).await
}
