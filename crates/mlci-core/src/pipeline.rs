//! Built-in pipeline graphs and the targets that select them.
//!
//! ```text
//! push / manual:  lint ─> test ─> train ─> integration-test
//!                   └──────┴───────┴──────────┴─> summary ─> notify
//! schedule:       train ─> integration-test
//! ```
//!
//! `lint` is non-blocking; `summary` and `notify` depend on everything
//! through ordering-only edges so they always run.

use std::fmt;
use std::str::FromStr;

use crate::config::PipelineConfig;
use crate::domain::artifact::ArtifactDecl;
use crate::domain::job::{ids, JobAction, JobSpec};
use crate::domain::run::Trigger;
use crate::error::{MlciError, Result};
use crate::graph::PipelineGraph;
use crate::steps::integration::{INTEGRATION_REPORT, MODEL_ARTIFACT_DIR};
use crate::steps::quality_gate::LintTool;
use crate::steps::summary::{SUMMARY_JSON, SUMMARY_MD};
use crate::steps::test_suite::{COVERAGE_HTML, COVERAGE_XML, JUNIT_XML, TEST_SUMMARY};
use crate::steps::training::{MODEL_ARTIFACT, TRAINING_LOG};

pub const LINT_DIR: &str = "lint-reports";
pub const TEST_DIR: &str = "test-results";
pub const INTEGRATION_DIR: &str = "integration-test";
pub const SUMMARY_DIR: &str = "pipeline-summary";

const SUMMARY_TIMEOUT_SECS: u64 = 60;
const NOTIFY_TIMEOUT_SECS: u64 = 60;

fn lint_job(config: &PipelineConfig, tools: &[LintTool]) -> JobSpec {
    let mut job = JobSpec::new(
        ids::LINT,
        "Code quality",
        JobAction::QualityGate {
            tools: tools.to_vec(),
            strict: false,
        },
    )
    .non_blocking()
    .in_dir(LINT_DIR)
    .timeout_secs(config.lint.timeout_secs);
    for tool in tools {
        job = job.artifact(ArtifactDecl::required(
            tool.module(),
            tool.report_file(),
            config.retention.lint_days,
        ));
    }
    job
}

fn test_job(config: &PipelineConfig, coverage: bool) -> JobSpec {
    let days = config.retention.test_days;
    let mut job = JobSpec::new(ids::TEST, "Unit tests", JobAction::TestSuite { coverage })
        .in_dir(TEST_DIR)
        .timeout_secs(config.tests.timeout_secs);
    if coverage {
        job = job
            .artifact(ArtifactDecl::required("coverage-xml", COVERAGE_XML, days))
            .artifact(ArtifactDecl::required("coverage-html", COVERAGE_HTML, days));
    }
    job.artifact(ArtifactDecl::required("junit", JUNIT_XML, days))
        .artifact(ArtifactDecl::required("test-summary", TEST_SUMMARY, days))
}

fn train_job(config: &PipelineConfig, verbose: bool) -> JobSpec {
    let days = config.retention.model_days;
    JobSpec::new(ids::TRAIN, "Train model", JobAction::Train { verbose })
        .in_dir(MODEL_ARTIFACT_DIR)
        .timeout_secs(config.training.timeout_secs)
        .artifact(ArtifactDecl::required(
            MODEL_ARTIFACT,
            config.training.model_file_name(),
            days,
        ))
        .artifact(ArtifactDecl::required("training-log", TRAINING_LOG, days))
}

fn integration_job(config: &PipelineConfig) -> JobSpec {
    JobSpec::new(
        ids::INTEGRATION,
        "Integration validation",
        JobAction::IntegrationValidation,
    )
    .in_dir(INTEGRATION_DIR)
    .timeout_secs(config.integration.timeout_secs)
    .artifact(ArtifactDecl::required(
        "integration-report",
        INTEGRATION_REPORT,
        config.retention.integration_days,
    ))
}

fn summary_job(config: &PipelineConfig, after: &[&str]) -> JobSpec {
    let days = config.retention.summary_days;
    let mut job = JobSpec::new(ids::SUMMARY, "Pipeline summary", JobAction::Summary)
        .non_blocking()
        .in_dir(SUMMARY_DIR)
        .timeout_secs(SUMMARY_TIMEOUT_SECS)
        .artifact(ArtifactDecl::required("summary-md", SUMMARY_MD, days))
        .artifact(ArtifactDecl::required("summary-json", SUMMARY_JSON, days));
    for dep in after {
        job = job.after(*dep);
    }
    job
}

fn notify_job() -> JobSpec {
    JobSpec::new(ids::NOTIFY, "Notify", JobAction::Notify)
        .non_blocking()
        .without_dir()
        .after(ids::SUMMARY)
        .timeout_secs(NOTIFY_TIMEOUT_SECS)
}

/// Full graph run on push and manual triggers.
pub fn push_graph(config: &PipelineConfig) -> Result<PipelineGraph> {
    PipelineGraph::from_jobs(
        "push",
        vec![
            lint_job(config, &LintTool::ALL),
            test_job(config, true).needs(ids::LINT),
            train_job(config, false).needs(ids::TEST),
            integration_job(config).needs(ids::TRAIN),
            summary_job(
                config,
                &[ids::LINT, ids::TEST, ids::TRAIN, ids::INTEGRATION],
            ),
            notify_job(),
        ],
    )
}

/// Reduced graph for the calendar trigger: retrain and validate only.
pub fn scheduled_graph(config: &PipelineConfig) -> Result<PipelineGraph> {
    PipelineGraph::from_jobs(
        "scheduled",
        vec![
            train_job(config, false),
            integration_job(config).needs(ids::TRAIN),
        ],
    )
}

pub fn graph_for_trigger(trigger: Trigger, config: &PipelineConfig) -> Result<PipelineGraph> {
    match trigger {
        Trigger::Push | Trigger::Manual => push_graph(config),
        Trigger::Schedule => scheduled_graph(config),
    }
}

/// Developer-facing targets that map to a graph.
///
/// `format`, `clean` and `clean-models` act on the workspace directly and
/// are not targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Test,
    TestCov,
    Lint,
    FormatCheck,
    Train { verbose: bool },
    All,
    Ci,
}

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Test => "test",
            Target::TestCov => "test-cov",
            Target::Lint => "lint",
            Target::FormatCheck => "format-check",
            Target::Train { .. } => "train",
            Target::All => "all",
            Target::Ci => "ci",
        }
    }

    pub fn graph(self, config: &PipelineConfig) -> Result<PipelineGraph> {
        match self {
            Target::Test => PipelineGraph::from_jobs(self.name(), vec![test_job(config, false)]),
            Target::TestCov => PipelineGraph::from_jobs(self.name(), vec![test_job(config, true)]),
            Target::Lint => PipelineGraph::from_jobs(
                self.name(),
                vec![lint_job(config, &[LintTool::Flake8, LintTool::Pylint])],
            ),
            Target::FormatCheck => {
                let tools = [LintTool::Black];
                let mut job = lint_job(config, &tools);
                // A format check on its own is a gate, not an advisory.
                job.id = "format-check".to_string();
                job.display_name = "Format check".to_string();
                job.blocking = true;
                job.action = JobAction::QualityGate {
                    tools: tools.to_vec(),
                    strict: true,
                };
                PipelineGraph::from_jobs(self.name(), vec![job])
            }
            Target::Train { verbose } => {
                PipelineGraph::from_jobs(self.name(), vec![train_job(config, verbose)])
            }
            Target::All => PipelineGraph::from_jobs(
                self.name(),
                vec![
                    lint_job(config, &[LintTool::Flake8, LintTool::Pylint]),
                    test_job(config, true).needs(ids::LINT),
                    train_job(config, false).needs(ids::TEST),
                ],
            ),
            Target::Ci => push_graph(config),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = MlciError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(Target::Test),
            "test-cov" => Ok(Target::TestCov),
            "lint" => Ok(Target::Lint),
            "format-check" => Ok(Target::FormatCheck),
            "train" => Ok(Target::Train { verbose: false }),
            "all" => Ok(Target::All),
            "ci" => Ok(Target::Ci),
            other => Err(MlciError::Config(format!("unknown target: {other}"))),
        }
    }
}

/// Print-friendly execution plan.
pub fn render_plan(graph: &PipelineGraph) -> Result<String> {
    let mut out = format!("Pipeline '{}':\n", graph.name());
    for (i, job) in graph.topological_order()?.into_iter().enumerate() {
        let deps: Vec<String> = job
            .depends_on
            .iter()
            .map(|d| {
                if d.blocking {
                    d.job.clone()
                } else {
                    format!("{} (order only)", d.job)
                }
            })
            .collect();
        out.push_str(&format!(
            "  {}. {} [{}{}]",
            i + 1,
            job.id,
            job.action.label(),
            if job.blocking { "" } else { ", non-blocking" }
        ));
        if !deps.is_empty() {
            out.push_str(&format!(" after {}", deps.join(", ")));
        }
        if let Some(dir) = &job.artifact_dir {
            out.push_str(&format!(" -> {dir}/ ({} days)", job.retention_days()));
        }
        out.push('\n');
    }
    Ok(out)
}
