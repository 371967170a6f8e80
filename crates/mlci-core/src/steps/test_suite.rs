//! pytest execution with coverage collection.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::runner::{CommandSpec, StepRunner};
use super::{JobContext, StepOutcome};
use crate::config::{PipelineConfig, TestConfig};
use crate::domain::job::JobSpec;
use crate::error::Result;

pub const COVERAGE_XML: &str = "coverage.xml";
pub const COVERAGE_HTML: &str = "htmlcov";
pub const JUNIT_XML: &str = "junit.xml";
pub const TEST_SUMMARY: &str = "test-summary.json";

/// Counts parsed from the pytest summary line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: u32,
    pub deselected: u32,
    pub xfailed: u32,
    pub xpassed: u32,
}

impl TestCounts {
    /// Tests that actually ran.
    pub fn executed(&self) -> u32 {
        self.passed + self.failed + self.errors + self.xfailed + self.xpassed
    }

    /// Parse the final `==== ... in 1.23s ====` line of pytest output.
    pub fn parse(output: &str) -> Option<Self> {
        static LINE: OnceLock<Option<Regex>> = OnceLock::new();
        static COUNT: OnceLock<Option<Regex>> = OnceLock::new();
        let line_re = LINE
            .get_or_init(|| Regex::new(r"^=+ (.+) in [0-9.]+s.*=+\s*$").ok())
            .as_ref()?;
        let count_re = COUNT
            .get_or_init(|| {
                Regex::new(r"(\d+) (passed|failed|skipped|errors?|deselected|xfailed|xpassed)").ok()
            })
            .as_ref()?;

        let summary = output
            .lines()
            .rev()
            .find_map(|line| line_re.captures(line.trim()))?;
        let mut counts = TestCounts::default();
        for cap in count_re.captures_iter(&summary[1]) {
            let n: u32 = cap[1].parse().unwrap_or(0);
            match &cap[2] {
                "passed" => counts.passed = n,
                "failed" => counts.failed = n,
                "skipped" => counts.skipped = n,
                "error" | "errors" => counts.errors = n,
                "deselected" => counts.deselected = n,
                "xfailed" => counts.xfailed = n,
                "xpassed" => counts.xpassed = n,
                _ => {}
            }
        }
        Some(counts)
    }
}

/// Statement coverage percentage from a Cobertura `coverage.xml`.
pub fn parse_coverage_percent(xml: &str) -> Option<f64> {
    static RATE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = RATE
        .get_or_init(|| Regex::new(r#"<coverage\b[^>]*\bline-rate="([0-9.]+)""#).ok())
        .as_ref()?;
    let rate: f64 = re.captures(xml)?[1].parse().ok()?;
    Some((rate * 100.0 * 100.0).round() / 100.0)
}

/// Contents of `test-summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub exit_code: i32,
    pub marker: Option<String>,
    pub counts: Option<TestCounts>,
    pub coverage_percent: Option<f64>,
    pub fail_under: Option<f64>,
    pub passed: bool,
}

/// Build the pytest argument list (after the interpreter).
pub fn pytest_args(tests: &TestConfig, coverage: bool, out_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        "pytest".to_string(),
        tests.tests_dir.clone(),
        "-v".to_string(),
    ];
    if let Some(marker) = &tests.marker {
        args.push("-m".to_string());
        args.push(marker.clone());
    }
    if coverage {
        for source in &tests.coverage_sources {
            args.push(format!("--cov={source}"));
        }
        args.push(format!(
            "--cov-report=xml:{}",
            out_dir.join(COVERAGE_XML).display()
        ));
        args.push(format!(
            "--cov-report=html:{}",
            out_dir.join(COVERAGE_HTML).display()
        ));
    }
    args.push(format!("--junitxml={}", out_dir.join(JUNIT_XML).display()));
    if tests.parallel {
        args.push("-n".to_string());
        args.push("auto".to_string());
    }
    args
}

pub async fn run(
    config: &PipelineConfig,
    job: &JobSpec,
    ctx: &JobContext<'_>,
    coverage: bool,
) -> Result<StepOutcome> {
    let dir = ctx.require_dir(job)?;
    let spec = CommandSpec::new(&config.python)
        .args(pytest_args(&config.tests, coverage, dir))
        .current_dir(ctx.workspace.root());
    let output = StepRunner::run(&job.id, &spec).await?;
    let log = output.combined();

    let counts = TestCounts::parse(&output.stdout);
    let coverage_percent = if coverage {
        std::fs::read_to_string(dir.join(COVERAGE_XML))
            .ok()
            .and_then(|xml| parse_coverage_percent(&xml))
    } else {
        None
    };
    let fail_under = if coverage {
        config.tests.fail_under
    } else {
        None
    };

    let mut detail = None;
    if !output.passed() {
        detail = Some(match &counts {
            Some(c) if c.failed + c.errors > 0 => {
                format!("{} failed, {} errors", c.failed, c.errors)
            }
            _ => format!("pytest exited with code {}", output.code()),
        });
    } else if let Some(min) = fail_under {
        match coverage_percent {
            Some(pct) if pct < min => {
                detail = Some(format!("coverage {pct:.2}% is below the required {min:.2}%"));
            }
            None => detail = Some("coverage report missing; cannot check fail_under".to_string()),
            _ => {}
        }
    }
    let passed = detail.is_none();

    let summary = TestSummary {
        exit_code: output.code(),
        marker: config.tests.marker.clone(),
        counts: counts.clone(),
        coverage_percent,
        fail_under,
        passed,
    };
    std::fs::write(dir.join(TEST_SUMMARY), serde_json::to_vec_pretty(&summary)?)?;

    match (&counts, coverage_percent) {
        (Some(c), Some(pct)) => {
            info!(passed = c.passed, failed = c.failed, coverage = pct, "Test suite finished")
        }
        (Some(c), None) => info!(passed = c.passed, failed = c.failed, "Test suite finished"),
        (None, _) => warn!(exit_code = output.code(), "No pytest summary line found"),
    }

    Ok(match detail {
        None => StepOutcome::success(log),
        Some(detail) => StepOutcome::failure(output.code().max(1), log, detail),
    })
}
