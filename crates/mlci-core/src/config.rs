//! Pipeline configuration.
//!
//! Loaded from an optional `mlci.toml` at the workspace root, then
//! overridden by `MLCI_*` environment variables. Every field has a default
//! matching the reference pipeline, so an empty file (or none) is valid.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MlciError, Result};
use crate::schedule::CronSchedule;

/// Default config file name, looked up at the workspace root.
pub const CONFIG_FILE: &str = "mlci.toml";

/// Retention for lint/test/report artifacts.
pub const SHORT_RETENTION_DAYS: u32 = 30;

/// Retention for model artifacts (rollback and audit).
pub const LONG_RETENTION_DAYS: u32 = 90;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Python interpreter used for every tool invocation.
    pub python: String,

    /// Artifacts root, relative to the workspace root.
    pub artifacts_dir: PathBuf,

    /// Local state (run ledger), relative to the workspace root.
    pub state_dir: PathBuf,

    pub lint: LintConfig,
    pub tests: TestConfig,
    pub training: TrainingConfig,
    pub integration: IntegrationConfig,
    pub retention: RetentionConfig,
    pub schedule: ScheduleConfig,
    pub notify: NotifyConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            python: "python".to_string(),
            artifacts_dir: PathBuf::from("artifacts"),
            state_dir: PathBuf::from(".mlci"),
            lint: LintConfig::default(),
            tests: TestConfig::default(),
            training: TrainingConfig::default(),
            integration: IntegrationConfig::default(),
            retention: RetentionConfig::default(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

/// Static analysis settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// Source paths checked by every tool.
    pub paths: Vec<String>,
    pub max_line_length: u32,
    pub timeout_secs: u64,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            paths: vec![
                "src".to_string(),
                "tests".to_string(),
                "deployment".to_string(),
            ],
            max_line_length: 120,
            timeout_secs: 300,
        }
    }
}

/// Test execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    pub tests_dir: String,

    /// Roots measured for statement coverage.
    pub coverage_sources: Vec<String>,

    /// pytest `-m` marker expression; `None` runs everything.
    pub marker: Option<String>,

    /// Run test cases across worker processes (`-n auto`).
    pub parallel: bool,

    /// Minimum coverage percentage, if enforced.
    pub fail_under: Option<f64>,

    pub timeout_secs: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            tests_dir: "tests".to_string(),
            coverage_sources: vec!["src".to_string(), "deployment".to_string()],
            marker: Some("not slow".to_string()),
            parallel: false,
            fail_under: None,
            timeout_secs: 1200,
        }
    }
}

/// Training entry point settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub entry_point: PathBuf,

    /// Where the entry point writes the model, relative to the workspace root.
    pub model_path: PathBuf,

    /// Fail when the entry point exits 0 but leaves the model untouched.
    pub require_fresh_model: bool,

    pub timeout_secs: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            entry_point: PathBuf::from("src/train_pipeline.py"),
            model_path: PathBuf::from("models/heart_disease_pipeline_prod.joblib"),
            require_fresh_model: false,
            timeout_secs: 3600,
        }
    }
}

impl TrainingConfig {
    /// File name of the model inside `model-artifacts/`.
    pub fn model_file_name(&self) -> String {
        self.model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model.joblib".to_string())
    }
}

/// How the integration step reaches the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ProbeConfig {
    /// Load the model in-process with the interpreter and predict once.
    Command,
    /// Call a running prediction service.
    Http { base_url: String },
}

/// Integration validation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub probe: ProbeConfig,
    pub timeout_secs: u64,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::Command,
            timeout_secs: 300,
        }
    }
}

/// Artifact retention per job, in days.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub lint_days: u32,
    pub test_days: u32,
    pub model_days: u32,
    pub integration_days: u32,
    pub summary_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            lint_days: SHORT_RETENTION_DAYS,
            test_days: SHORT_RETENTION_DAYS,
            model_days: LONG_RETENTION_DAYS,
            integration_days: SHORT_RETENTION_DAYS,
            summary_days: SHORT_RETENTION_DAYS,
        }
    }
}

/// Calendar trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// `minute hour * * weekday`, evaluated in UTC.
    pub cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "0 2 * * 0".to_string(),
        }
    }
}

/// Notification target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving the summary JSON; `None` logs only.
    pub webhook_url: Option<String>,
}

impl PipelineConfig {
    /// Load configuration for `workspace_root`.
    ///
    /// An explicit `path` must exist; otherwise `mlci.toml` is used when
    /// present and defaults apply when it is not. Environment overrides are
    /// applied last.
    pub fn load(workspace_root: &Path, path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = workspace_root.join(CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            MlciError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `MLCI_*` overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(python) = lookup("MLCI_PYTHON") {
            self.python = python;
        }
        if let Some(dir) = lookup("MLCI_ARTIFACTS_DIR") {
            self.artifacts_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup("MLCI_NOTIFY_WEBHOOK") {
            self.notify.webhook_url = Some(url);
        }
        if let Some(cron) = lookup("MLCI_SCHEDULE") {
            self.schedule.cron = cron;
        }
        if let Some(base_url) = lookup("MLCI_PREDICT_URL") {
            self.integration.probe = ProbeConfig::Http { base_url };
        }
    }

    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.python.trim().is_empty() {
            return Err(MlciError::Config("python interpreter must not be empty".into()));
        }
        if let Some(min) = self.tests.fail_under {
            if !(0.0..=100.0).contains(&min) {
                return Err(MlciError::Config(format!(
                    "tests.fail_under must be within 0..=100, got {min}"
                )));
            }
        }
        if self.retention.model_days < self.retention.test_days {
            return Err(MlciError::Config(format!(
                "model retention ({} days) must not be shorter than test retention ({} days)",
                self.retention.model_days, self.retention.test_days
            )));
        }
        self.cron_schedule()?;
        Ok(())
    }

    /// Parsed calendar trigger.
    pub fn cron_schedule(&self) -> Result<CronSchedule> {
        self.schedule.cron.parse()
    }
}
