//! Explicit handle on the shared filesystem workspace.
//!
//! Every job receives the same [`Workspace`]; each one writes only inside the
//! artifact directory it owns.

use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::domain::job::JobSpec;
use crate::error::{MlciError, Result};

/// Name of the verbatim log every attempted job leaves in its directory.
pub const JOB_LOG: &str = "job.log";

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    artifacts_root: PathBuf,
    state_dir: PathBuf,
}

impl Workspace {
    /// Open an existing project directory.
    pub fn open(root: impl AsRef<Path>, config: &PipelineConfig) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(MlciError::Config(format!(
                "workspace root {} is not a directory",
                root.display()
            )));
        }
        let root = root.canonicalize()?;
        Ok(Self::new(root, config))
    }

    /// Build a handle without touching the filesystem.
    pub fn new(root: PathBuf, config: &PipelineConfig) -> Self {
        Self {
            artifacts_root: root.join(&config.artifacts_dir),
            state_dir: root.join(&config.state_dir),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifacts_root(&self) -> &Path {
        &self.artifacts_root
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Resolve a project-relative path.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Directory owned by `job`, if it declares one.
    pub fn artifact_dir(&self, job: &JobSpec) -> Option<PathBuf> {
        job.artifact_dir
            .as_deref()
            .map(|dir| self.artifacts_root.join(dir))
    }

    /// Recreate `job`'s directory empty, so nothing from an earlier run
    /// is mistaken for this run's output.
    pub fn prepare_artifact_dir(&self, job: &JobSpec) -> Result<Option<PathBuf>> {
        let Some(dir) = self.artifact_dir(job) else {
            return Ok(None);
        };
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Some(dir))
    }

    /// Remove `job`'s directory so nothing on disk outlives a skipped job.
    pub fn clear_artifact_dir(&self, job: &JobSpec) -> Result<()> {
        match self.artifact_dir(job) {
            Some(dir) if dir.exists() => Ok(std::fs::remove_dir_all(&dir)?),
            _ => Ok(()),
        }
    }
}
