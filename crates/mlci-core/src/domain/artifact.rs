//! Artifact declarations and the records collected after a job runs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A named output a job promises to leave in its artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDecl {
    /// Artifact name.
    pub name: String,

    /// Path relative to the owning job's artifact directory.
    pub path: PathBuf,

    /// Retention in days.
    pub retention_days: u32,

    /// Whether a missing artifact fails the job.
    pub required: bool,
}

impl ArtifactDecl {
    /// Declare an artifact whose absence fails the job.
    pub fn required(name: impl Into<String>, path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            retention_days,
            required: true,
        }
    }

    /// Declare an artifact that is collected when present.
    pub fn optional(name: impl Into<String>, path: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            required: false,
            ..Self::required(name, path, retention_days)
        }
    }
}

/// What was found on disk for a declared artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Producing job.
    pub job_id: String,

    /// Artifact name.
    pub name: String,

    /// Absolute location.
    pub path: PathBuf,

    /// Retention in days.
    pub retention_days: u32,

    /// Whether the artifact exists.
    pub produced: bool,

    /// Size of a file artifact in bytes.
    pub size_bytes: Option<u64>,

    /// SHA-256 hex digest of a file artifact.
    pub digest: Option<String>,
}

impl ArtifactRecord {
    /// Inspect `decl` inside `dir`.
    ///
    /// Directories are recorded as produced without a digest.
    pub fn inspect(job_id: &str, decl: &ArtifactDecl, dir: &Path) -> Self {
        let path = dir.join(&decl.path);
        let (produced, size_bytes, digest) = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => match std::fs::read(&path) {
                Ok(bytes) => (true, Some(meta.len()), Some(sha256_hex(&bytes))),
                Err(_) => (true, Some(meta.len()), None),
            },
            Ok(_) => (true, None, None),
            Err(_) => (false, None, None),
        };

        Self {
            job_id: job_id.to_string(),
            name: decl.name.clone(),
            path,
            retention_days: decl.retention_days,
            produced,
            size_bytes,
            digest,
        }
    }

    /// Record for an artifact whose job never ran.
    pub fn not_produced(job_id: &str, decl: &ArtifactDecl, dir: Option<&Path>) -> Self {
        Self {
            job_id: job_id.to_string(),
            name: decl.name.clone(),
            path: dir.map(|d| d.join(&decl.path)).unwrap_or_else(|| decl.path.clone()),
            retention_days: decl.retention_days,
            produced: false,
            size_bytes: None,
            digest: None,
        }
    }

    /// Short digest (first 12 hex chars).
    pub fn short_digest(&self) -> Option<&str> {
        self.digest.as_deref().map(|d| &d[..12.min(d.len())])
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
