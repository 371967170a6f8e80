//! Artifact retention markers and pruning of expired artifact directories.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Marker file written into every artifact directory after its job runs.
pub const RETENTION_MARKER: &str = ".retention.json";

/// Retention metadata for one artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionMarker {
    pub job_id: String,
    pub run_id: String,
    pub retention_days: u32,
    pub produced_at: DateTime<Utc>,
}

impl RetentionMarker {
    pub fn new(job_id: &str, run_id: &str, retention_days: u32, produced_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.to_string(),
            run_id: run_id.to_string(),
            retention_days,
            produced_at,
        }
    }

    /// Instant after which the directory may be deleted.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.produced_at + Duration::days(i64::from(self.retention_days))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Write the marker into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(dir.join(RETENTION_MARKER), json)?;
        Ok(())
    }

    /// Read the marker from `dir`, if present.
    pub fn read(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(RETENTION_MARKER);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Result of a pruning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    /// Directories deleted.
    pub removed: Vec<PathBuf>,
    /// Directories still within retention.
    pub kept: Vec<PathBuf>,
}

impl PruneResult {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Delete every artifact directory under `artifacts_root` whose marker has
/// expired at `now`.
///
/// Directories without a marker, or with an unreadable one, are kept.
pub fn prune_expired(artifacts_root: &Path, now: DateTime<Utc>) -> Result<PruneResult> {
    let mut result = PruneResult::default();
    if !artifacts_root.is_dir() {
        debug!(root = %artifacts_root.display(), "No artifacts root, nothing to prune");
        return Ok(result);
    }

    let mut dirs: Vec<PathBuf> = std::fs::read_dir(artifacts_root)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let marker = match RetentionMarker::read(&dir) {
            Ok(Some(marker)) => marker,
            Ok(None) => {
                result.kept.push(dir);
                continue;
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Unreadable retention marker, keeping");
                result.kept.push(dir);
                continue;
            }
        };

        if marker.is_expired(now) {
            std::fs::remove_dir_all(&dir)?;
            info!(
                dir = %dir.display(),
                job = %marker.job_id,
                retention_days = marker.retention_days,
                "Pruned expired artifacts"
            );
            result.removed.push(dir);
        } else {
            result.kept.push(dir);
        }
    }

    Ok(result)
}
