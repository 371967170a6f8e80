//! Workspace housekeeping for the `clean` and `clean-models` commands.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::workspace::Workspace;

/// Directory names removed wherever they appear.
const CACHE_DIRS: &[&str] = &["__pycache__", ".pytest_cache", ".mypy_cache", "htmlcov"];

/// File names removed wherever they appear.
const CACHE_FILES: &[&str] = &[".coverage", "coverage.xml"];

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &[".git", ".venv", "venv", "node_modules"];

fn skipped(entry: &DirEntry, artifacts_root: &Path) -> bool {
    entry.file_type().is_dir()
        && (entry.path() == artifacts_root
            || entry
                .file_name()
                .to_str()
                .is_some_and(|name| SKIP_DIRS.contains(&name)))
}

fn is_cache(entry: &DirEntry) -> bool {
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    if entry.file_type().is_dir() {
        CACHE_DIRS.contains(&name)
    } else {
        CACHE_FILES.contains(&name) || name.ends_with(".pyc")
    }
}

/// Remove Python caches and coverage output. Pipeline artifacts are kept.
pub fn clean_workspace(ws: &Workspace) -> Result<Vec<PathBuf>> {
    let root = ws.root();
    let artifacts_root = ws.artifacts_root();
    let mut targets = Vec::new();

    let mut walker = WalkDir::new(root).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if entry.path() != root && skipped(&entry, artifacts_root) {
            walker.skip_current_dir();
            continue;
        }
        if is_cache(&entry) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            targets.push(entry.into_path());
        }
    }

    for path in &targets {
        debug!(path = %path.display(), "Removing");
        if path.is_dir() {
            std::fs::remove_dir_all(path)?;
        } else {
            std::fs::remove_file(path)?;
        }
    }
    targets.sort();
    Ok(targets)
}

/// Remove trained models (`*.joblib`) from the model directory.
pub fn clean_models(ws: &Workspace, config: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let model_dir = match config.training.model_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ws.path(parent),
        _ => ws.root().to_path_buf(),
    };
    if !model_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for entry in std::fs::read_dir(&model_dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "joblib") {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
    }
    removed.sort();
    Ok(removed)
}
