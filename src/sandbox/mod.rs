//! Maps client supplied output labels onto directories under one
//! server-controlled root.
//!
//! A label is a single path component. Anything that could name another
//! place in the filesystem (separators, `..`, exotic characters) is rejected
//! before the filesystem is touched, and the canonical result is checked
//! again against the canonical root so symlinks cannot redirect a task out
//! of the sandbox.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, TaskError};

pub const DEFAULT_LABEL: &str = "default";
pub const MAX_LABEL_LEN: usize = 80;

#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Creates the root if needed and pins its canonical form.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        debug!(root = %root.display(), "Sandbox root ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a client label to `root/label`, creating the directory.
    pub fn resolve_base(&self, label: &str) -> Result<PathBuf> {
        let label = normalize_label(label)?;
        let base = self.contained_dir(&self.root, &label)?;
        debug!(label = %label, base = %base.display(), "Resolved base output dir");
        Ok(base)
    }

    /// Resolves `base/task_id`, repeating the containment check for the
    /// task level even though ids are server generated.
    pub fn task_dir(&self, base: &Path, task_id: &str) -> Result<PathBuf> {
        if !is_safe_label(task_id) {
            warn!(task_id = %task_id, "Rejected unsafe task id");
            return Err(TaskError::invalid("invalid task directory resolution"));
        }
        let base = fs::canonicalize(base)?;
        if !is_strict_descendant(&base, &self.root) {
            warn!(base = %base.display(), root = %self.root.display(), "Base dir outside sandbox root");
            return Err(TaskError::invalid("invalid task directory resolution"));
        }
        self.contained_dir(&base, task_id)
    }

    pub fn contains(&self, path: &Path) -> bool {
        match fs::canonicalize(path) {
            Ok(path) => is_strict_descendant(&path, &self.root),
            Err(_) => false,
        }
    }

    fn contained_dir(&self, parent: &Path, name: &str) -> Result<PathBuf> {
        let candidate = parent.join(name);

        // an existing entry may be a symlink; check where it really goes first
        if let Ok(existing) = fs::canonicalize(&candidate) {
            if !is_strict_descendant(&existing, parent) {
                warn!(candidate = %candidate.display(), resolved = %existing.display(), "Rejected path outside sandbox");
                return Err(TaskError::invalid("output_path resolves outside the server root"));
            }
            if !existing.is_dir() {
                return Err(TaskError::invalid("output_path is not a directory"));
            }
            return Ok(existing);
        }

        fs::create_dir_all(&candidate)?;
        let created = fs::canonicalize(&candidate)?;
        if !is_strict_descendant(&created, parent) {
            warn!(candidate = %candidate.display(), resolved = %created.display(), "Rejected path outside sandbox");
            return Err(TaskError::invalid("output_path resolves outside the server root"));
        }
        Ok(created)
    }
}

/// Trims and validates a label; empty and `.` become [`DEFAULT_LABEL`].
pub fn normalize_label(label: &str) -> Result<String> {
    let label = label.trim();
    let label = match label {
        "" | "." | "./" => DEFAULT_LABEL,
        other => other,
    };

    if !is_safe_label(label) {
        warn!(label = %label, "Rejected unsafe output_path label");
        return Err(TaskError::invalid(
            "invalid output_path: provide a simple folder name (no slashes or '..')",
        ));
    }
    Ok(label.to_string())
}

fn is_safe_label(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

fn is_strict_descendant(path: &Path, ancestor: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}
