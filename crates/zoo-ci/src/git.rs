//! Change-set sources: git diff against a base ref, or a fixed list.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::candidate::ChangeRecord;
use crate::error::{Result, ZooCiError};

/// Supplies the ordered list of paths added or modified by a change set.
pub trait ChangeSource {
    fn changed_paths(&self) -> Result<Vec<ChangeRecord>>;
}

/// Fixed change set, e.g. from the command line.
#[derive(Debug, Clone, Default)]
pub struct StaticChangeSource {
    paths: Vec<ChangeRecord>,
}

impl StaticChangeSource {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(ChangeRecord::new).collect(),
        }
    }
}

impl ChangeSource for StaticChangeSource {
    fn changed_paths(&self) -> Result<Vec<ChangeRecord>> {
        Ok(self.paths.clone())
    }
}

/// Paths added or modified between `base_ref` and `HEAD`.
#[derive(Debug, Clone)]
pub struct GitDiffSource {
    repo_dir: PathBuf,
    base_ref: String,
    fetch_refspec: Option<String>,
}

impl GitDiffSource {
    pub fn new(repo_dir: impl Into<PathBuf>, base_ref: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            base_ref: base_ref.into(),
            fetch_refspec: None,
        }
    }

    /// Run `git fetch origin <refspec>` before diffing. Fetch failures are
    /// logged and ignored; the diff decides.
    pub fn with_fetch(mut self, refspec: impl Into<String>) -> Self {
        self.fetch_refspec = Some(refspec.into());
        self
    }

    fn fetch(&self, refspec: &str) {
        match run_git(&self.repo_dir, &["fetch", "origin", refspec]) {
            Ok(_) => info!(refspec, "Fetched base ref"),
            Err(e) => warn!(refspec, error = %e, "git fetch failed; diffing local refs"),
        }
    }
}

impl ChangeSource for GitDiffSource {
    fn changed_paths(&self) -> Result<Vec<ChangeRecord>> {
        if let Some(refspec) = &self.fetch_refspec {
            self.fetch(refspec);
        }

        let stdout = run_git(
            &self.repo_dir,
            &[
                "diff",
                "-z",
                "--name-only",
                "--diff-filter=AM",
                &self.base_ref,
                "HEAD",
            ],
        )?;

        // NUL-separated and unquoted: paths come back byte-for-byte.
        let paths: Vec<ChangeRecord> = stdout
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(ChangeRecord::from)
            .collect();
        info!(base = %self.base_ref, changed = paths.len(), "Computed change set");
        Ok(paths)
    }
}

fn run_git(repo_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(["-c", "core.quotePath=false"])
        .args(args)
        .current_dir(repo_dir)
        .output()
        .map_err(|e| ZooCiError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ZooCiError::Git(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
