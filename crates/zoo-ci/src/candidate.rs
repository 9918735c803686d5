//! Change records and model candidate selection.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::target::TargetMode;

/// Default extension of a model artifact.
pub const ARTIFACT_EXT: &str = ".onnx";

/// Default extension of a reference-data bundle.
pub const BUNDLE_EXT: &str = ".tar.gz";

/// A single path touched by the change set, relative to the repo root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeRecord(pub String);

impl ChangeRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChangeRecord {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A model artifact selected for validation in this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    /// Path of the artifact, verbatim from the change record.
    pub artifact_path: String,

    /// Basename of the artifact.
    pub display_name: String,

    /// Sibling reference-data bundle path. May not exist.
    pub bundle_path: String,
}

impl ModelCandidate {
    /// Build a candidate when `path` denotes an artifact with extension
    /// `artifact_ext`; `None` otherwise.
    pub fn from_path(path: &str, artifact_ext: &str, bundle_ext: &str) -> Option<Self> {
        let stem = path.strip_suffix(artifact_ext)?;
        let display_name = path.rsplit('/').next().unwrap_or(path);
        if stem.is_empty() || stem.ends_with('/') || display_name.is_empty() {
            return None;
        }

        Some(Self {
            artifact_path: path.to_string(),
            display_name: display_name.to_string(),
            bundle_path: format!("{stem}{bundle_ext}"),
        })
    }

    /// Basename of the bundle, used when reporting the runtime check.
    pub fn bundle_name(&self) -> &str {
        self.bundle_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.bundle_path)
    }
}

/// Filters change records down to model candidates.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    artifact_ext: String,
    bundle_ext: String,
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new(ARTIFACT_EXT, BUNDLE_EXT)
    }
}

impl CandidateSelector {
    pub fn new(artifact_ext: impl Into<String>, bundle_ext: impl Into<String>) -> Self {
        Self {
            artifact_ext: artifact_ext.into(),
            bundle_ext: bundle_ext.into(),
        }
    }

    /// Select model candidates in change-set order.
    ///
    /// `mode` is accepted for the record only: the candidate set is the
    /// same whichever checks will run. Repeated paths yield one candidate.
    pub fn select(&self, records: &[ChangeRecord], mode: TargetMode) -> Vec<ModelCandidate> {
        let mut seen = HashSet::new();
        let candidates: Vec<ModelCandidate> = records
            .iter()
            .map(|r| r.as_str())
            .filter(|path| !path.trim().is_empty())
            .filter_map(|path| ModelCandidate::from_path(path, &self.artifact_ext, &self.bundle_ext))
            .filter(|c| seen.insert(c.artifact_path.clone()))
            .collect();

        debug!(
            changed = records.len(),
            selected = candidates.len(),
            mode = %mode,
            "Selected model candidates"
        );
        candidates
    }
}

/// Deterministic digest of an ordered change set.
pub fn change_set_digest(records: &[ChangeRecord]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        hasher.update(record.as_str().as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
