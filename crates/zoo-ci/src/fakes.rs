//! In-memory fakes for the pipeline collaborators (testing only)
//!
//! Provides `FakeArtifactProvider`, `FakeSchemaValidator` and
//! `FakeRuntimeValidator` with scripted outcomes and a journal of calls, plus
//! `write_bundle` for building real `.tar.gz` fixtures.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_compression::tokio::write::GzipEncoder;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::bundle::{BundleContents, ReferenceCase};
use crate::error::{CheckError, CheckResult};
use crate::provider::{ArtifactProvider, FetchedArtifact};
use crate::validator::{RuntimeValidator, SchemaValidator};

/// Write a gzip-compressed tar archive holding `entries` (path, contents).
pub async fn write_bundle(path: &Path, entries: &[(&str, &[u8])]) -> std::io::Result<()> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data)?;
    }
    write_gzip(path, &builder.into_inner()?).await
}

/// Gzip `bytes` into `path`, e.g. a hand-built tar stream.
pub async fn write_gzip(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(bytes).await?;
    encoder.shutdown().await?;
    tokio::fs::write(path, encoder.into_inner()).await
}

// ---------------------------------------------------------------------------
// FakeArtifactProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum BundleScript {
    Cases(usize),
    Fail(CheckError),
}

/// Provider serving artifacts from memory.
///
/// Bundles are materialised for real inside `dest` (a model named after the
/// bundle plus empty `test_data_set_*` dirs) so working-area cleanup can be
/// observed.
#[derive(Debug, Default)]
pub struct FakeArtifactProvider {
    artifacts: HashMap<String, Vec<u8>>,
    bundles: HashMap<String, BundleScript>,
    calls: Mutex<Vec<String>>,
    bundle_dests: Mutex<Vec<PathBuf>>,
}

impl FakeArtifactProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_artifact(mut self, path: &str, bytes: &[u8]) -> Self {
        self.artifacts.insert(path.to_string(), bytes.to_vec());
        self
    }

    /// Bundle that extracts to `cases` reference cases.
    pub fn with_bundle(mut self, path: &str, cases: usize) -> Self {
        self.bundles
            .insert(path.to_string(), BundleScript::Cases(cases));
        self
    }

    /// Bundle that exists but fails to retrieve or extract.
    pub fn with_broken_bundle(mut self, path: &str, error: CheckError) -> Self {
        self.bundles
            .insert(path.to_string(), BundleScript::Fail(error));
        self
    }

    /// Calls in order, as `op:path`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Every `dest` handed to `fetch_bundle`.
    pub fn bundle_dests(&self) -> Vec<PathBuf> {
        self.bundle_dests.lock().unwrap().clone()
    }

    fn log(&self, op: &str, path: &str) {
        self.calls.lock().unwrap().push(format!("{op}:{path}"));
    }
}

#[async_trait]
impl ArtifactProvider for FakeArtifactProvider {
    async fn has_bundle(&self, bundle_path: &str) -> bool {
        self.bundles.contains_key(bundle_path)
    }

    async fn fetch(&self, path: &str) -> CheckResult<FetchedArtifact> {
        self.log("fetch", path);
        self.artifacts
            .get(path)
            .map(|bytes| FetchedArtifact {
                local_path: PathBuf::from(path),
                bytes: bytes.clone(),
            })
            .ok_or_else(|| CheckError::retrieval(path, "object not found"))
    }

    async fn fetch_bundle(&self, bundle_path: &str, dest: &Path) -> CheckResult<BundleContents> {
        self.log("fetch_bundle", bundle_path);
        self.bundle_dests.lock().unwrap().push(dest.to_path_buf());

        let cases = match self.bundles.get(bundle_path) {
            Some(BundleScript::Cases(n)) => *n,
            Some(BundleScript::Fail(e)) => {
                std::fs::write(dest.join("partial"), b"half-extracted")?;
                return Err(e.clone());
            }
            None => return Err(CheckError::retrieval(bundle_path, "object not found")),
        };

        let stem = bundle_path.rsplit('/').next().unwrap_or(bundle_path);
        let stem = stem.split('.').next().unwrap_or(stem);
        let artifact_path = dest.join(format!("{stem}.onnx"));
        std::fs::write(&artifact_path, b"bundled-model")?;

        let mut reference_cases = Vec::new();
        for i in 0..cases {
            let name = format!("test_data_set_{i}");
            let dir = dest.join(&name);
            std::fs::create_dir_all(&dir)?;
            reference_cases.push(ReferenceCase {
                name,
                dir,
                inputs: Vec::new(),
                outputs: Vec::new(),
            });
        }

        Ok(BundleContents {
            artifact_path,
            cases: reference_cases,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeSchemaValidator
// ---------------------------------------------------------------------------

/// Schema validator failing for scripted artifact paths.
#[derive(Debug, Default)]
pub struct FakeSchemaValidator {
    failures: HashMap<PathBuf, String>,
    checked: Mutex<Vec<PathBuf>>,
}

impl FakeSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, artifact: &str, detail: &str) -> Self {
        self.failures
            .insert(PathBuf::from(artifact), detail.to_string());
        self
    }

    pub fn checked(&self) -> Vec<PathBuf> {
        self.checked.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaValidator for FakeSchemaValidator {
    async fn check(&self, artifact: &Path) -> CheckResult<()> {
        self.checked.lock().unwrap().push(artifact.to_path_buf());
        match self.failures.get(artifact) {
            Some(detail) => Err(CheckError::Schema(detail.clone())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeRuntimeValidator
// ---------------------------------------------------------------------------

/// Runtime validator keyed by the model's file name.
#[derive(Debug, Default)]
pub struct FakeRuntimeValidator {
    failures: HashMap<String, String>,
    panics: HashSet<String>,
    runs: Mutex<Vec<(String, usize)>>,
    scratch_dirs: Mutex<Vec<PathBuf>>,
}

impl FakeRuntimeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, file_name: &str, detail: &str) -> Self {
        self.failures
            .insert(file_name.to_string(), detail.to_string());
        self
    }

    pub fn panicking_for(mut self, file_name: &str) -> Self {
        self.panics.insert(file_name.to_string());
        self
    }

    /// `(file name, case count)` per invocation.
    pub fn runs(&self) -> Vec<(String, usize)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        self.scratch_dirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeValidator for FakeRuntimeValidator {
    async fn run(
        &self,
        artifact: &Path,
        cases: &[ReferenceCase],
        scratch: &Path,
    ) -> CheckResult<()> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.runs.lock().unwrap().push((name.clone(), cases.len()));
        self.scratch_dirs.lock().unwrap().push(scratch.to_path_buf());
        std::fs::write(scratch.join("session.log"), b"ran")?;

        if self.panics.contains(&name) {
            panic!("backend crashed on {name}");
        }
        match self.failures.get(&name) {
            Some(detail) => Err(CheckError::Runtime(detail.clone())),
            None => Ok(()),
        }
    }
}
