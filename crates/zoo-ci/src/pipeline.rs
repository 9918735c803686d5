//! Per-candidate validation pipeline.
//!
//! Each candidate runs through `bundle probe -> runtime check -> primary
//! retrieval -> schema check` inside its own working area. Any error, panic
//! or timeout ends that candidate only; the next candidate always runs.

use futures::FutureExt;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::aggregator::{ResultAggregator, ValidationOutcome};
use crate::candidate::{CandidateSelector, ModelCandidate, ARTIFACT_EXT, BUNDLE_EXT};
use crate::error::{CheckError, CheckResult};
use crate::provider::ArtifactProvider;
use crate::target::{CheckKind, TargetMode};
use crate::validator::{RuntimeValidator, SchemaValidator};

/// Explicit run context; nothing is read from the process working directory.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Repository root the change-set paths are relative to.
    pub base_dir: PathBuf,

    /// Parent directory of per-candidate working areas.
    pub work_root: PathBuf,

    /// Active checks.
    pub target: TargetMode,

    pub artifact_ext: String,
    pub bundle_ext: String,

    /// Limit for a whole candidate run (`None` = unlimited).
    pub candidate_timeout: Option<Duration>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            work_root: std::env::temp_dir().join("zoo-ci"),
            target: TargetMode::All,
            artifact_ext: ARTIFACT_EXT.to_string(),
            bundle_ext: BUNDLE_EXT.to_string(),
            candidate_timeout: None,
        }
    }
}

impl RunContext {
    pub fn new(base_dir: impl Into<PathBuf>, target: TargetMode) -> Self {
        Self {
            base_dir: base_dir.into(),
            target,
            ..Self::default()
        }
    }

    pub fn with_work_root(mut self, work_root: impl Into<PathBuf>) -> Self {
        self.work_root = work_root.into();
        self
    }

    pub fn with_candidate_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.candidate_timeout = timeout;
        self
    }

    /// Selector using this context's extensions.
    pub fn selector(&self) -> CandidateSelector {
        CandidateSelector::new(&self.artifact_ext, &self.bundle_ext)
    }
}

/// Scratch space owned by one candidate; removed on drop.
struct WorkArea {
    root: TempDir,
    bundle: PathBuf,
    runtime: PathBuf,
}

impl WorkArea {
    fn create(work_root: &Path, candidate: &ModelCandidate) -> std::io::Result<Self> {
        std::fs::create_dir_all(work_root)?;
        let prefix = format!("{}-", sanitize(&candidate.display_name));
        let root = tempfile::Builder::new()
            .prefix(&prefix)
            .tempdir_in(work_root)?;
        let bundle = root.path().join("bundle");
        let runtime = root.path().join("runtime");
        std::fs::create_dir(&bundle)?;
        std::fs::create_dir(&runtime)?;
        Ok(Self {
            root,
            bundle,
            runtime,
        })
    }

    fn release(self, candidate: &ModelCandidate) {
        let path = self.root.path().to_path_buf();
        if let Err(e) = self.root.close() {
            warn!(
                candidate = %candidate.display_name,
                path = %path.display(),
                error = %e,
                "Failed to remove working area"
            );
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '-' })
        .collect()
}

/// What a candidate accomplished before it finished or failed.
#[derive(Debug, Default)]
struct CheckTrace {
    checks: Vec<CheckKind>,
    reference_cases: usize,
    artifact_digest: Option<String>,
}

/// Sequential, failure-isolating validation of model candidates.
pub struct ValidationPipeline {
    ctx: RunContext,
    provider: Arc<dyn ArtifactProvider>,
    schema: Arc<dyn SchemaValidator>,
    runtime: Arc<dyn RuntimeValidator>,
}

impl ValidationPipeline {
    pub fn new(
        ctx: RunContext,
        provider: Arc<dyn ArtifactProvider>,
        schema: Arc<dyn SchemaValidator>,
        runtime: Arc<dyn RuntimeValidator>,
    ) -> Self {
        Self {
            ctx,
            provider,
            schema,
            runtime,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Validate every candidate in order, one at a time.
    ///
    /// `on_outcome` sees each outcome as soon as its candidate finishes and
    /// before it is recorded.
    pub async fn run<F>(&self, candidates: &[ModelCandidate], mut on_outcome: F) -> ResultAggregator
    where
        F: FnMut(&ValidationOutcome),
    {
        let mut aggregator = ResultAggregator::new();
        if candidates.is_empty() {
            info!("No changed models to validate");
            return aggregator;
        }

        if let Err(e) = self.provider.prepare().await {
            warn!(error = %e, "Artifact provider setup failed; continuing");
        }

        info!(
            candidates = candidates.len(),
            mode = %self.ctx.target,
            "Running model checks"
        );
        for candidate in candidates {
            let outcome = self.validate(candidate).await;
            on_outcome(&outcome);
            aggregator.record(outcome);
        }

        aggregator
    }

    /// Run one candidate to a terminal outcome. Never fails.
    pub async fn validate(&self, candidate: &ModelCandidate) -> ValidationOutcome {
        info!(candidate = %candidate.display_name, "Testing model");

        let work = match WorkArea::create(&self.ctx.work_root, candidate) {
            Ok(work) => work,
            Err(e) => {
                let err = CheckError::Internal(format!("cannot create working area: {e}"));
                return self.finish(candidate, CheckTrace::default(), Err(err));
            }
        };

        let mut trace = CheckTrace::default();
        let guarded = AssertUnwindSafe(self.process(candidate, &work, &mut trace)).catch_unwind();
        let caught = match self.ctx.candidate_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(caught) => caught,
                Err(_) => Ok(Err(CheckError::Timeout { limit })),
            },
            None => guarded.await,
        };
        let result = caught.unwrap_or_else(|panic| Err(CheckError::Panicked(panic_message(&*panic))));

        work.release(candidate);
        self.finish(candidate, trace, result)
    }

    async fn process(
        &self,
        candidate: &ModelCandidate,
        work: &WorkArea,
        trace: &mut CheckTrace,
    ) -> CheckResult<()> {
        if self.ctx.target.includes_runtime()
            && self.provider.has_bundle(&candidate.bundle_path).await
        {
            let bundle = self
                .provider
                .fetch_bundle(&candidate.bundle_path, &work.bundle)
                .await?;
            trace.reference_cases = bundle.cases.len();
            self.runtime
                .run(&bundle.artifact_path, &bundle.cases, &work.runtime)
                .await?;
            trace.checks.push(CheckKind::Runtime);
            info!(
                candidate = %candidate.display_name,
                bundle = %candidate.bundle_name(),
                cases = bundle.cases.len(),
                "Checked by onnxruntime"
            );
        }

        let fetched = self.provider.fetch(&candidate.artifact_path).await?;
        trace.artifact_digest = Some(hex::encode(Sha256::digest(&fetched.bytes)));

        if self.ctx.target.includes_schema() {
            self.schema.check(&fetched.local_path).await?;
            trace.checks.push(CheckKind::Schema);
            info!(candidate = %candidate.display_name, "Checked by onnx");
        }

        Ok(())
    }

    fn finish(
        &self,
        candidate: &ModelCandidate,
        trace: CheckTrace,
        result: CheckResult<()>,
    ) -> ValidationOutcome {
        let outcome = match &result {
            Ok(()) => ValidationOutcome::passed(candidate.clone()),
            Err(e) => {
                warn!(
                    candidate = %candidate.display_name,
                    kind = e.kind(),
                    error = %e,
                    "Model check failed"
                );
                ValidationOutcome::failed(candidate.clone(), e)
            }
        };
        outcome
            .with_checks(trace.checks)
            .with_reference_cases(trace.reference_cases)
            .with_artifact_digest(trace.artifact_digest)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
