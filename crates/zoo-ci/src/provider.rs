//! Artifact retrieval from the repository's large-file store.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::bundle::{extract_bundle, BundleContents};
use crate::candidate::ARTIFACT_EXT;
use crate::error::{CheckError, CheckResult};
use crate::pipeline::RunContext;
use crate::process::{run_command, CommandSpec};

/// First line of a Git LFS pointer file.
const LFS_POINTER_PREFIX: &[u8] = b"version https://git-lfs.github.com/spec/v1";

/// A primary artifact made available locally.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Where the artifact lives on disk.
    pub local_path: PathBuf,

    /// Artifact contents.
    pub bytes: Vec<u8>,
}

/// Retrieves artifacts and reference-data bundles by repo-relative path.
#[async_trait]
pub trait ArtifactProvider: Send + Sync {
    /// One-time setup before the first candidate.
    async fn prepare(&self) -> CheckResult<()> {
        Ok(())
    }

    /// Whether a bundle exists for this path. Absence is not an error.
    async fn has_bundle(&self, bundle_path: &str) -> bool;

    /// Retrieve the primary artifact.
    async fn fetch(&self, path: &str) -> CheckResult<FetchedArtifact>;

    /// Retrieve a bundle and extract it into `dest`.
    async fn fetch_bundle(&self, bundle_path: &str, dest: &Path) -> CheckResult<BundleContents>;
}

/// Provider backed by a git checkout with LFS-tracked artifacts.
#[derive(Debug, Clone)]
pub struct LfsArtifactProvider {
    base_dir: PathBuf,
    lfs: bool,
    artifact_ext: String,
    timeout_secs: u64,
}

impl LfsArtifactProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lfs: true,
            artifact_ext: ARTIFACT_EXT.to_string(),
            timeout_secs: 600,
        }
    }

    /// Provider rooted at the run's repository, using its artifact extension.
    pub fn for_context(ctx: &RunContext) -> Self {
        Self::new(&ctx.base_dir).with_artifact_ext(&ctx.artifact_ext)
    }

    /// Toggle `git lfs` pulls. When off, files are read as checked out.
    pub fn with_lfs(mut self, enabled: bool) -> Self {
        self.lfs = enabled;
        self
    }

    pub fn with_artifact_ext(mut self, ext: impl Into<String>) -> Self {
        self.artifact_ext = ext.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.base_dir.join(path)
    }

    async fn git(&self, args: &[&str]) -> std::result::Result<(), String> {
        let mut command = vec!["git".to_string()];
        command.extend(args.iter().map(|a| a.to_string()));
        let spec = CommandSpec {
            cwd: Some(&self.base_dir),
            timeout_secs: self.timeout_secs,
            ..CommandSpec::default()
        };
        let output = run_command(&command, &spec).await?;
        if output.success() {
            Ok(())
        } else {
            Err(output.failure_detail())
        }
    }

    async fn pull(&self, path: &str) -> CheckResult<()> {
        if !self.lfs {
            return Ok(());
        }
        debug!(path, "Pulling LFS object");
        let include = format!("--include={path}");
        self.git(&["lfs", "pull", &include, "--exclude="])
            .await
            .map_err(|reason| CheckError::retrieval(path, format!("git lfs pull: {reason}")))
    }
}

#[async_trait]
impl ArtifactProvider for LfsArtifactProvider {
    async fn prepare(&self) -> CheckResult<()> {
        if !self.lfs {
            return Ok(());
        }
        info!(repo = %self.base_dir.display(), "Installing git lfs hooks");
        self.git(&["lfs", "install"])
            .await
            .map_err(|reason| CheckError::Internal(format!("git lfs install: {reason}")))
    }

    async fn has_bundle(&self, bundle_path: &str) -> bool {
        tokio::fs::metadata(self.resolve(bundle_path))
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn fetch(&self, path: &str) -> CheckResult<FetchedArtifact> {
        self.pull(path).await?;

        let local_path = self.resolve(path);
        let bytes = tokio::fs::read(&local_path)
            .await
            .map_err(|e| CheckError::retrieval(path, e))?;
        if bytes.starts_with(LFS_POINTER_PREFIX) {
            warn!(path, "Artifact is still an LFS pointer");
            return Err(CheckError::retrieval(
                path,
                "object not downloaded (LFS pointer file)",
            ));
        }

        Ok(FetchedArtifact { local_path, bytes })
    }

    async fn fetch_bundle(&self, bundle_path: &str, dest: &Path) -> CheckResult<BundleContents> {
        self.pull(bundle_path).await?;
        extract_bundle(&self.resolve(bundle_path), dest, &self.artifact_ext).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::write_bundle;

    #[tokio::test]
    async fn test_fetch_reads_checked_out_file() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("models")).unwrap();
        std::fs::write(repo.path().join("models/a.onnx"), b"onnx-bytes").unwrap();

        let provider = LfsArtifactProvider::new(repo.path()).with_lfs(false);
        let fetched = provider.fetch("models/a.onnx").await.unwrap();
        assert_eq!(fetched.bytes, b"onnx-bytes");
        assert_eq!(fetched.local_path, repo.path().join("models/a.onnx"));
    }

    #[tokio::test]
    async fn test_for_context_uses_run_base_dir() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(repo.path().join("models")).unwrap();
        std::fs::write(repo.path().join("models/a.onnx"), b"ctx-bytes").unwrap();

        let ctx = RunContext::new(repo.path(), crate::target::TargetMode::All);
        let provider = LfsArtifactProvider::for_context(&ctx).with_lfs(false);
        let fetched = provider.fetch("models/a.onnx").await.unwrap();
        assert_eq!(fetched.local_path, ctx.base_dir.join("models/a.onnx"));
        assert_eq!(fetched.bytes, b"ctx-bytes");
    }

    #[tokio::test]
    async fn test_fetch_missing_file_is_retrieval_error() {
        let repo = tempfile::tempdir().unwrap();
        let provider = LfsArtifactProvider::new(repo.path()).with_lfs(false);
        let err = provider.fetch("models/missing.onnx").await.unwrap_err();
        assert_eq!(err.kind(), "retrieval");
        assert!(err.to_string().contains("models/missing.onnx"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_lfs_pointer() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(
            repo.path().join("p.onnx"),
            b"version https://git-lfs.github.com/spec/v1\noid sha256:abc\nsize 12\n",
        )
        .unwrap();

        let provider = LfsArtifactProvider::new(repo.path()).with_lfs(false);
        let err = provider.fetch("p.onnx").await.unwrap_err();
        assert!(err.to_string().contains("LFS pointer"));
    }

    #[tokio::test]
    async fn test_has_bundle() {
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("a.tar.gz"), b"x").unwrap();
        std::fs::create_dir(repo.path().join("dir.tar.gz")).unwrap();

        let provider = LfsArtifactProvider::new(repo.path()).with_lfs(false);
        assert!(provider.has_bundle("a.tar.gz").await);
        assert!(!provider.has_bundle("b.tar.gz").await);
        assert!(!provider.has_bundle("dir.tar.gz").await);
    }

    #[tokio::test]
    async fn test_fetch_bundle_extracts_into_dest() {
        let repo = tempfile::tempdir().unwrap();
        write_bundle(
            &repo.path().join("a.tar.gz"),
            &[
                ("a/a.onnx", b"m".as_slice()),
                ("a/test_data_set_0/input_0.pb", b"i".as_slice()),
                ("a/test_data_set_0/output_0.pb", b"o".as_slice()),
            ],
        )
        .await
        .unwrap();

        let dest = tempfile::tempdir().unwrap();
        let provider = LfsArtifactProvider::new(repo.path()).with_lfs(false);
        let contents = provider.fetch_bundle("a.tar.gz", dest.path()).await.unwrap();
        assert!(contents.artifact_path.starts_with(dest.path()));
        assert_eq!(contents.cases.len(), 1);
    }

    #[tokio::test]
    async fn test_lfs_pull_outside_repo_fails_as_retrieval() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.onnx"), b"m").unwrap();

        let provider = LfsArtifactProvider::new(dir.path()).with_timeout_secs(30);
        let err = provider.fetch("a.onnx").await.unwrap_err();
        assert_eq!(err.kind(), "retrieval");
    }

    #[tokio::test]
    async fn test_prepare_without_lfs_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LfsArtifactProvider::new(dir.path()).with_lfs(false);
        assert!(provider.prepare().await.is_ok());
    }
}
