//! Reference-data bundle extraction.
//!
//! A bundle is a gzip-compressed tar archive holding a model file and zero or
//! more `test_data_set_*` directories of protobuf tensors:
//!
//! ```text
//! resnet50/
//!   model.onnx
//!   test_data_set_0/
//!     input_0.pb
//!     output_0.pb
//! ```

use async_compression::tokio::bufread::GzipDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::error::{CheckError, CheckResult};

const CASE_DIR_PREFIX: &str = "test_data_set_";
const TENSOR_EXT: &str = ".pb";

/// One labeled input/output reference case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCase {
    /// Directory name, e.g. `test_data_set_0`.
    pub name: String,

    /// Directory holding the tensors.
    pub dir: PathBuf,

    /// `input_*.pb` files, sorted.
    pub inputs: Vec<PathBuf>,

    /// `output_*.pb` files, sorted.
    pub outputs: Vec<PathBuf>,
}

/// What a bundle yields once extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleContents {
    /// Model file found inside the bundle.
    pub artifact_path: PathBuf,

    /// Reference cases, sorted by name. May be empty.
    pub cases: Vec<ReferenceCase>,
}

/// Unpack `archive` into `dest` and locate the model and reference cases.
///
/// The archive is streamed through the gzip decoder into the tar reader, so
/// memory use does not grow with bundle size. Any failure (missing or corrupt
/// archive, link entries, entries escaping `dest`, no model inside) is
/// reported as a retrieval error for the bundle.
pub async fn extract_bundle(
    archive: &Path,
    dest: &Path,
    artifact_ext: &str,
) -> CheckResult<BundleContents> {
    let label = archive.display().to_string();

    let file = tokio::fs::File::open(archive)
        .await
        .map_err(|e| CheckError::retrieval(&label, e))?;
    let reader = SyncIoBridge::new(GzipDecoder::new(BufReader::new(file)));

    let dest_owned = dest.to_path_buf();
    let unpacked = tokio::task::spawn_blocking(move || unpack_tar(reader, &dest_owned))
        .await
        .map_err(|e| CheckError::Internal(format!("extraction task failed: {e}")))?;
    let entries = unpacked.map_err(|reason| CheckError::retrieval(&label, reason))?;
    debug!(bundle = %label, entries, "Extracted bundle");

    discover(dest, artifact_ext).map_err(|reason| CheckError::retrieval(&label, reason))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path) -> std::result::Result<usize, String> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;
    let entries = archive
        .entries()
        .map_err(|e| format!("unreadable archive: {e}"))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| format!("unreadable archive entry: {e}"))?;
        let path = entry
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            return Err(format!("archive entry is a link: {path}"));
        }
        let inside = entry
            .unpack_in(dest)
            .map_err(|e| format!("failed to unpack {path}: {e}"))?;
        if !inside {
            return Err(format!("archive entry escapes extraction dir: {path}"));
        }
        count += 1;
    }
    Ok(count)
}

fn discover(root: &Path, artifact_ext: &str) -> std::result::Result<BundleContents, String> {
    let mut files = Vec::new();
    let mut case_dirs = Vec::new();
    walk(root, &mut files, &mut case_dirs).map_err(|e| format!("failed to scan bundle: {e}"))?;
    files.sort();
    case_dirs.sort();

    let artifact_path = files
        .iter()
        .find(|p| p.to_string_lossy().ends_with(artifact_ext))
        .cloned()
        .ok_or_else(|| format!("bundle contains no {artifact_ext} model"))?;

    let cases = case_dirs
        .into_iter()
        .map(|dir| reference_case(&dir, &files))
        .collect();

    Ok(BundleContents {
        artifact_path,
        cases,
    })
}

fn reference_case(dir: &Path, files: &[PathBuf]) -> ReferenceCase {
    let tensors = |prefix: &str| -> Vec<PathBuf> {
        files
            .iter()
            .filter(|p| p.parent() == Some(dir))
            .filter(|p| {
                let name = file_name(p);
                name.starts_with(prefix) && name.ends_with(TENSOR_EXT)
            })
            .cloned()
            .collect()
    };

    ReferenceCase {
        name: file_name(dir),
        dir: dir.to_path_buf(),
        inputs: tensors("input_"),
        outputs: tensors("output_"),
    }
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>, case_dirs: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        // Links are never followed; only real files and dirs under `dir` count.
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            if file_name(&path).starts_with(CASE_DIR_PREFIX) {
                case_dirs.push(path.clone());
            }
            walk(&path, files, case_dirs)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
