//! Schema and runtime validators.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::bundle::ReferenceCase;
use crate::error::{CheckError, CheckResult};
use crate::process::{run_command, CommandSpec};
use crate::target::CheckKind;

/// Environment variable naming the runtime check's scratch directory.
pub const SCRATCH_ENV: &str = "ZOO_CI_SCRATCH";

const SCHEMA_SCRIPT: &str =
    "import sys, onnx; onnx.checker.check_model(sys.argv[1], full_check=True)";

// With no reference cases this only loads the model into a session.
const RUNTIME_SCRIPT: &str = r#"
import os, sys
import numpy as np
import onnx
from onnx import numpy_helper
import onnxruntime as ort

def load(case, prefix):
    tensors = []
    for name in sorted(f for f in os.listdir(case) if f.startswith(prefix) and f.endswith('.pb')):
        proto = onnx.TensorProto()
        with open(os.path.join(case, name), 'rb') as fh:
            proto.ParseFromString(fh.read())
        tensors.append(numpy_helper.to_array(proto))
    return tensors

model, cases = sys.argv[1], sys.argv[2:]
sess = ort.InferenceSession(model, providers=['CPUExecutionProvider'])
names = [i.name for i in sess.get_inputs()]
for case in cases:
    actual = sess.run(None, dict(zip(names, load(case, 'input_'))))
    for want, got in zip(load(case, 'output_'), actual):
        np.testing.assert_allclose(want, got, rtol=1e-3, atol=1e-5)
"#;

/// Structural validation of a model file.
#[async_trait]
pub trait SchemaValidator: Send + Sync {
    async fn check(&self, artifact: &Path) -> CheckResult<()>;
}

/// Execution of a model against reference cases.
///
/// `scratch` is a per-candidate directory the validator may write into; it
/// is removed by the pipeline afterwards.
#[async_trait]
pub trait RuntimeValidator: Send + Sync {
    async fn run(&self, artifact: &Path, cases: &[ReferenceCase], scratch: &Path)
        -> CheckResult<()>;
}

/// Command used to perform a check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckCommand {
    /// Human-readable check name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl CheckCommand {
    /// Default command for a check: the `onnx` checker or an `onnxruntime`
    /// session driven through `python3`.
    pub fn from_builtin(kind: CheckKind, timeout_secs: u64) -> Self {
        let script = match kind {
            CheckKind::Schema => SCHEMA_SCRIPT,
            CheckKind::Runtime => RUNTIME_SCRIPT,
        };
        Self {
            name: kind.name().to_string(),
            command: vec!["python3".to_string(), "-c".to_string(), script.to_string()],
            timeout_secs,
        }
    }

    /// Create a custom check command.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            command,
            timeout_secs,
        }
    }

    async fn execute(
        &self,
        extra_args: Vec<String>,
        spec: CommandSpec<'_>,
    ) -> std::result::Result<(), String> {
        let mut command = self.command.clone();
        command.extend(extra_args);
        let spec = CommandSpec {
            timeout_secs: self.timeout_secs,
            ..spec
        };

        let output = run_command(&command, &spec).await?;
        debug!(
            check = %self.name,
            exit_code = output.exit_code,
            duration_ms = output.duration_ms,
            "Check command finished"
        );
        if output.success() {
            Ok(())
        } else {
            Err(output.failure_detail())
        }
    }
}

/// Schema validator that shells out to a checker command.
#[derive(Debug, Clone)]
pub struct CommandSchemaValidator {
    command: CheckCommand,
}

impl CommandSchemaValidator {
    pub fn new(command: CheckCommand) -> Self {
        Self { command }
    }
}

impl Default for CommandSchemaValidator {
    fn default() -> Self {
        Self::new(CheckCommand::from_builtin(CheckKind::Schema, 600))
    }
}

#[async_trait]
impl SchemaValidator for CommandSchemaValidator {
    async fn check(&self, artifact: &Path) -> CheckResult<()> {
        self.command
            .execute(
                vec![artifact.display().to_string()],
                CommandSpec::default(),
            )
            .await
            .map_err(CheckError::Schema)
    }
}

/// Runtime validator that shells out to an inference command.
///
/// The command receives the model path followed by one directory per
/// reference case, runs inside `scratch`, and sees it as `ZOO_CI_SCRATCH`.
#[derive(Debug, Clone)]
pub struct CommandRuntimeValidator {
    command: CheckCommand,
}

impl CommandRuntimeValidator {
    pub fn new(command: CheckCommand) -> Self {
        Self { command }
    }
}

impl Default for CommandRuntimeValidator {
    fn default() -> Self {
        Self::new(CheckCommand::from_builtin(CheckKind::Runtime, 600))
    }
}

#[async_trait]
impl RuntimeValidator for CommandRuntimeValidator {
    async fn run(
        &self,
        artifact: &Path,
        cases: &[ReferenceCase],
        scratch: &Path,
    ) -> CheckResult<()> {
        let mut args = vec![artifact.display().to_string()];
        args.extend(cases.iter().map(|c| c.dir.display().to_string()));

        let spec = CommandSpec {
            cwd: Some(scratch),
            env: vec![(SCRATCH_ENV, scratch.display().to_string())],
            ..CommandSpec::default()
        };
        self.command
            .execute(args, spec)
            .await
            .map_err(CheckError::Runtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()]
    }

    #[test]
    fn test_builtin_commands() {
        let schema = CheckCommand::from_builtin(CheckKind::Schema, 60);
        assert_eq!(schema.name, "onnx");
        assert_eq!(schema.command[0], "python3");
        assert!(schema.command[2].contains("onnx.checker"));

        let runtime = CheckCommand::from_builtin(CheckKind::Runtime, 60);
        assert_eq!(runtime.name, "onnxruntime");
        assert!(runtime.command[2].contains("InferenceSession"));
        assert_eq!(runtime.timeout_secs, 60);
    }

    #[test]
    fn test_custom_command() {
        let cmd = CheckCommand::custom("lint", vec!["true".to_string()], 5);
        assert_eq!(cmd.name, "lint");
        assert_eq!(cmd.command, vec!["true"]);
    }

    #[tokio::test]
    async fn test_schema_validator_passes_artifact_path() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("m.onnx");
        std::fs::write(&model, b"m").unwrap();

        let validator =
            CommandSchemaValidator::new(CheckCommand::custom("exists", sh("test -f \"$1\""), 10));
        assert!(validator.check(&model).await.is_ok());

        let err = validator
            .check(&dir.path().join("missing.onnx"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "schema");
    }

    #[tokio::test]
    async fn test_schema_validator_reports_stderr() {
        let validator = CommandSchemaValidator::new(CheckCommand::custom(
            "fail",
            sh("echo 'invalid graph: node 3' >&2; exit 4"),
            10,
        ));
        let err = validator.check(Path::new("x.onnx")).await.unwrap_err();
        assert_eq!(
            err,
            CheckError::Schema("exited with code 4: invalid graph: node 3".to_string())
        );
    }

    #[tokio::test]
    async fn test_schema_validator_spawn_failure() {
        let validator = CommandSchemaValidator::new(CheckCommand::custom(
            "missing",
            vec!["/nonexistent-checker".to_string()],
            10,
        ));
        let err = validator.check(Path::new("x.onnx")).await.unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_runtime_validator_args_and_scratch() {
        let scratch = tempfile::tempdir().unwrap();
        let cases = vec![
            ReferenceCase {
                name: "test_data_set_0".to_string(),
                dir: PathBuf::from("/data/test_data_set_0"),
                inputs: vec![],
                outputs: vec![],
            },
            ReferenceCase {
                name: "test_data_set_1".to_string(),
                dir: PathBuf::from("/data/test_data_set_1"),
                inputs: vec![],
                outputs: vec![],
            },
        ];

        let validator = CommandRuntimeValidator::new(CheckCommand::custom(
            "record",
            sh("echo \"$@\" > \"$ZOO_CI_SCRATCH/args\"; test \"$(pwd -P)\" = \"$(cd \"$ZOO_CI_SCRATCH\" && pwd -P)\""),
            10,
        ));
        validator
            .run(Path::new("/models/a.onnx"), &cases, scratch.path())
            .await
            .unwrap();

        let recorded = std::fs::read_to_string(scratch.path().join("args")).unwrap();
        assert_eq!(
            recorded.trim(),
            "/models/a.onnx /data/test_data_set_0 /data/test_data_set_1"
        );
    }

    #[tokio::test]
    async fn test_runtime_validator_failure_and_timeout() {
        let scratch = tempfile::tempdir().unwrap();

        let failing = CommandRuntimeValidator::new(CheckCommand::custom(
            "mismatch",
            sh("echo 'output 0 mismatch' >&2; exit 1"),
            10,
        ));
        let err = failing
            .run(Path::new("a.onnx"), &[], scratch.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "runtime");
        assert!(err.to_string().contains("output 0 mismatch"));

        let slow = CommandRuntimeValidator::new(CheckCommand::custom("slow", sh("sleep 5"), 1));
        let err = slow
            .run(Path::new("a.onnx"), &[], scratch.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
