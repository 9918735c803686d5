//! Check kinds and target mode selection.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ZooCiError;

/// The two independent checks run against a model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Execute the bundled model against its reference cases.
    Runtime,

    /// Structural validation of the model file.
    Schema,
}

impl CheckKind {
    /// Get the check name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Runtime => "onnxruntime",
            CheckKind::Schema => "onnx",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which checks are active for a run.
///
/// Selection of candidates never depends on this; only the pipeline's
/// branching does.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TargetMode {
    /// Schema check only (`--target onnx`).
    #[serde(rename = "onnx")]
    OnnxOnly,

    /// Runtime check only (`--target onnxruntime`).
    #[serde(rename = "onnxruntime")]
    RuntimeOnly,

    /// Both checks (`--target all`).
    #[default]
    All,
}

impl TargetMode {
    pub fn includes(&self, check: CheckKind) -> bool {
        match check {
            CheckKind::Runtime => self.includes_runtime(),
            CheckKind::Schema => self.includes_schema(),
        }
    }

    pub fn includes_runtime(&self) -> bool {
        matches!(self, TargetMode::RuntimeOnly | TargetMode::All)
    }

    pub fn includes_schema(&self) -> bool {
        matches!(self, TargetMode::OnnxOnly | TargetMode::All)
    }

    /// The flag value this mode is selected with.
    pub fn as_flag(&self) -> &'static str {
        match self {
            TargetMode::OnnxOnly => "onnx",
            TargetMode::RuntimeOnly => "onnxruntime",
            TargetMode::All => "all",
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for TargetMode {
    type Err = ZooCiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "onnx" => Ok(TargetMode::OnnxOnly),
            "onnxruntime" => Ok(TargetMode::RuntimeOnly),
            "all" => Ok(TargetMode::All),
            other => Err(ZooCiError::InvalidConfig(format!(
                "unknown target '{other}' (expected onnx, onnxruntime or all)"
            ))),
        }
    }
}
