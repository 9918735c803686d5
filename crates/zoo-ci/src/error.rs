//! Error taxonomy for model validation.

use std::time::Duration;

/// Per-candidate failure. Every variant is contained at the candidate
/// boundary and turned into a `Failed` outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("retrieval of {path} failed: {reason}")]
    Retrieval { path: String, reason: String },

    #[error("schema check failed: {0}")]
    Schema(String),

    #[error("runtime check failed: {0}")]
    Runtime(String),

    #[error("candidate timed out after {limit:?}")]
    Timeout { limit: Duration },

    #[error("candidate panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Internal(String),
}

impl CheckError {
    pub fn retrieval(path: impl Into<String>, reason: impl ToString) -> Self {
        CheckError::Retrieval {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable label used in logs and the JSON report.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckError::Retrieval { .. } => "retrieval",
            CheckError::Schema(_) => "schema",
            CheckError::Runtime(_) => "runtime",
            CheckError::Timeout { .. } => "timeout",
            CheckError::Panicked(_) => "panic",
            CheckError::Internal(_) => "internal",
        }
    }
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        CheckError::Internal(format!("io error: {err}"))
    }
}

/// Result type for a single check or pipeline step.
pub type CheckResult<T> = std::result::Result<T, CheckError>;

/// Run-level errors. Only these may stop a run, and only before any
/// candidate has been processed.
#[derive(Debug, thiserror::Error)]
pub enum ZooCiError {
    #[error("git error: {0}")]
    Git(String),

    #[error("change set unavailable: {0}")]
    ChangeSet(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for run-level operations.
pub type Result<T> = std::result::Result<T, ZooCiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_error_display() {
        let err = CheckError::retrieval("models/a.onnx", "object missing");
        assert_eq!(
            err.to_string(),
            "retrieval of models/a.onnx failed: object missing"
        );

        let err = CheckError::Schema("bad opset".to_string());
        assert!(err.to_string().contains("schema check failed"));

        let err = CheckError::Timeout {
            limit: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "candidate timed out after 30s");

        let err = CheckError::Timeout {
            limit: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "candidate timed out after 250ms");
    }

    #[test]
    fn test_check_error_kinds() {
        assert_eq!(CheckError::retrieval("p", "r").kind(), "retrieval");
        assert_eq!(CheckError::Schema(String::new()).kind(), "schema");
        assert_eq!(CheckError::Runtime(String::new()).kind(), "runtime");
        assert_eq!(CheckError::Timeout {
                limit: Duration::from_secs(1)
            }
            .kind(), "timeout");
        assert_eq!(CheckError::Panicked(String::new()).kind(), "panic");
        assert_eq!(CheckError::Internal(String::new()).kind(), "internal");
    }

    #[test]
    fn test_io_error_maps_to_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: CheckError = io.into();
        assert_eq!(err.kind(), "internal");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_zoo_ci_error_display() {
        let err = ZooCiError::Git("not a repository".to_string());
        assert!(err.to_string().contains("git error"));
        assert!(err.to_string().contains("not a repository"));
    }
}
