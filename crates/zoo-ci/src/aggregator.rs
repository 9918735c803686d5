//! Per-model outcomes, run summary and exit status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::candidate::ModelCandidate;
use crate::error::CheckError;
use crate::target::{CheckKind, TargetMode};

/// Final status of one candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
}

/// Result of processing one model candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub candidate: ModelCandidate,

    pub status: OutcomeStatus,

    /// Present iff `status` is `Failed`.
    pub failure_reason: Option<String>,

    /// Error label (`retrieval`, `schema`, ...) iff `status` is `Failed`.
    pub error_kind: Option<String>,

    /// Checks that ran and passed, in execution order.
    pub checks: Vec<CheckKind>,

    /// Reference cases handed to the runtime check.
    pub reference_cases: usize,

    /// SHA-256 of the primary artifact, once retrieved.
    pub artifact_digest: Option<String>,
}

impl ValidationOutcome {
    pub fn passed(candidate: ModelCandidate) -> Self {
        Self {
            candidate,
            status: OutcomeStatus::Passed,
            failure_reason: None,
            error_kind: None,
            checks: Vec::new(),
            reference_cases: 0,
            artifact_digest: None,
        }
    }

    pub fn failed(candidate: ModelCandidate, error: &CheckError) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            failure_reason: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            ..Self::passed(candidate)
        }
    }

    pub fn with_checks(mut self, checks: Vec<CheckKind>) -> Self {
        self.checks = checks;
        self
    }

    pub fn with_reference_cases(mut self, count: usize) -> Self {
        self.reference_cases = count;
        self
    }

    pub fn with_artifact_digest(mut self, digest: Option<String>) -> Self {
        self.artifact_digest = digest;
        self
    }

    pub fn is_passed(&self) -> bool {
        self.status == OutcomeStatus::Passed
    }

    /// `[PASS] name` or `[FAIL] name: reason`.
    pub fn status_line(&self) -> String {
        match (&self.status, &self.failure_reason) {
            (OutcomeStatus::Failed, Some(reason)) => {
                format!("[FAIL] {}: {}", self.candidate.display_name, reason)
            }
            (OutcomeStatus::Failed, None) => format!("[FAIL] {}", self.candidate.display_name),
            (OutcomeStatus::Passed, _) => format!("[PASS] {}", self.candidate.display_name),
        }
    }
}

/// Aggregate counts over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub failed_count: usize,

    /// Artifact paths of failed candidates, in processing order.
    pub failed: Vec<String>,
}

impl RunSummary {
    /// 0 when nothing failed, 1 otherwise.
    pub fn exit_status(&self) -> i32 {
        if self.failed_count == 0 {
            0
        } else {
            1
        }
    }

    /// Human-readable one-line summary.
    pub fn message(&self) -> String {
        if self.failed_count == 0 {
            format!("{} models have been checked.", self.total)
        } else {
            format!(
                "In all {} models, {} models failed: {}",
                self.total,
                self.failed_count,
                self.failed.join(", ")
            )
        }
    }
}

/// Collects outcomes as candidates finish.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    summary: RunSummary,
    outcomes: Vec<ValidationOutcome>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: ValidationOutcome) {
        self.summary.total += 1;
        if !outcome.is_passed() {
            self.summary.failed_count += 1;
            self.summary
                .failed
                .push(outcome.candidate.artifact_path.clone());
        }
        self.outcomes.push(outcome);
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn outcomes(&self) -> &[ValidationOutcome] {
        &self.outcomes
    }

    /// Summary text and process exit status.
    pub fn finalize(&self) -> (String, i32) {
        (self.summary.message(), self.summary.exit_status())
    }
}

/// Identity of a run, captured before the first candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub target: TargetMode,
    pub change_set_digest: String,
}

impl RunMetadata {
    pub fn start(target: TargetMode, change_set_digest: String) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            target,
            change_set_digest,
        }
    }
}

/// Machine-readable run report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    #[serde(flatten)]
    pub metadata: RunMetadata,
    pub finished_at: DateTime<Utc>,
    pub summary: RunSummary,
    pub outcomes: Vec<ValidationOutcome>,
}

impl RunReport {
    pub fn new(metadata: RunMetadata, aggregator: &ResultAggregator) -> Self {
        Self {
            metadata,
            finished_at: Utc::now(),
            summary: aggregator.summary().clone(),
            outcomes: aggregator.outcomes().to_vec(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(path: &str) -> ModelCandidate {
        ModelCandidate::from_path(path, ".onnx", ".tar.gz").unwrap()
    }

    #[test]
    fn test_outcome_status_lines() {
        let pass = ValidationOutcome::passed(candidate("m/a.onnx"));
        assert_eq!(pass.status_line(), "[PASS] a.onnx");
        assert!(pass.failure_reason.is_none());

        let fail = ValidationOutcome::failed(
            candidate("m/b.onnx"),
            &CheckError::Schema("bad opset".to_string()),
        );
        assert_eq!(
            fail.status_line(),
            "[FAIL] b.onnx: schema check failed: bad opset"
        );
        assert_eq!(fail.error_kind.as_deref(), Some("schema"));
    }

    #[test]
    fn test_all_passed_summary() {
        let mut agg = ResultAggregator::new();
        agg.record(ValidationOutcome::passed(candidate("m/a.onnx")));
        agg.record(ValidationOutcome::passed(candidate("m/b.onnx")));

        let (report, code) = agg.finalize();
        assert_eq!(report, "2 models have been checked.");
        assert_eq!(code, 0);
        assert_eq!(agg.summary().total, 2);
        assert_eq!(agg.summary().failed_count, 0);
    }

    #[test]
    fn test_failed_summary_names_failures() {
        let mut agg = ResultAggregator::new();
        agg.record(ValidationOutcome::failed(
            candidate("m/a.onnx"),
            &CheckError::retrieval("m/a.tar.gz", "missing"),
        ));
        agg.record(ValidationOutcome::passed(candidate("m/b.onnx")));
        agg.record(ValidationOutcome::failed(
            candidate("m/c.onnx"),
            &CheckError::Runtime("mismatch".to_string()),
        ));

        let (report, code) = agg.finalize();
        assert_eq!(code, 1);
        assert_eq!(report, "In all 3 models, 2 models failed: m/a.onnx, m/c.onnx");
        assert_eq!(agg.summary().failed, vec!["m/a.onnx", "m/c.onnx"]);
        assert_eq!(agg.outcomes().len(), 3);
    }

    #[test]
    fn test_counts_match_outcomes() {
        let mut agg = ResultAggregator::new();
        for i in 0..10 {
            let c = candidate(&format!("m/{i}.onnx"));
            if i % 3 == 0 {
                agg.record(ValidationOutcome::failed(c, &CheckError::Internal("x".into())));
            } else {
                agg.record(ValidationOutcome::passed(c));
            }
        }
        let failed = agg.outcomes().iter().filter(|o| !o.is_passed()).count();
        assert_eq!(agg.summary().total, 10);
        assert_eq!(agg.summary().failed_count, failed);
        assert_eq!(agg.summary().failed.len(), failed);
    }

    #[test]
    fn test_empty_run_passes() {
        let agg = ResultAggregator::new();
        let (report, code) = agg.finalize();
        assert_eq!(report, "0 models have been checked.");
        assert_eq!(code, 0);
    }

    #[test]
    fn test_run_report_json() {
        let mut agg = ResultAggregator::new();
        agg.record(
            ValidationOutcome::passed(candidate("m/a.onnx"))
                .with_checks(vec![CheckKind::Runtime, CheckKind::Schema])
                .with_reference_cases(2)
                .with_artifact_digest(Some("ab".repeat(32))),
        );

        let meta = RunMetadata::start(TargetMode::All, "digest".to_string());
        let report = RunReport::new(meta.clone(), &agg);
        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();

        assert_eq!(json["run_id"], meta.run_id.to_string());
        assert_eq!(json["target"], "all");
        assert_eq!(json["change_set_digest"], "digest");
        assert_eq!(json["summary"]["total"], 1);
        assert_eq!(json["outcomes"][0]["status"], "passed");
        assert_eq!(json["outcomes"][0]["checks"][0], "runtime");
        assert_eq!(json["outcomes"][0]["reference_cases"], 2);
        assert!(report.finished_at >= report.metadata.started_at);
    }
}
