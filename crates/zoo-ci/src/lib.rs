//! Model Zoo CI - validation of changed model artifacts
//!
//! Provides a validation pipeline that:
//! - Selects model artifacts out of a change set
//! - Runs the runtime check (reference bundle) and schema check per model
//! - Isolates failures per model and reports pass/fail with an exit status

pub mod aggregator;
pub mod bundle;
pub mod candidate;
pub mod error;
pub mod fakes;
pub mod git;
pub mod pipeline;
pub mod process;
pub mod provider;
pub mod target;
pub mod telemetry;
pub mod validator;

// Re-export key types
pub use aggregator::{
    OutcomeStatus, ResultAggregator, RunMetadata, RunReport, RunSummary, ValidationOutcome,
};
pub use bundle::{extract_bundle, BundleContents, ReferenceCase};
pub use candidate::{change_set_digest, CandidateSelector, ChangeRecord, ModelCandidate};
pub use error::{CheckError, CheckResult, Result, ZooCiError};
pub use git::{ChangeSource, GitDiffSource, StaticChangeSource};
pub use pipeline::{RunContext, ValidationPipeline};
pub use provider::{ArtifactProvider, FetchedArtifact, LfsArtifactProvider};
pub use target::{CheckKind, TargetMode};
pub use telemetry::init_tracing;
pub use validator::{
    CheckCommand, CommandRuntimeValidator, CommandSchemaValidator, RuntimeValidator,
    SchemaValidator,
};
