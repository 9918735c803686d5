//! Model Zoo CI - validate the models changed by a pull request
//!
//! The `zoo-ci` command selects the `.onnx` files added or modified versus a
//! base ref, checks each one with `onnxruntime` (when a reference bundle
//! exists) and the `onnx` checker, prints a `[PASS]`/`[FAIL]` line per model
//! and exits non-zero if any model failed.

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use zoo_ci::process::split_command_line;
use zoo_ci::{
    change_set_digest, init_tracing, ChangeSource, CheckCommand, CheckKind,
    CommandRuntimeValidator, CommandSchemaValidator, GitDiffSource, LfsArtifactProvider,
    RunContext, RunMetadata, RunReport, StaticChangeSource, TargetMode, ValidationPipeline,
};

#[derive(Parser, Debug)]
#[command(name = "zoo-ci")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validate changed model zoo artifacts", long_about = None)]
struct Cli {
    /// Which checks to run
    #[arg(long, value_enum, default_value_t = TargetArg::All)]
    target: TargetArg,

    /// Repository root
    #[arg(long, env = "ZOO_CI_REPO", default_value = ".")]
    repo: PathBuf,

    /// Base ref to diff HEAD against
    #[arg(long, env = "ZOO_CI_BASE_REF", default_value = "origin/main")]
    base_ref: String,

    /// Refspec fetched from origin before diffing
    #[arg(long, default_value = "main:main")]
    fetch_ref: String,

    /// Skip the fetch before diffing
    #[arg(long)]
    no_fetch: bool,

    /// Explicit changed paths (skips git diff)
    #[arg(long, num_args = 1..)]
    changed: Vec<String>,

    /// Root for per-model working areas (default: system temp dir)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Schema check command; the model path is appended
    #[arg(long, env = "ZOO_CI_SCHEMA_CMD")]
    schema_cmd: Option<String>,

    /// Runtime check command; the model path and case dirs are appended
    #[arg(long, env = "ZOO_CI_RUNTIME_CMD")]
    runtime_cmd: Option<String>,

    /// Timeout per external check in seconds (0 = none)
    #[arg(long, default_value = "600")]
    check_timeout_secs: u64,

    /// Timeout per model in seconds (0 = none)
    #[arg(long, default_value = "0")]
    candidate_timeout_secs: u64,

    /// Read artifacts as checked out instead of pulling them with git lfs
    #[arg(long)]
    no_lfs: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TargetArg {
    /// Schema check only
    Onnx,
    /// Runtime check only
    Onnxruntime,
    /// Both checks
    All,
}

impl From<TargetArg> for TargetMode {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Onnx => TargetMode::OnnxOnly,
            TargetArg::Onnxruntime => TargetMode::RuntimeOnly,
            TargetArg::All => TargetMode::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let code = run(cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let target = TargetMode::from(cli.target);

    let records = change_source(&cli)
        .changed_paths()
        .context("Failed to obtain the change set")?;

    let mut ctx = RunContext::new(&cli.repo, target)
        .with_candidate_timeout(seconds(cli.candidate_timeout_secs));
    if let Some(work_dir) = &cli.work_dir {
        ctx = ctx.with_work_root(work_dir);
    }

    let candidates = ctx.selector().select(&records, target);
    let metadata = RunMetadata::start(target, change_set_digest(&records));
    info!(run_id = %metadata.run_id, changed = records.len(), "Starting model checks");

    let provider = LfsArtifactProvider::for_context(&ctx)
        .with_lfs(!cli.no_lfs)
        .with_timeout_secs(cli.check_timeout_secs);
    let schema = CommandSchemaValidator::new(check_command(
        CheckKind::Schema,
        cli.schema_cmd.as_deref(),
        cli.check_timeout_secs,
    )?);
    let runtime = CommandRuntimeValidator::new(check_command(
        CheckKind::Runtime,
        cli.runtime_cmd.as_deref(),
        cli.check_timeout_secs,
    )?);

    println!(
        "=== Checking {} changed model(s) (target: {}) ===",
        candidates.len(),
        target
    );
    let pipeline =
        ValidationPipeline::new(ctx, Arc::new(provider), Arc::new(schema), Arc::new(runtime));
    let aggregator = pipeline
        .run(&candidates, |outcome| println!("{}", outcome.status_line()))
        .await;

    let (summary, code) = aggregator.finalize();
    println!("{summary}");

    if let Some(path) = &cli.report {
        let report = RunReport::new(metadata, &aggregator);
        std::fs::write(path, report.to_json_pretty()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Wrote run report");
    }

    Ok(code)
}

fn change_source(cli: &Cli) -> Box<dyn ChangeSource> {
    if !cli.changed.is_empty() {
        return Box::new(StaticChangeSource::new(cli.changed.iter().cloned()));
    }
    let source = GitDiffSource::new(&cli.repo, &cli.base_ref);
    if cli.no_fetch {
        Box::new(source)
    } else {
        Box::new(source.with_fetch(&cli.fetch_ref))
    }
}

fn check_command(kind: CheckKind, line: Option<&str>, timeout_secs: u64) -> Result<CheckCommand> {
    match line {
        None => Ok(CheckCommand::from_builtin(kind, timeout_secs)),
        Some(line) => {
            let command = split_command_line(line);
            ensure!(!command.is_empty(), "{kind} check command is empty");
            Ok(CheckCommand::custom(kind.name(), command, timeout_secs))
        }
    }
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_target_defaults_to_all() {
        let cli = Cli::try_parse_from(["zoo-ci"]).unwrap();
        assert_eq!(cli.target, TargetArg::All);
        assert_eq!(cli.base_ref, "origin/main");
        assert!(cli.changed.is_empty());
    }

    #[test]
    fn test_target_values() {
        for (flag, mode) in [
            ("onnx", TargetMode::OnnxOnly),
            ("onnxruntime", TargetMode::RuntimeOnly),
            ("all", TargetMode::All),
        ] {
            let cli = Cli::try_parse_from(["zoo-ci", "--target", flag]).unwrap();
            assert_eq!(TargetMode::from(cli.target), mode);
        }
        assert!(Cli::try_parse_from(["zoo-ci", "--target", "tensorrt"]).is_err());
    }

    #[test]
    fn test_check_command_override() {
        let cmd = check_command(CheckKind::Schema, Some("my-checker --strict"), 30).unwrap();
        assert_eq!(cmd.name, "onnx");
        assert_eq!(cmd.command, vec!["my-checker", "--strict"]);
        assert_eq!(cmd.timeout_secs, 30);

        let builtin = check_command(CheckKind::Runtime, None, 30).unwrap();
        assert_eq!(builtin, CheckCommand::from_builtin(CheckKind::Runtime, 30));

        assert!(check_command(CheckKind::Schema, Some("   "), 30).is_err());
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(0), None);
        assert_eq!(seconds(5), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_run_with_explicit_change_set() {
        let repo = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let report = repo.path().join("report.json");
        std::fs::create_dir_all(repo.path().join("models")).unwrap();
        std::fs::write(repo.path().join("models/a.onnx"), b"model").unwrap();

        let cli = Cli::try_parse_from([
            "zoo-ci",
            "--target",
            "onnx",
            "--no-lfs",
            "--schema-cmd",
            "test -s",
            "--repo",
            repo.path().to_str().unwrap(),
            "--work-dir",
            work.path().to_str().unwrap(),
            "--report",
            report.to_str().unwrap(),
            "--changed",
            "models/a.onnx",
            "docs/readme.md",
            "models/missing.onnx",
        ])
        .unwrap();

        let code = run(cli).await.unwrap();
        assert_eq!(code, 1);

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["target"], "onnx");
        assert_eq!(json["summary"]["total"], 2);
        assert_eq!(json["summary"]["failed"][0], "models/missing.onnx");
        assert_eq!(json["outcomes"][0]["status"], "passed");
        assert_eq!(json["outcomes"][1]["error_kind"], "retrieval");
    }
}
