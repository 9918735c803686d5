//! External command execution with output capture and timeout.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Result of running an external command to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Short diagnostic for a failed command: the last non-empty lines of
    /// stderr, or of stdout when stderr is empty.
    pub fn failure_detail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        let tail: Vec<&str> = source
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = tail.len().saturating_sub(DETAIL_LINES);
        let detail = tail[start..].join(" | ");
        if detail.is_empty() {
            format!("exited with code {}", self.exit_code)
        } else {
            format!("exited with code {}: {}", self.exit_code, detail)
        }
    }
}

const DETAIL_LINES: usize = 5;

/// Options for a single command invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec<'a> {
    /// Working directory.
    pub cwd: Option<&'a Path>,

    /// Extra environment variables.
    pub env: Vec<(&'a str, String)>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

/// Run `command` (first element is the executable) and capture its output.
///
/// Returns `Err` with a readable message when the command is empty, cannot be
/// spawned, or exceeds its timeout. A non-zero exit is reported through
/// [`CommandOutput::exit_code`], not as an error.
pub async fn run_command(
    command: &[String],
    spec: &CommandSpec<'_>,
) -> std::result::Result<CommandOutput, String> {
    let start = Instant::now();

    let (exe, args) = command
        .split_first()
        .ok_or_else(|| "empty command".to_string())?;

    let mut cmd = Command::new(exe);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = spec.cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    debug!(command = ?command, "Spawning command");
    let child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {exe}: {e}"))?;

    let waited = if spec.timeout_secs > 0 {
        tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| format!("{exe} timed out after {} seconds", spec.timeout_secs))?
    } else {
        child.wait_with_output().await
    };
    let output = waited.map_err(|e| format!("failed to wait for {exe}: {e}"))?;

    let duration_ms = start.elapsed().as_millis() as u64;
    let exit_code = output.status.code().unwrap_or(-1);

    Ok(CommandOutput {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms,
    })
}

/// Split a whitespace-separated command line into arguments.
pub fn split_command_line(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
