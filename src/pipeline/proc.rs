//! External tool invocation: spawn, bounded wait, captured output.
//!
//! marp-cli and ffmpeg are driven as child processes. Every invocation gets
//! an explicit timeout (exceeding it is a transient failure for the owning
//! stage) and captured stderr, because both tools write their diagnostics
//! there and exit non-zero without context otherwise.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Result of a completed (not timed-out) child process.
#[derive(Debug)]
pub struct ToolOutput {
    pub status_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    /// Trimmed stderr for error messages, capped so a chatty tool does not
    /// flood the report.
    pub fn stderr_excerpt(&self) -> String {
        let trimmed = self.stderr.trim();
        if trimmed.len() <= 2000 {
            trimmed.to_string()
        } else {
            trimmed.chars().take(2000).collect()
        }
    }
}

/// How a tool invocation can fail before producing an exit status.
#[derive(Debug)]
pub enum ToolError {
    /// The binary is not on PATH.
    NotFound,
    /// Spawn or wait failed for another reason.
    Spawn(String),
    /// The deadline elapsed; the child is killed.
    TimedOut { secs: u64 },
}

/// Run `program` with `args`, waiting at most `timeout_secs`.
///
/// The child is spawned with `kill_on_drop` so a timeout does not leave a
/// stray renderer or muxer running.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    timeout_secs: u64,
) -> Result<ToolOutput, ToolError> {
    debug!("exec: {program} {}", args.join(" "));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ToolError::NotFound
        } else {
            ToolError::Spawn(e.to_string())
        }
    })?;

    let waited = timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
        .await
        .map_err(|_| ToolError::TimedOut { secs: timeout_secs })?
        .map_err(|e| ToolError::Spawn(e.to_string()))?;

    Ok(ToolOutput {
        status_code: waited.status.code(),
        stdout: String::from_utf8_lossy(&waited.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&waited.stderr).into_owned(),
    })
}
