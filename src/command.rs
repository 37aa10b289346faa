//! Subprocess execution with output streamed to tracing

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{Error, Result};

/// Run `cmd args` in `cwd` with extra environment variables.
///
/// stdout lines are logged as they arrive and returned joined; on a
/// non-zero exit the collected stderr becomes the error message.
pub async fn run_streaming(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> Result<String> {
    run(cmd, args, cwd, env, true).await
}

/// Like [`run_streaming`] but stdout is only returned, never logged.
///
/// For commands that print secrets: Terraform outputs, storage keys.
pub async fn run_captured(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &BTreeMap<String, String>,
) -> Result<String> {
    run(cmd, args, cwd, env, false).await
}

async fn run(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    env: &BTreeMap<String, String>,
    log_stdout: bool,
) -> Result<String> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .envs(env)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    let display = format!("{} {}", cmd, args.join(" "));
    let mut child = command
        .spawn()
        .map_err(|e| Error::command(&display, e.to_string()))?;

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut collected = Vec::new();
            while let Ok(Some(line)) = lines.next_line().await {
                collected.push(line);
            }
            collected.join("\n")
        })
    });

    let mut stdout_lines = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if log_stdout {
                info!(command = cmd, "{}", line);
            }
            stdout_lines.push(line);
        }
    }

    if !log_stdout {
        debug!(command = cmd, lines = stdout_lines.len(), "Captured output");
    }

    let status = child.wait().await?;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if !status.success() {
        let message = if stderr.is_empty() {
            format!("exited with {status}")
        } else {
            stderr
        };
        return Err(Error::command(display, message));
    }

    Ok(stdout_lines.join("\n"))
}
