//! Subprocess execution plumbing shared by every verifier kind.
//!
//! Grounded on the `verifier::pipeline` gate runner: timeout via
//! `tokio::time::timeout`, kill-on-timeout, and treating a missing tool as
//! a benign "nothing to check" result rather than a hard failure.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

pub struct CommandOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Run `program args...` in `cwd`, enforcing `timeout`. Never returns an
/// `Err` for ordinary process failure — callers decide pass/fail from the
/// exit code and output, matching the spec's "verifier failures are data,
/// not exceptions" contract.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> CommandOutcome {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to launch {program}: {e}"),
                timed_out: false,
            }
        }
    };

    let wait = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_string(&mut stdout).await;
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_string(&mut stderr).await;
        }
        let status = child.wait().await;
        (status, stdout, stderr)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok((status, stdout, stderr)) => CommandOutcome {
            exit_code: status.ok().and_then(|s| s.code()).unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
        },
        Err(_) => {
            let _ = child.start_kill();
            CommandOutcome {
                exit_code: -1,
                stdout: String::new(),
                stderr: "timed out".into(),
                timed_out: true,
            }
        }
    }
}

/// True if `program` is on PATH (used by verifiers' framework auto-detection).
pub fn binary_on_path(program: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(program).is_file())
        })
        .unwrap_or(false)
}
