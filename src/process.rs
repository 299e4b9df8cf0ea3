//! Checked execution of external commands.

use anyhow::{Context, Result};
use std::process::{Command, Output};

use crate::error::RebuildError;

/// Render a command line for log and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|arg| arg.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command to completion and return its raw output, whatever the exit status.
pub fn output(cmd: &mut Command) -> Result<Output> {
    let desc = describe(cmd);
    tracing::debug!(command = %desc, "exec");
    cmd.output().with_context(|| format!("spawning '{desc}'"))
}

/// Run a command and return stdout, failing on a non-zero exit.
pub fn run_capture(cmd: &mut Command) -> Result<String> {
    let out = output(cmd)?;
    if !out.status.success() {
        return Err(failed(cmd, &out).into());
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

/// Run a command, discarding stdout, failing on a non-zero exit.
pub fn run_checked(cmd: &mut Command) -> Result<()> {
    run_capture(cmd).map(|_| ())
}

fn failed(cmd: &Command, out: &Output) -> RebuildError {
    let stderr = String::from_utf8_lossy(&out.stderr);
    RebuildError::CommandFailed {
        command: describe(cmd),
        status: out.status.to_string(),
        stderr: stderr.trim().to_string(),
    }
}
