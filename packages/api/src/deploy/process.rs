//! Child processes whose output feeds a job log.

use std::process::{ExitStatus, Stdio};

use jobs::{JobContext, JobError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Program and arguments, space separated, for log lines.
pub fn describe(command: &Command) -> String {
    let std = command.as_std();
    std::iter::once(std.get_program())
        .chain(std.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote `arg` for a POSIX shell: single quotes, embedded quotes as `'\''`.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%=,".contains(c));
    if safe {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

pub fn program(command: &Command) -> String {
    command.as_std().get_program().to_string_lossy().into_owned()
}

/// Run `command`, appending each non-blank stdout and stderr line to the job log.
///
/// Returns the exit status; failing to start the program is an error.
pub async fn run_streaming(ctx: &JobContext, mut command: Command) -> Result<ExitStatus, JobError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| {
        JobError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to start {}: {}", program(&command), e),
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| JobError::msg("child stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| JobError::msg("child stderr not captured"))?;
    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();

    let (mut out_done, mut err_done) = (false, false);
    while !(out_done && err_done) {
        tokio::select! {
            line = stdout.next_line(), if !out_done => match line? {
                Some(line) => log_line(ctx, &line),
                None => out_done = true,
            },
            line = stderr.next_line(), if !err_done => match line? {
                Some(line) => log_line(ctx, &line),
                None => err_done = true,
            },
        }
    }

    Ok(child.wait().await?)
}

fn log_line(ctx: &JobContext, line: &str) {
    let line = line.trim_end();
    if !line.trim().is_empty() {
        ctx.log(line);
    }
}

/// Turn a non-zero exit status into a job error.
pub fn check_status(program: &str, status: ExitStatus) -> Result<(), JobError> {
    if status.success() {
        Ok(())
    } else {
        Err(JobError::ExitStatus {
            program: program.to_string(),
            code: status.code(),
        })
    }
}

/// Run `command` to completion and return whether it succeeded plus its
/// trimmed stdout and stderr.
pub async fn run_capture(mut command: Command) -> std::io::Result<(bool, String)> {
    command.stdin(Stdio::null()).kill_on_drop(true);
    let output = command.output().await?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status.success(), text.trim().to_string()))
}
