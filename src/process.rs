//! External command runner.
//!
//! [`Cmd`] is a small builder over [`std::process::Command`] that every
//! tool invocation in this crate goes through (compiler, payload builder,
//! firmware tool, esptool). It adds three things on top of `Command`:
//!
//! - a failure message that is used when the command exits non-zero,
//! - an opt-out (`allow_fail`) for commands whose exit status is informative,
//! - cooperative cancellation through a [`CancelToken`].

use anyhow::{bail, Context, Result};
use std::ffi::{OsStr, OsString};
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::cancel::CancelToken;

/// How often a running child is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// The tool ran, showed its own output, and exited non-zero.
///
/// Callers use this to tell a tool that already explained its failure apart
/// from one that never started.
#[derive(Debug, Error)]
#[error("{message} ({status})")]
pub struct ToolFailed {
    pub message: String,
    pub status: String,
}

/// Whether `err` is, or wraps, a [`ToolFailed`].
pub fn tool_failed(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ToolFailed>().is_some()
}

/// Captured result of [`Cmd::run`].
#[derive(Debug)]
pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CmdResult {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Builder for an external command.
#[derive(Debug)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
    cancel: Option<CancelToken>,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
            cancel: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.as_os_str())
    }

    /// Message reported when the command exits non-zero.
    pub fn error_msg(mut self, msg: &str) -> Self {
        self.error_msg = Some(msg.to_string());
        self
    }

    /// Return the result even if the command exits non-zero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Kill the command when `token` is cancelled.
    pub fn cancel_on(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Rendered command line, for diagnostics.
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run with stdout/stderr captured.
    pub fn run(self) -> Result<CmdResult> {
        let mut command = self.command();
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program.to_string_lossy()))?;

        // Drain both pipes on their own threads so a chatty child can't block.
        let stdout = child.stdout.take().map(spawn_drain);
        let stderr = child.stderr.take().map(spawn_drain);

        let status = self.wait(&mut child)?;
        let result = CmdResult {
            status,
            stdout: join_drain(stdout),
            stderr: join_drain(stderr),
        };

        if !result.success() && !self.allow_fail {
            bail!(
                "{} ({})\n{}",
                self.failure_message(),
                result.status,
                result.stderr.trim()
            );
        }
        Ok(result)
    }

    /// Run with stdio inherited, so the user sees the tool's own output.
    pub fn run_interactive(self) -> Result<ExitStatus> {
        let mut command = self.command();
        command
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to run {}", self.program.to_string_lossy()))?;

        let status = self.wait(&mut child)?;
        if !status.success() && !self.allow_fail {
            return Err(ToolFailed {
                message: self.failure_message(),
                status: status.to_string(),
            }
            .into());
        }
        Ok(status)
    }

    fn command(&self) -> Command {
        tracing::debug!(command = %self.display(), "spawning");
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                // The child may exit between try_wait and kill; both are fine.
                let _ = child.kill();
                let _ = child.wait();
                bail!("{} was cancelled", self.program.to_string_lossy());
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn failure_message(&self) -> String {
        self.error_msg
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.program.to_string_lossy()))
    }
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Fail with a descriptive error if `path` does not exist.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at: {}", what, path.display());
    }
    Ok(())
}
