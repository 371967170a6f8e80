//! Subprocess execution for steps.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{MlciError, Result};

/// A command to run for a step.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,

    /// Bytes written to the child's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Shell-like rendering for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code; `None` when killed by a signal or timed out.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the command exited 0.
    pub fn passed(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Exit code folded to an integer (-1 for signal or timeout).
    pub fn code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    /// stdout followed by stderr, verbatim.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// Runs step commands with captured output.
pub struct StepRunner;

impl StepRunner {
    /// Run `spec` to completion.
    ///
    /// A command that cannot be started is an error; a command that starts
    /// and fails is an `Ok` output with a non-zero code. The child is killed
    /// if this future is dropped.
    pub async fn run(step: &str, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        debug!(step = %step, command = %spec.display(), "Running step command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|e| MlciError::StepLaunch {
            step: step.to_string(),
            reason: format!("{}: {}", spec.program, e),
        })?;

        if let (Some(input), Some(mut pipe)) = (spec.stdin.as_ref(), child.stdin.take()) {
            // A child that exits without reading its input is not a launch failure.
            if let Err(e) = pipe.write_all(input).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(e.into());
                }
            }
            drop(pipe);
        }

        let waited = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .ok()
        } else {
            Some(child.wait_with_output().await)
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let Some(output) = waited else {
            return Ok(CommandOutput {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("timed out after {} seconds", spec.timeout_secs),
                duration_ms,
                timed_out: true,
            });
        };
        let output = output?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
            timed_out: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("hello");
        let out = StepRunner::run("echo", &spec).await.unwrap();
        assert!(out.passed());
        assert!(out.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_command_is_ok_with_code() {
        let spec = CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 3"]);
        let out = StepRunner::run("fail", &spec).await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert!(out.combined().contains("oops"));
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let spec = CommandSpec::new("/definitely/not/a/program");
        let err = StepRunner::run("missing", &spec).await.unwrap_err();
        assert!(matches!(err, MlciError::StepLaunch { .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let spec = CommandSpec::new("cat").stdin("{\"age\": 63}");
        let out = StepRunner::run("cat", &spec).await.unwrap();
        assert_eq!(out.stdout, "{\"age\": 63}");
    }

    #[tokio::test]
    async fn test_timeout_reports_timed_out() {
        let spec = CommandSpec::new("sleep").arg("5").timeout_secs(1);
        let out = StepRunner::run("sleep", &spec).await.unwrap();
        assert!(out.timed_out);
        assert!(!out.passed());
        assert_eq!(out.code(), -1);
    }
}
