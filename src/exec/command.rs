//! Local process execution
//!
//! Provides the `CommandOutput` struct and the `CommandRunner` seam that every
//! external action goes through. The production runner is backed by
//! `tokio::process`; tests substitute a scripted runner.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// Directories searched for daemons that are usually missing from a
/// non-root PATH
const SBIN_DIRS: &[&str] = &["/usr/sbin", "/sbin", "/usr/local/sbin"];

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (-1 when killed by a signal)
    pub exit_code: i32,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        }
    }
}

/// Abstracts process execution so the elevation logic can be tested
/// without spawning processes.
///
/// Implementations report spawn failures as `io::Error` and never interpret
/// exit codes; that is the caller's job.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program with captured stdout/stderr
    async fn output(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<CommandOutput>;

    /// Run a program with inherited stdio and return its exit code
    async fn status(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<i32>;

    /// Locate an executable, returning its full path
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

/// Production `CommandRunner` backed by `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

impl TokioCommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Children are killed when their future is dropped, so an interrupted
    /// run does not leave a package manager or sudo prompt behind
    fn command(program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn output(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<CommandOutput> {
        debug!("Running {} {:?}", program, args);

        let output = Self::command(program, args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let output = CommandOutput::from(output);
        debug!(
            "Command completed: exit_code={}, stdout_len={}, stderr_len={}",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );
        Ok(output)
    }

    async fn status(
        &self,
        program: &str,
        args: &[String],
    ) -> std::io::Result<i32> {
        debug!("Running {} {:?} with inherited stdio", program, args);

        let status = Self::command(program, args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await?;

        Ok(status.code().unwrap_or(-1))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok().or_else(|| {
            SBIN_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(program))
                .find(|candidate| candidate.is_file())
        })
    }
}
