//! Error types for ssh-provision

use thiserror::Error;

use crate::exec::elevation::is_permission_denied;
use crate::orchestrator::ExecutionResult;
use crate::plan::{Stage, TargetOs};

/// Main error type for ssh-provision
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A command could not be started at all
    #[error("Failed to start `{command}`: {source}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command ran and exited non-zero
    #[error("`{command}` exited with code {exit_code}: {}", stderr_summary(.stderr))]
    ProcessExit {
        command: String,
        args: Vec<String>,
        exit_code: i32,
        stderr: String,
    },

    /// Permission was denied and no elevation helper exists
    #[error("`{command}` requires elevated privileges, but none are available: {detail}")]
    ElevationUnavailable { command: String, detail: String },

    /// Elevation needs a password or tty and the session is not interactive
    #[error(
        "`{command}` requires elevated privileges, but non-interactive elevation is unavailable: {detail}"
    )]
    ElevationRequiresInteraction { command: String, detail: String },

    /// The service did not report a running state after being started
    #[error("Service `{service}` is not running after start: {detail}")]
    ServiceNotRunning { service: String, detail: String },

    /// The host lacks something provisioning depends on
    #[error("Unsupported host: {0}")]
    Unsupported(String),

    /// An OS executor stage failed
    #[error("{os} {stage} stage failed: {source}")]
    Configuration {
        stage: Stage,
        os: TargetOs,
        #[source]
        source: Box<ProvisionError>,
    },

    /// Top-level failure of a provisioning run
    #[error("Provisioning failed during the {stage} stage (completed: {}): {source}", completed_summary(.result))]
    Execution {
        stage: Stage,
        result: Box<ExecutionResult>,
        #[source]
        source: Box<ProvisionError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using ProvisionError
pub type Result<T> = std::result::Result<T, ProvisionError>;

impl ProvisionError {
    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ProvisionError::Config(msg.into())
    }

    /// Create an unsupported-host error from a string
    pub fn unsupported(msg: impl Into<String>) -> Self {
        ProvisionError::Unsupported(msg.into())
    }

    /// Create an SSH key error from a string
    pub fn ssh_key(msg: impl Into<String>) -> Self {
        ProvisionError::SshKey(msg.into())
    }

    /// Wrap a stage failure with the stage and OS it happened in
    pub fn configuration(stage: Stage, os: TargetOs, source: ProvisionError) -> Self {
        ProvisionError::Configuration {
            stage,
            os,
            source: Box::new(source),
        }
    }

    /// Build a process exit failure for `program args...`
    pub fn process_exit(program: &str, args: &[String], exit_code: i32, stderr: &str) -> Self {
        ProvisionError::ProcessExit {
            command: display_command(program, args),
            args: args.to_vec(),
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }

    /// Build a spawn failure for `program args...`
    pub fn process_spawn(program: &str, args: &[String], source: std::io::Error) -> Self {
        ProvisionError::ProcessSpawn {
            command: display_command(program, args),
            source,
        }
    }

    /// The innermost error, skipping stage/execution wrappers
    pub fn root_cause(&self) -> &ProvisionError {
        match self {
            ProvisionError::Configuration { source, .. }
            | ProvisionError::Execution { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// The stage this error was raised in, if known
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProvisionError::Execution { stage, .. } | ProvisionError::Configuration { stage, .. } => {
                Some(*stage)
            }
            _ => None,
        }
    }

    /// Whether the failure comes down to missing privileges
    pub fn is_privilege_related(&self) -> bool {
        match self.root_cause() {
            ProvisionError::ElevationUnavailable { .. }
            | ProvisionError::ElevationRequiresInteraction { .. } => true,
            ProvisionError::ProcessExit { stderr, .. } => is_permission_denied(stderr),
            ProvisionError::ProcessSpawn { source, .. } => {
                source.kind() == std::io::ErrorKind::PermissionDenied
            }
            _ => false,
        }
    }

    /// An actionable hint for privilege failures
    pub fn remediation(&self) -> Option<&'static str> {
        match self.root_cause() {
            ProvisionError::ElevationRequiresInteraction { .. } => Some(
                "run from an interactive terminal, or configure passwordless sudo (NOPASSWD) for this user",
            ),
            _ if self.is_privilege_related() => {
                Some("run as root/Administrator, or install and configure sudo for this user")
            }
            _ => None,
        }
    }
}

/// Render `program args...` for messages
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

fn stderr_summary(stderr: &str) -> &str {
    if stderr.is_empty() {
        "<no stderr captured>"
    } else {
        stderr
    }
}

fn completed_summary(result: &ExecutionResult) -> String {
    if result.steps.is_empty() {
        "none".to_string()
    } else {
        result.steps.join(", ")
    }
}
