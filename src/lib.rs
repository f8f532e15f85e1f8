//! ssh-provision - Install, harden and start an OpenSSH server on the local host
//!
//! This crate turns a Linux or Windows machine into an SSH endpoint: it installs
//! the OpenSSH server when missing, writes a restricted `sshd_config`, authorizes
//! a public key and starts the service. Commands that need root fall back to
//! `sudo` on Linux, first non-interactively and then with a prompt when a
//! terminal is attached.
//!
//! # Stages
//!
//! - `install` - install the OpenSSH server package or Windows capability (skipped when present)
//! - `configure` - render and install `sshd_config`, open the firewall on Windows
//! - `authorize-keys` - append the public key to the key user's `authorized_keys`
//! - `start` - enable and restart the service, then verify it is running
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! sudo ssh-provision --port=2222 --allow-users=ci --default-cwd=/workspace \
//!   --public-key-file=~/.ssh/id_ed25519.pub
//! ```
//!
//! ```bash
//! ssh-provision --dry-run --json
//! ```

pub mod config;
pub mod error;
pub mod exec;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod sshd;

// Re-exports for convenience
pub use config::{Args, Config, Mode};
pub use error::{ProvisionError, Result};
pub use exec::{ElevatedRunner, PlatformContext, TokioCommandRunner};
pub use orchestrator::{execute, ExecutionResult, ProvisionBackend, SystemBackend};
pub use plan::{Plan, Stage, TargetOs};
pub use sshd::SshdStages;
