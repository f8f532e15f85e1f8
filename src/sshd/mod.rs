//! OpenSSH server provisioning stages
//!
//! Each OS variant implements [`SshdStages`]. The orchestrator picks the
//! variant for the plan's [`TargetOs`](crate::plan::TargetOs) and drives the
//! stages in order. Stages log what they skip and never retry a failed
//! command.

pub mod keys;
pub mod linux;
pub mod render;
pub mod windows;

use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::config::Config;
use crate::error::Result;

// Re-exports
pub use keys::{normalize_public_key, setup_authorized_keys};
pub use linux::LinuxSshd;
pub use render::render_sshd_config;
pub use windows::WindowsSshd;

/// Stage operations shared by every OS variant.
///
/// Failures come back as `ProvisionError::Configuration`, naming the stage
/// and OS and wrapping the command error that caused them.
#[async_trait]
pub trait SshdStages: Send + Sync {
    /// Whether the OpenSSH server is already present (never fails)
    async fn is_installed(&self) -> bool;

    /// Install the OpenSSH server unless it is already installed
    async fn install_ssh(&self, config: &Config) -> Result<()>;

    /// Render sshd_config and put it in place
    async fn configure_ssh(&self, config: &Config) -> Result<()>;

    /// Enable the service at boot, start it, and verify it runs
    async fn start_ssh(&self, config: &Config) -> Result<()>;
}

/// Write `contents` to a temporary file that lives until the handle drops
pub(crate) fn stage_document(contents: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("sshd_config.")
        .tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}
