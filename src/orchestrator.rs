//! Execution orchestrator
//!
//! Drives the provisioning stages for a [`Plan`] strictly in order:
//! install (only when the plan needs it), configure, authorize keys, start.
//! Each stage is recorded in the [`ExecutionResult`] only after it fully
//! completes. The first failing stage aborts the run. Completed stages are
//! not rolled back; install and configure are safe to re-run.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::{Config, Mode};
use crate::error::{ProvisionError, Result};
use crate::exec::elevation::ElevatedRunner;
use crate::plan::{Plan, Stage, TargetOs};
use crate::sshd::{setup_authorized_keys, LinuxSshd, SshdStages, WindowsSshd};

/// Outcome of a provisioning run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub installed: bool,
    pub configured: bool,
    pub keys_setup: bool,
    pub service_started: bool,

    /// Step names of fully completed stages, in completion order
    pub steps: Vec<String>,

    pub success: bool,
}

impl ExecutionResult {
    /// Mark `stage` as completed
    pub fn record(&mut self, stage: Stage) {
        match stage {
            Stage::Install => self.installed = true,
            Stage::Configure => self.configured = true,
            Stage::Keys => self.keys_setup = true,
            Stage::Start => self.service_started = true,
        }

        let name = stage.step_name();
        if !self.steps.iter().any(|s| s == name) {
            self.steps.push(name.to_string());
        }
    }
}

/// Everything the orchestrator needs from the host. `SystemBackend` is the
/// real implementation; tests plug in fakes.
#[async_trait]
pub trait ProvisionBackend: Send + Sync {
    /// Stage implementation for `os`
    fn stages(&self, os: TargetOs) -> &dyn SshdStages;

    /// Whether the process is already root/Administrator
    async fn is_privileged(&self) -> bool;

    /// Whether privileged commands can run without prompting
    async fn has_elevation_access(&self) -> bool;

    /// Write the configured public key into the target account's
    /// authorized keys
    async fn setup_keys(&self, config: &Config, os: TargetOs) -> Result<()>;
}

/// Backend that runs real commands on this host
pub struct SystemBackend {
    runner: ElevatedRunner,
    linux: LinuxSshd,
    windows: WindowsSshd,
}

impl SystemBackend {
    pub fn new(runner: ElevatedRunner) -> Self {
        Self {
            linux: LinuxSshd::new(runner.clone()),
            windows: WindowsSshd::new(runner.clone()),
            runner,
        }
    }

    pub fn runner(&self) -> &ElevatedRunner {
        &self.runner
    }
}

#[async_trait]
impl ProvisionBackend for SystemBackend {
    fn stages(&self, os: TargetOs) -> &dyn SshdStages {
        match os {
            TargetOs::Linux => &self.linux,
            TargetOs::Windows => &self.windows,
        }
    }

    async fn is_privileged(&self) -> bool {
        self.runner.is_privileged().await
    }

    async fn has_elevation_access(&self) -> bool {
        self.runner.has_elevation_access().await
    }

    async fn setup_keys(&self, config: &Config, os: TargetOs) -> Result<()> {
        setup_authorized_keys(&self.runner, config)
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Keys, os, e))
    }
}

/// Run every stage of `plan`.
///
/// # Returns
/// * `Ok(ExecutionResult)` - all stages completed, `success` is true
/// * `Err(ProvisionError::ElevationUnavailable)` - the privilege gate failed;
///   no stage ran
/// * `Err(ProvisionError::Execution)` - a stage failed; carries the stage, the
///   partial result and the cause
pub async fn execute(
    plan: &Plan,
    config: &Config,
    backend: &dyn ProvisionBackend,
) -> Result<ExecutionResult> {
    info!(
        "Provisioning sshd on {} (port {}, install needed: {})",
        plan.os, config.port, plan.needs_install
    );

    check_privileges(plan, config, backend).await?;

    let stages = backend.stages(plan.os);
    let mut result = ExecutionResult::default();

    for stage in plan.stages() {
        info!("Running {} stage", stage);
        let outcome = match stage {
            Stage::Install => stages.install_ssh(config).await,
            Stage::Configure => stages.configure_ssh(config).await,
            Stage::Keys => backend.setup_keys(config, plan.os).await,
            Stage::Start => stages.start_ssh(config).await,
        };

        if let Err(source) = outcome {
            error!("{} stage failed: {}", stage, source);
            return Err(ProvisionError::Execution {
                stage,
                result: Box::new(result),
                source: Box::new(source),
            });
        }

        result.record(stage);
    }

    result.success = true;
    info!("Provisioning complete: {}", result.steps.join(", "));
    Ok(result)
}

/// Fail before any side effect when the stages would certainly be denied
async fn check_privileges(
    plan: &Plan,
    config: &Config,
    backend: &dyn ProvisionBackend,
) -> Result<()> {
    let privileged = backend.is_privileged().await;
    let mode = config.mode.resolve(privileged);
    info!(
        "Privilege mode: {:?} (already privileged: {})",
        mode, privileged
    );

    match (mode, plan.os) {
        (Mode::Root, _) if !privileged => Err(ProvisionError::ElevationUnavailable {
            command: "ssh-provision --mode root".to_string(),
            detail: "the process is not running as root/Administrator".to_string(),
        }),
        (Mode::Root, _) => Ok(()),
        (_, TargetOs::Linux) if privileged => Ok(()),
        (_, TargetOs::Linux) => {
            if backend.has_elevation_access().await {
                Ok(())
            } else {
                Err(ProvisionError::ElevationUnavailable {
                    command: "ssh-provision".to_string(),
                    detail: "not root, and `sudo -n true` did not succeed".to_string(),
                })
            }
        }
        (_, TargetOs::Windows) => {
            if !privileged {
                warn!("Not running as Administrator; install and service steps will likely fail");
            }
            Ok(())
        }
    }
}
