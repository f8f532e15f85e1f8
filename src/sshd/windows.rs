//! Windows OS executor
//!
//! Everything goes through `powershell.exe`. Windows has no elevation
//! helper, so these commands only succeed from an Administrator session.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use super::render::{render_sshd_config, WINDOWS_CONFIG_PATH};
use super::{stage_document, SshdStages};
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::exec::elevation::{ElevatedRunner, RunOptions};
use crate::exec::sanitize::powershell_quote;
use crate::exec::CommandOutput;
use crate::plan::{Stage, TargetOs};

pub const POWERSHELL: &str = "powershell.exe";

/// Windows capability providing sshd
pub const OPENSSH_CAPABILITY: &str = "OpenSSH.Server~~~~0.0.1.0";

/// Windows service name of the OpenSSH server
pub const SERVICE_NAME: &str = "sshd";

/// Arguments running `script` in a non-interactive PowerShell
pub fn powershell_args(script: &str) -> Vec<String> {
    ["-NoProfile", "-NonInteractive", "-ExecutionPolicy", "Bypass", "-Command", script]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Name of the inbound firewall rule for `port`
pub fn firewall_rule_name(port: u16) -> String {
    format!("ssh-provision-{}", port)
}

/// OpenSSH provisioning for Windows hosts
#[derive(Clone)]
pub struct WindowsSshd {
    runner: ElevatedRunner,
    config_path: PathBuf,
}

impl WindowsSshd {
    pub fn new(runner: ElevatedRunner) -> Self {
        Self {
            runner,
            config_path: PathBuf::from(WINDOWS_CONFIG_PATH),
        }
    }

    /// Override the sshd_config location
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    async fn powershell(&self, script: &str) -> Result<CommandOutput> {
        self.runner
            .run(POWERSHELL, &powershell_args(script), &RunOptions::new())
            .await
    }

    async fn install(&self) -> Result<()> {
        if self.is_installed().await {
            info!("OpenSSH server capability already installed, skipping install");
            return Ok(());
        }

        info!("Installing Windows capability {}", OPENSSH_CAPABILITY);
        self.powershell(&format!(
            "Add-WindowsCapability -Online -Name {} | Out-Null",
            powershell_quote(OPENSSH_CAPABILITY)
        ))
        .await?;
        Ok(())
    }

    async fn configure(&self, config: &Config) -> Result<()> {
        let rendered = render_sshd_config(config, TargetOs::Windows);
        let target = self.config_path.to_string_lossy().to_string();

        let current = tokio::fs::read(&self.config_path).await.unwrap_or_else(|e| {
            debug!("Unable to read {}: {}", target, e);
            Vec::new()
        });
        if current == rendered.as_bytes() {
            info!("{} already up to date", target);
        } else {
            let staged = stage_document(&rendered)?;
            let staged_path = staged.path().to_string_lossy().to_string();
            debug!("Staged sshd_config at {}", staged_path);

            self.powershell(&copy_script(&staged_path, &target)).await?;
            info!("Wrote {} (port {})", target, config.port);
        }

        info!("Ensuring firewall rule for TCP port {}", config.port);
        self.powershell(&firewall_script(config.port)).await?;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let service = powershell_quote(SERVICE_NAME);
        info!("Enabling and starting the {} service", SERVICE_NAME);
        self.powershell(&format!(
            "Set-Service -Name {} -StartupType Automatic",
            service
        ))
        .await?;
        self.powershell(&format!("Restart-Service -Name {} -Force", service))
            .await?;

        let status = self
            .powershell(&format!("(Get-Service -Name {}).Status", service))
            .await;
        match status {
            Ok(output) if output.stdout.trim() == "Running" => Ok(()),
            Ok(output) => Err(ProvisionError::ServiceNotRunning {
                service: SERVICE_NAME.to_string(),
                detail: format!("status is '{}'", output.stdout.trim()),
            }),
            Err(e) => Err(ProvisionError::ServiceNotRunning {
                service: SERVICE_NAME.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

/// Copy the staged file next to the target, then rename it into place
fn copy_script(staged: &str, target: &str) -> String {
    let incoming = format!("{}.ssh-provision", target);
    format!(
        "New-Item -ItemType Directory -Force -Path (Split-Path -Parent {target}) | Out-Null; \
         Copy-Item -LiteralPath {staged} -Destination {incoming} -Force; \
         Move-Item -LiteralPath {incoming} -Destination {target} -Force",
        staged = powershell_quote(staged),
        incoming = powershell_quote(&incoming),
        target = powershell_quote(target),
    )
}

/// Create the inbound rule only when it does not exist yet
fn firewall_script(port: u16) -> String {
    let name = powershell_quote(&firewall_rule_name(port));
    format!(
        "if (-not (Get-NetFirewallRule -Name {name} -ErrorAction SilentlyContinue)) {{ \
         New-NetFirewallRule -Name {name} -DisplayName 'OpenSSH Server (port {port})' \
         -Enabled True -Direction Inbound -Protocol TCP -Action Allow -LocalPort {port} | Out-Null }}"
    )
}

#[async_trait]
impl SshdStages for WindowsSshd {
    async fn is_installed(&self) -> bool {
        let script = format!(
            "(Get-WindowsCapability -Online -Name {}).State",
            powershell_quote("OpenSSH.Server*")
        );
        let probe = self
            .runner
            .run(
                POWERSHELL,
                &powershell_args(&script),
                &RunOptions::new().without_elevation(),
            )
            .await;
        match probe {
            Ok(output) => output.stdout.lines().any(|line| line.trim() == "Installed"),
            Err(e) => {
                debug!("Capability query failed: {}", e);
                false
            }
        }
    }

    async fn install_ssh(&self, _config: &Config) -> Result<()> {
        self.install()
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Install, TargetOs::Windows, e))
    }

    async fn configure_ssh(&self, config: &Config) -> Result<()> {
        self.configure(config)
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Configure, TargetOs::Windows, e))
    }

    async fn start_ssh(&self, _config: &Config) -> Result<()> {
        self.start()
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Start, TargetOs::Windows, e))
    }
}
