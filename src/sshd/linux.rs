//! Linux OS executor

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::render::{render_sshd_config, LINUX_CONFIG_PATH};
use super::{stage_document, SshdStages};
use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::exec::elevation::{ElevatedRunner, RunOptions};
use crate::plan::{Stage, TargetOs};

/// A package manager able to install the OpenSSH server
struct PackageManager {
    binary: &'static str,
    refresh: Option<&'static [&'static str]>,
    install: &'static [&'static str],
}

/// Probed in order; the first one on PATH wins
const PACKAGE_MANAGERS: &[PackageManager] = &[
    PackageManager {
        binary: "apt-get",
        refresh: Some(&["DEBIAN_FRONTEND=noninteractive", "apt-get", "update"]),
        install: &[
            "DEBIAN_FRONTEND=noninteractive",
            "apt-get",
            "install",
            "-y",
            "openssh-server",
        ],
    },
    PackageManager {
        binary: "dnf",
        refresh: None,
        install: &["dnf", "install", "-y", "openssh-server"],
    },
    PackageManager {
        binary: "yum",
        refresh: None,
        install: &["yum", "install", "-y", "openssh-server"],
    },
    PackageManager {
        binary: "zypper",
        refresh: None,
        install: &["zypper", "--non-interactive", "install", "openssh"],
    },
    PackageManager {
        binary: "pacman",
        refresh: None,
        install: &["pacman", "-S", "--noconfirm", "--needed", "openssh"],
    },
    PackageManager {
        binary: "apk",
        refresh: None,
        install: &["apk", "add", "--no-cache", "openssh-server"],
    },
];

/// Service manager driving the sshd unit
#[derive(Debug, Clone, PartialEq, Eq)]
enum InitSystem {
    Systemd { unit: String },
    OpenRc,
}

/// OpenSSH provisioning for Linux hosts
#[derive(Clone)]
pub struct LinuxSshd {
    runner: ElevatedRunner,
    config_path: PathBuf,
}

impl LinuxSshd {
    pub fn new(runner: ElevatedRunner) -> Self {
        Self {
            runner,
            config_path: PathBuf::from(LINUX_CONFIG_PATH),
        }
    }

    /// Override the sshd_config location
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    async fn install(&self) -> Result<()> {
        if self.is_installed().await {
            info!("OpenSSH server already installed, skipping install");
            return Ok(());
        }

        let manager = PACKAGE_MANAGERS
            .iter()
            .find(|pm| self.runner.locate(pm.binary).is_some())
            .ok_or_else(|| {
                ProvisionError::unsupported(
                    "no supported package manager found (apt-get, dnf, yum, zypper, pacman, apk)",
                )
            })?;

        info!("Installing OpenSSH server with {}", manager.binary);
        if let Some(refresh) = manager.refresh {
            self.runner.run("env", refresh, &RunOptions::elevated()).await?;
        }
        self.runner
            .run("env", manager.install, &RunOptions::elevated())
            .await?;
        Ok(())
    }

    async fn configure(&self, config: &Config) -> Result<()> {
        let rendered = render_sshd_config(config, TargetOs::Linux);
        let target = self.config_path.to_string_lossy().to_string();

        // /etc/ssh is world-readable even where sshd_config itself is not
        let exists = tokio::fs::try_exists(&self.config_path)
            .await
            .unwrap_or_else(|e| {
                debug!("Unable to stat {}: {}", target, e);
                true
            });

        match tokio::fs::read(&self.config_path).await {
            Ok(current) if current == rendered.as_bytes() => {
                info!("{} already up to date", target);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if exists => {
                warn!("Unable to read {} ({}); replacing it without comparing", target, e);
            }
            Err(_) => {}
        }

        if exists {
            self.backup_once(&target).await?;
        }

        let staged = stage_document(&rendered)?;
        let staged_path = staged.path().to_string_lossy().to_string();
        let incoming = format!("{}.ssh-provision", target);

        debug!("Staged sshd_config at {}", staged_path);
        self.runner
            .run(
                "install",
                &["-m", "0644", staged_path.as_str(), incoming.as_str()],
                &RunOptions::elevated(),
            )
            .await?;
        self.runner
            .run("mv", &["-f", incoming.as_str(), target.as_str()], &RunOptions::elevated())
            .await?;

        info!("Wrote {} (port {})", target, config.port);
        Ok(())
    }

    /// Keep the pre-provisioning config as `<path>.bak`, never overwriting an
    /// earlier backup
    async fn backup_once(&self, target: &str) -> Result<()> {
        let backup = format!("{}.bak", target);
        if Path::new(&backup).exists() {
            return Ok(());
        }

        info!("Backing up {} to {}", target, backup);
        self.runner
            .run("cp", &["-p", target, backup.as_str()], &RunOptions::elevated())
            .await?;
        Ok(())
    }

    async fn detect_init(&self) -> Result<InitSystem> {
        if self.runner.locate("systemctl").is_some() {
            let listing = self
                .runner
                .run(
                    "systemctl",
                    &["list-unit-files", "--no-legend", "ssh.service", "sshd.service"],
                    &RunOptions::new().without_elevation(),
                )
                .await
                .map(|output| output.stdout)
                .unwrap_or_else(|e| {
                    debug!("Unit listing failed, assuming sshd.service: {}", e);
                    String::new()
                });
            return Ok(InitSystem::Systemd {
                unit: pick_unit(&listing).to_string(),
            });
        }

        if self.runner.locate("rc-service").is_some() {
            return Ok(InitSystem::OpenRc);
        }

        Err(ProvisionError::unsupported(
            "no supported service manager found (systemctl, rc-service)",
        ))
    }

    async fn start(&self) -> Result<()> {
        match self.detect_init().await? {
            InitSystem::Systemd { unit } => {
                info!("Enabling and starting {} via systemd", unit);
                self.runner
                    .run("systemctl", &["enable", unit.as_str()], &RunOptions::elevated())
                    .await?;
                self.runner
                    .run("systemctl", &["restart", unit.as_str()], &RunOptions::elevated())
                    .await?;

                let state = self
                    .runner
                    .run(
                        "systemctl",
                        &["is-active", unit.as_str()],
                        &RunOptions::new().without_elevation(),
                    )
                    .await;
                match state {
                    Ok(output) if output.stdout.trim() == "active" => Ok(()),
                    Ok(output) => Err(ProvisionError::ServiceNotRunning {
                        service: unit,
                        detail: output.stdout.trim().to_string(),
                    }),
                    Err(e) => Err(ProvisionError::ServiceNotRunning {
                        service: unit,
                        detail: e.to_string(),
                    }),
                }
            }
            InitSystem::OpenRc => {
                info!("Enabling and starting sshd via OpenRC");
                self.runner
                    .run("rc-update", &["add", "sshd", "default"], &RunOptions::elevated())
                    .await?;
                self.runner
                    .run("rc-service", &["sshd", "restart"], &RunOptions::elevated())
                    .await?;
                self.runner
                    .run("rc-service", &["sshd", "status"], &RunOptions::new())
                    .await
                    .map(|_| ())
                    .map_err(|e| ProvisionError::ServiceNotRunning {
                        service: "sshd".to_string(),
                        detail: e.to_string(),
                    })
            }
        }
    }
}

/// Debian names the unit `ssh`, most other distributions `sshd`
fn pick_unit(listing: &str) -> &'static str {
    let has = |name: &str| {
        listing
            .lines()
            .any(|line| line.split_whitespace().next() == Some(name))
    };
    if has("ssh.service") {
        "ssh"
    } else {
        "sshd"
    }
}

#[async_trait]
impl SshdStages for LinuxSshd {
    async fn is_installed(&self) -> bool {
        self.runner.locate("sshd").is_some()
    }

    async fn install_ssh(&self, _config: &Config) -> Result<()> {
        self.install()
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Install, TargetOs::Linux, e))
    }

    async fn configure_ssh(&self, config: &Config) -> Result<()> {
        self.configure(config)
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Configure, TargetOs::Linux, e))
    }

    async fn start_ssh(&self, _config: &Config) -> Result<()> {
        self.start()
            .await
            .map_err(|e| ProvisionError::configuration(Stage::Start, TargetOs::Linux, e))
    }
}
