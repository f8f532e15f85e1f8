//! Provisioning plan types
//!
//! A [`Plan`] is computed once per run: which OS variant to drive and whether
//! the install stage is needed. The orchestrator treats it as read-only.

use std::fmt;

use serde::Serialize;

use crate::error::{ProvisionError, Result};
use crate::orchestrator::ProvisionBackend;

/// Operating system family of the target host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetOs {
    Linux,
    Windows,
}

impl TargetOs {
    /// The OS this binary is running on
    pub fn current() -> Result<Self> {
        Self::from_name(std::env::consts::OS)
    }

    /// Map a `std::env::consts::OS` style name
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "linux" => Ok(TargetOs::Linux),
            "windows" => Ok(TargetOs::Windows),
            other => Err(ProvisionError::config(format!(
                "Unsupported platform '{}': only linux and windows hosts can be provisioned",
                other
            ))),
        }
    }
}

impl fmt::Display for TargetOs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetOs::Linux => f.write_str("linux"),
            TargetOs::Windows => f.write_str("windows"),
        }
    }
}

/// One of the four ordered provisioning stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Install,
    Configure,
    #[serde(rename = "authorize-keys")]
    Keys,
    Start,
}

impl Stage {
    /// All stages in execution order
    pub const ORDER: [Stage; 4] = [Stage::Install, Stage::Configure, Stage::Keys, Stage::Start];

    /// Name recorded in `ExecutionResult::steps` once the stage completes
    pub fn step_name(self) -> &'static str {
        match self {
            Stage::Install => "installed",
            Stage::Configure => "configured",
            Stage::Keys => "keys-setup",
            Stage::Start => "service-started",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Install => f.write_str("install"),
            Stage::Configure => f.write_str("configure"),
            Stage::Keys => f.write_str("authorize-keys"),
            Stage::Start => f.write_str("start"),
        }
    }
}

/// Precomputed decision of which OS variant and which stages to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub os: TargetOs,
    pub needs_install: bool,
    pub steps: Vec<String>,
}

impl Plan {
    pub fn new(os: TargetOs, needs_install: bool) -> Self {
        let steps = Stage::ORDER
            .iter()
            .filter(|stage| needs_install || **stage != Stage::Install)
            .map(|stage| stage.step_name().to_string())
            .collect();

        Self {
            os,
            needs_install,
            steps,
        }
    }

    /// Build the plan by asking the OS executor whether sshd is present
    pub async fn detect(backend: &dyn ProvisionBackend, os: TargetOs) -> Self {
        let installed = backend.stages(os).is_installed().await;
        Self::new(os, !installed)
    }

    /// Stages this plan will run, in order
    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ORDER
            .into_iter()
            .filter(move |stage| self.needs_install || *stage != Stage::Install)
    }
}
