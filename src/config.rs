//! Configuration and CLI argument parsing for ssh-provision

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::error::{ProvisionError, Result};
use crate::exec::sanitize::filter_users;
use crate::sshd::keys::normalize_public_key;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Public keys looked up under `~/.ssh` when none is given explicitly
pub const DEFAULT_PUBLIC_KEYS: &[&str] = &["id_ed25519.pub", "id_ecdsa.pub", "id_rsa.pub"];

/// Privilege mode for a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// The process must already run as root/Administrator
    Root,
    /// Run as a regular user, escalating through sudo when needed
    User,
    /// `root` when already privileged, `user` otherwise
    #[default]
    Auto,
}

impl Mode {
    /// Resolve `auto` against the current privilege level
    pub fn resolve(self, is_privileged: bool) -> Mode {
        match self {
            Mode::Auto if is_privileged => Mode::Root,
            Mode::Auto => Mode::User,
            other => other,
        }
    }
}

/// ssh-provision CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-provision")]
#[command(version)]
#[command(about = "Install, harden and start an OpenSSH server on this host")]
pub struct Args {
    /// Port sshd listens on
    #[arg(long, default_value_t = DEFAULT_PORT, env = "SSH_PROVISION_PORT")]
    pub port: u16,

    /// Privilege mode
    #[arg(long, value_enum, default_value_t = Mode::Auto, env = "SSH_PROVISION_MODE")]
    pub mode: Mode,

    /// Users allowed to log in (comma separated)
    #[arg(long, value_delimiter = ',', env = "SSH_PROVISION_ALLOW_USERS")]
    pub allow_users: Vec<String>,

    /// Directory every session starts in (defaults to the current directory)
    #[arg(long, env = "SSH_PROVISION_DEFAULT_CWD")]
    pub default_cwd: Option<PathBuf>,

    /// Do not force sessions into the default directory
    #[arg(long, default_value = "false", env = "SSH_PROVISION_DISABLE_FORCE_CWD")]
    pub disable_force_cwd: bool,

    /// OpenSSH public key to authorize
    #[arg(long, env = "SSH_PROVISION_PUBLIC_KEY", conflicts_with = "public_key_file")]
    pub public_key: Option<String>,

    /// File containing the OpenSSH public key to authorize
    #[arg(long, env = "SSH_PROVISION_PUBLIC_KEY_FILE")]
    pub public_key_file: Option<PathBuf>,

    /// Account whose authorized_keys receives the public key
    #[arg(long, env = "SSH_PROVISION_KEY_USER")]
    pub key_user: Option<String>,

    /// Print the plan without changing anything
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Emit the result as JSON on stdout
    #[arg(long, default_value = "false")]
    pub json: bool,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

/// Parsed and validated configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// sshd port
    pub port: u16,

    /// Privilege mode
    pub mode: Mode,

    /// Users allowed to log in, as given (rendering drops blank entries)
    pub allow_users: Vec<String>,

    /// Directory sessions are forced into
    pub default_cwd: PathBuf,

    /// Whether the forced `cd` is disabled
    pub disable_force_cwd: bool,

    /// Working directory of the invocation
    pub cwd: PathBuf,

    /// Public key to authorize, if any was found
    pub public_key: Option<String>,

    /// Account receiving the public key
    pub key_user: String,
}

/// Process-level facts used to fill in defaults
#[derive(Debug, Clone, Default)]
pub struct Defaults {
    /// Login name of the person who invoked the tool
    pub invoking_user: Option<String>,

    /// Home directory of the invoking user
    pub home: Option<PathBuf>,

    /// Current working directory
    pub cwd: PathBuf,
}

impl Defaults {
    /// Read defaults from the running process
    pub fn from_process() -> Result<Self> {
        let invoking_user = ["SUDO_USER", "USER", "USERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());

        Ok(Self {
            invoking_user,
            home: dirs::home_dir(),
            cwd: std::env::current_dir()?,
        })
    }
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        Self::from_args_with(args, &Defaults::from_process()?)
    }

    /// Create Config from CLI Args with explicit process defaults
    pub fn from_args_with(args: Args, defaults: &Defaults) -> Result<Self> {
        let public_key = validate_args(&args, defaults)?;

        let mut allow_users = args.allow_users;
        if filter_users(&allow_users).is_empty() {
            if let Some(user) = &defaults.invoking_user {
                allow_users = vec![user.clone()];
            }
        }

        let key_user = args
            .key_user
            .or_else(|| defaults.invoking_user.clone())
            .or_else(|| filter_users(&allow_users).first().map(|u| u.to_string()))
            .ok_or_else(|| ProvisionError::config("Unable to determine --key-user"))?;

        let default_cwd = match args.default_cwd {
            Some(dir) if dir.is_absolute() => dir,
            Some(dir) => defaults.cwd.join(dir),
            None => defaults.cwd.clone(),
        };

        Ok(Config {
            port: args.port,
            mode: args.mode,
            allow_users,
            default_cwd,
            disable_force_cwd: args.disable_force_cwd,
            cwd: defaults.cwd.clone(),
            public_key,
            key_user,
        })
    }

    /// Allowed users with blank entries removed
    pub fn users(&self) -> Vec<&str> {
        filter_users(&self.allow_users)
    }
}

/// Validate CLI arguments, returning the normalized public key if one was found
fn validate_args(args: &Args, defaults: &Defaults) -> Result<Option<String>> {
    let mut errors = Vec::new();

    if args.port == 0 {
        errors.push("--port must be between 1 and 65535".to_string());
    }

    let users = filter_users(&args.allow_users);
    if users.is_empty() && defaults.invoking_user.is_none() {
        errors.push("Missing --allow-users and the invoking user is unknown".to_string());
    }
    for user in users.iter().filter(|u| u.chars().any(char::is_whitespace)) {
        errors.push(format!("Invalid user name in --allow-users: '{}'", user));
    }

    let mut key_usable = true;
    if let Some(ref key_path) = args.public_key_file {
        if !key_path.exists() {
            errors.push(format!("Public key file not found: {}", key_path.display()));
            key_usable = false;
        }
    }

    if let Some(ref key) = args.public_key {
        if key.trim().is_empty() {
            errors.push("--public-key cannot be empty".to_string());
            key_usable = false;
        }
    }

    let mut public_key = None;
    if key_usable {
        match load_public_key(
            args.public_key.as_deref(),
            args.public_key_file.as_deref(),
            defaults.home.as_deref(),
        ) {
            Ok(Some(raw)) => match normalize_public_key(&raw) {
                Ok(key) => public_key = Some(key),
                Err(e) => errors.push(e.to_string()),
            },
            Ok(None) => {}
            Err(e) => errors.push(format!("Unable to read public key: {}", e)),
        }
    }

    if !errors.is_empty() {
        return Err(ProvisionError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(public_key)
}

/// Resolve the public key from the flag, the key file, or `~/.ssh` defaults
fn load_public_key(
    inline: Option<&str>,
    file: Option<&Path>,
    home: Option<&Path>,
) -> Result<Option<String>> {
    if let Some(key) = inline {
        return Ok(Some(key.trim().to_string()));
    }

    if let Some(path) = file {
        let content = std::fs::read_to_string(path)?;
        return Ok(Some(content.trim().to_string()));
    }

    let Some(home) = home else {
        return Ok(None);
    };

    for name in DEFAULT_PUBLIC_KEYS {
        let candidate = home.join(".ssh").join(name);
        if candidate.is_file() {
            let content = std::fs::read_to_string(&candidate)?;
            return Ok(Some(content.trim().to_string()));
        }
    }

    Ok(None)
}
