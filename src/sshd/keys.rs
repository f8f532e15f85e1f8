//! authorized_keys setup, shared by both OS variants
//!
//! The key is parsed with `ssh-key` and re-encoded, so only a well-formed
//! single OpenSSH public key line is ever written. Appending is idempotent:
//! a key already present is left alone.

use ssh_key::PublicKey;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{ProvisionError, Result};
use crate::exec::elevation::{ElevatedRunner, RunOptions};
use crate::exec::sanitize::{powershell_quote, shell_quote};
use crate::plan::TargetOs;
use crate::sshd::windows::{powershell_args, POWERSHELL};

/// Parse an OpenSSH public key and return its canonical one-line form
///
/// # Examples
///
/// ```
/// use ssh_provision::sshd::normalize_public_key;
///
/// let key = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMRny3EO0+5gAlyS0Je7+rBndNKS/jm7IH8lcep71lfK ci@example\n";
/// assert!(normalize_public_key(key).unwrap().starts_with("ssh-ed25519 AAAA"));
/// assert!(normalize_public_key("not a key").is_err());
/// ```
pub fn normalize_public_key(raw: &str) -> Result<String> {
    let key = PublicKey::from_openssh(raw.trim())
        .map_err(|e| ProvisionError::ssh_key(format!("Invalid public key: {}", e)))?;
    key.to_openssh()
        .map_err(|e| ProvisionError::ssh_key(format!("Unable to encode public key: {}", e)))
}

/// Authorize `config.public_key` for `config.key_user`
pub async fn setup_authorized_keys(runner: &ElevatedRunner, config: &Config) -> Result<()> {
    let Some(raw) = config.public_key.as_deref() else {
        warn!("No public key provided; leaving authorized_keys untouched");
        return Ok(());
    };
    let key = normalize_public_key(raw)?;
    let user = config.key_user.as_str();

    match runner.platform().os {
        TargetOs::Linux => {
            let home = linux_home(runner, user).await?;
            let script = linux_script(&home, user, &key);
            runner
                .run("sh", &["-c", script.as_str()], &RunOptions::new())
                .await?;
            info!("Authorized key for {} in {}/.ssh/authorized_keys", user, home);
        }
        TargetOs::Windows => {
            let home = windows_home(user);
            runner
                .run(
                    POWERSHELL,
                    &powershell_args(&windows_script(&home, &key)),
                    &RunOptions::new(),
                )
                .await?;
            info!(r"Authorized key for {} in {}\.ssh\authorized_keys", user, home);
        }
    }
    Ok(())
}

/// Home directory from the passwd database
async fn linux_home(runner: &ElevatedRunner, user: &str) -> Result<String> {
    let output = runner
        .run("getent", &["passwd", user], &RunOptions::new().without_elevation())
        .await?;

    parse_passwd_home(&output.stdout).ok_or_else(|| {
        ProvisionError::config(format!("No home directory found for user '{}'", user))
    })
}

fn parse_passwd_home(entry: &str) -> Option<String> {
    entry
        .lines()
        .next()
        .and_then(|line| line.split(':').nth(5))
        .filter(|home| !home.is_empty())
        .map(str::to_string)
}

/// Profile directory of a local Windows account
fn windows_home(user: &str) -> String {
    format!(r"C:\Users\{}", user)
}

fn linux_script(home: &str, user: &str, key: &str) -> String {
    let dir = shell_quote(&format!("{}/.ssh", home));
    let file = shell_quote(&format!("{}/.ssh/authorized_keys", home));
    let key = shell_quote(key);
    let user = shell_quote(user);
    format!(
        "set -e; umask 077; mkdir -p {dir}; touch {file}; \
         grep -qxF {key} {file} || printf '%s\\n' {key} >> {file}; \
         chmod 700 {dir}; chmod 600 {file}; \
         if [ \"$(id -u)\" = 0 ]; then chown {user}: {dir} {file}; fi"
    )
}

fn windows_script(home: &str, key: &str) -> String {
    let dir = powershell_quote(&format!(r"{}\.ssh", home));
    let key = powershell_quote(key);
    format!(
        "$dir = {dir}; New-Item -ItemType Directory -Force -Path $dir | Out-Null; \
         $file = Join-Path $dir 'authorized_keys'; $key = {key}; \
         if (-not (Test-Path -LiteralPath $file) -or -not (Get-Content -LiteralPath $file | Where-Object {{ $_ -eq $key }})) \
         {{ Add-Content -LiteralPath $file -Value $key -Encoding ascii }}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::exec::elevation::PlatformContext;
    use crate::exec::testing::{fail, ok, FakeRunner};
    use std::path::PathBuf;
    use std::sync::Arc;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIMRny3EO0+5gAlyS0Je7+rBndNKS/jm7IH8lcep71lfK ci@example";

    fn config(key: Option<&str>) -> Config {
        Config {
            port: 22,
            mode: Mode::Auto,
            allow_users: vec!["ci".to_string()],
            default_cwd: PathBuf::from("/workspace"),
            disable_force_cwd: false,
            cwd: PathBuf::from("/home/ci"),
            public_key: key.map(str::to_string),
            key_user: "ci".to_string(),
        }
    }

    fn runner(fake: &Arc<FakeRunner>, os: TargetOs) -> ElevatedRunner {
        ElevatedRunner::new(fake.clone(), PlatformContext::new(os, false))
    }

    #[test]
    fn test_normalize_public_key() {
        assert_eq!(normalize_public_key(&format!("  {}\n", KEY)).unwrap(), KEY);
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        let err = normalize_public_key("ssh-ed25519 not-base64!").unwrap_err();
        assert!(err.to_string().starts_with("SSH key error: Invalid public key"));
    }

    #[test]
    fn test_parse_passwd_home() {
        assert_eq!(
            parse_passwd_home("ci:x:1000:1000:CI,,,:/home/ci:/bin/bash\n"),
            Some("/home/ci".to_string())
        );
        assert_eq!(parse_passwd_home(""), None);
    }

    #[tokio::test]
    async fn test_no_key_is_a_no_op() {
        let fake = Arc::new(FakeRunner::new());
        setup_authorized_keys(&runner(&fake, TargetOs::Linux), &config(None))
            .await
            .unwrap();
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_linux_appends_key() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("getent passwd ci", ok("ci:x:1000:1000::/home/ci:/bin/bash\n"));

        setup_authorized_keys(&runner(&fake, TargetOs::Linux), &config(Some(KEY)))
            .await
            .unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].starts_with("sh -c set -e; umask 077; mkdir -p '/home/ci/.ssh';"));
        assert!(calls[1].contains(&format!("grep -qxF '{}'", KEY)));
        assert!(calls[1].contains("chown 'ci': '/home/ci/.ssh' '/home/ci/.ssh/authorized_keys'"));
    }

    #[tokio::test]
    async fn test_linux_unknown_user() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("getent passwd ci", fail(2, ""));

        let err = setup_authorized_keys(&runner(&fake, TargetOs::Linux), &config(Some(KEY)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ProcessExit { exit_code: 2, .. }));
    }

    #[tokio::test]
    async fn test_windows_appends_key() {
        let fake = Arc::new(FakeRunner::new());
        setup_authorized_keys(&runner(&fake, TargetOs::Windows), &config(Some(KEY)))
            .await
            .unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("powershell.exe"));
        assert!(calls[0].contains(r"$dir = 'C:\Users\ci\.ssh'"));
        assert!(calls[0].contains("Add-Content"));
    }

    #[cfg(unix)]
    #[test]
    fn test_linux_script_runs_in_sh() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().to_string_lossy().to_string();
        let whoami = std::process::Command::new("id").arg("-un").output().unwrap();
        let user = String::from_utf8_lossy(&whoami.stdout).trim().to_string();
        let script = linux_script(&home, &user, KEY);

        // second run must not duplicate the key
        for _ in 0..2 {
            let status = std::process::Command::new("sh")
                .args(["-c", script.as_str()])
                .status()
                .unwrap();
            assert!(status.success());
        }

        let content = std::fs::read_to_string(dir.path().join(".ssh/authorized_keys")).unwrap();
        assert_eq!(content, format!("{}\n", KEY));
    }
}
