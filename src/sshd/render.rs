//! sshd_config rendering
//!
//! The output depends only on the [`Config`] and target OS, so two renders of
//! the same input are byte-identical.

use crate::config::Config;
use crate::exec::sanitize::{powershell_quote, shell_quote};
use crate::plan::TargetOs;

/// Canonical sshd_config location on Linux
pub const LINUX_CONFIG_PATH: &str = "/etc/ssh/sshd_config";

/// Canonical sshd_config location on Windows
pub const WINDOWS_CONFIG_PATH: &str = r"C:\ProgramData\ssh\sshd_config";

pub const MAX_AUTH_TRIES: u32 = 3;
pub const MAX_SESSIONS: u32 = 10;

const HEADER: &str = "# Managed by ssh-provision. Local changes are overwritten on the next run.";

/// Render the sshd_config document for `os`
pub fn render_sshd_config(config: &Config, os: TargetOs) -> String {
    let mut lines = vec![
        HEADER.to_string(),
        format!("Port {}", config.port),
        "PubkeyAuthentication yes".to_string(),
        "AuthorizedKeysFile .ssh/authorized_keys".to_string(),
        "PasswordAuthentication no".to_string(),
        "KbdInteractiveAuthentication no".to_string(),
        "PermitEmptyPasswords no".to_string(),
        "PermitRootLogin no".to_string(),
        format!("MaxAuthTries {}", MAX_AUTH_TRIES),
        format!("MaxSessions {}", MAX_SESSIONS),
        allow_users_line(config),
        "X11Forwarding no".to_string(),
    ];

    match os {
        TargetOs::Linux => {
            lines.push("SyslogFacility AUTH".to_string());
            lines.push("LogLevel INFO".to_string());
            lines.push("Subsystem sftp internal-sftp".to_string());
        }
        TargetOs::Windows => {
            // LOCAL0 sends logs to C:\ProgramData\ssh\logs instead of ETW
            lines.push("SyslogFacility LOCAL0".to_string());
            lines.push("LogLevel INFO".to_string());
            lines.push("Subsystem sftp sftp-server.exe".to_string());
        }
    }

    if !config.disable_force_cwd {
        lines.push(format!("ForceCommand {}", force_command(config, os)));
    }

    let mut document = lines.join("\n");
    document.push('\n');
    document
}

/// `AllowUsers` with blank entries dropped, order preserved
pub fn allow_users_line(config: &Config) -> String {
    format!("AllowUsers {}", config.users().join(" "))
}

/// Command that enters `default_cwd`, then runs the requested command or a
/// login shell
pub fn force_command(config: &Config, os: TargetOs) -> String {
    let dir = config.default_cwd.to_string_lossy();
    match os {
        TargetOs::Linux => format!(
            "cd {} && if [ -n \"$SSH_ORIGINAL_COMMAND\" ]; then exec \"$SHELL\" -c \"$SSH_ORIGINAL_COMMAND\"; else exec \"$SHELL\" -l; fi",
            shell_quote(&dir)
        ),
        TargetOs::Windows => format!(
            "powershell.exe -NoLogo -Command \"Set-Location -LiteralPath {}; if ($env:SSH_ORIGINAL_COMMAND) {{ Invoke-Expression $env:SSH_ORIGINAL_COMMAND }} else {{ powershell.exe -NoLogo }}\"",
            powershell_quote(&dir)
        ),
    }
}
