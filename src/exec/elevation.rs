//! Privilege-aware command execution
//!
//! [`ElevatedRunner`] runs a command directly and, when it fails for lack of
//! permission on a non-Windows host, retries it through `sudo`:
//!
//! 1. direct run, output captured
//! 2. `sudo -n <command>` (never prompts)
//! 3. if sudo wants a password or a tty and stdin is a terminal,
//!    `sudo <command>` with inherited stdio so the user can answer the prompt
//!
//! There is no timeout on any of these; an unanswered password prompt blocks
//! the run.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::command::{CommandOutput, CommandRunner};
use crate::error::{display_command, ProvisionError, Result};
use crate::plan::TargetOs;

/// Elevation helper looked up on PATH
pub const ELEVATION_HELPER: &str = "sudo";

/// Flag that stops the helper from prompting
pub const NON_INTERACTIVE_FLAG: &str = "-n";

/// Error text that marks a permission failure
const PERMISSION_SIGNATURES: &[&str] = &["EACCES", "EPERM", "Permission denied"];

/// Error text that marks an elevation attempt needing a password or a tty
const INTERACTION_SIGNATURES: &[&str] = &["password", "terminal is required", "no tty"];

/// Whether `text` carries a permission-denied signature
pub fn is_permission_denied(text: &str) -> bool {
    PERMISSION_SIGNATURES.iter().any(|sig| text.contains(sig))
        || text.to_lowercase().contains("permission denied")
}

/// Whether a failed non-interactive elevation asked for a password or tty
pub fn requires_interaction(text: &str) -> bool {
    let lowered = text.to_lowercase();
    INTERACTION_SIGNATURES.iter().any(|sig| lowered.contains(sig))
}

fn is_permission_io_error(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::PermissionDenied || is_permission_denied(&err.to_string())
}

/// Ambient facts about the running process, passed in explicitly so tests
/// can fake them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformContext {
    /// OS family of the host
    pub os: TargetOs,

    /// Whether stdin is attached to a terminal
    pub interactive: bool,
}

impl PlatformContext {
    pub fn new(os: TargetOs, interactive: bool) -> Self {
        Self { os, interactive }
    }

    /// Read the context of the current process
    pub fn detect() -> Result<Self> {
        Ok(Self {
            os: TargetOs::current()?,
            interactive: std::io::stdin().is_terminal(),
        })
    }
}

/// Per-call options for [`ElevatedRunner::run`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Whether a permission failure may be retried through sudo
    pub elevate: bool,

    /// The command always needs root; an unprivileged process goes straight
    /// to `sudo -n` instead of trying it directly first
    pub require_root: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            elevate: true,
            require_root: false,
        }
    }
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// For package managers, service managers and writes under `/etc`
    pub fn elevated() -> Self {
        Self {
            elevate: true,
            require_root: true,
        }
    }

    /// Never retry through sudo (for probes and read-only queries)
    pub fn without_elevation(mut self) -> Self {
        self.elevate = false;
        self.require_root = false;
        self
    }
}

/// Runs commands, escalating through sudo on permission failures
#[derive(Clone)]
pub struct ElevatedRunner {
    runner: Arc<dyn CommandRunner>,
    platform: PlatformContext,
    privileged: Arc<OnceCell<bool>>,
}

impl ElevatedRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, platform: PlatformContext) -> Self {
        Self {
            runner,
            platform,
            privileged: Arc::new(OnceCell::new()),
        }
    }

    /// Use a known privilege level instead of probing it on first use
    pub fn with_privileged(mut self, privileged: bool) -> Self {
        self.privileged = Arc::new(OnceCell::new_with(Some(privileged)));
        self
    }

    /// The platform this runner was built for
    pub fn platform(&self) -> PlatformContext {
        self.platform
    }

    /// Locate an executable on PATH (or the sbin directories)
    pub fn locate(&self, program: &str) -> Option<PathBuf> {
        self.runner.locate(program)
    }

    /// Run a command, retrying under elevation on a permission failure.
    ///
    /// # Returns
    /// * `Ok(CommandOutput)` - exit code 0; stdout/stderr are empty when the
    ///   command ended up running with an interactive sudo prompt
    /// * `Err(ProvisionError::ProcessSpawn)` - the command could not start
    /// * `Err(ProvisionError::ProcessExit)` - the command exited non-zero
    /// * `Err(ProvisionError::ElevationUnavailable)` - permission denied, no sudo
    /// * `Err(ProvisionError::ElevationRequiresInteraction)` - sudo needs a
    ///   password and there is no terminal to ask on
    pub async fn run<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        options: &RunOptions,
    ) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let may_escalate = options.elevate && self.platform.os != TargetOs::Windows;

        if may_escalate && options.require_root && !self.runs_privileged().await {
            debug!(
                "`{}` needs root, running it through {}",
                display_command(program, &args),
                ELEVATION_HELPER
            );
            return self.escalate(program, &args, "not running as root").await;
        }

        match self.runner.output(program, &args).await {
            Ok(output) if output.success() => {
                warn_on_stderr(program, &args, &output);
                Ok(output)
            }
            Ok(output) => {
                if may_escalate && is_permission_denied(&output.stderr) {
                    debug!(
                        "`{}` was denied permission, escalating",
                        display_command(program, &args)
                    );
                    return self.escalate(program, &args, &output.stderr).await;
                }
                Err(ProvisionError::process_exit(
                    program,
                    &args,
                    output.exit_code,
                    &output.stderr,
                ))
            }
            Err(err) => {
                if may_escalate && is_permission_io_error(&err) {
                    debug!(
                        "`{}` could not be started ({}), escalating",
                        display_command(program, &args),
                        err
                    );
                    return self.escalate(program, &args, &err.to_string()).await;
                }
                Err(ProvisionError::process_spawn(program, &args, err))
            }
        }
    }

    /// Cached privilege level, probed once per runner and its clones
    async fn runs_privileged(&self) -> bool {
        *self
            .privileged
            .get_or_init(|| self.is_privileged())
            .await
    }

    async fn escalate(&self, program: &str, args: &[String], cause: &str) -> Result<CommandOutput> {
        let command = display_command(program, args);

        let Some(helper) = self.runner.locate(ELEVATION_HELPER) else {
            return Err(ProvisionError::ElevationUnavailable {
                command,
                detail: format!("{} not found on PATH ({})", ELEVATION_HELPER, cause.trim()),
            });
        };
        let helper = helper.to_string_lossy().to_string();

        let mut sudo_args = vec![NON_INTERACTIVE_FLAG.to_string(), program.to_string()];
        sudo_args.extend(args.iter().cloned());

        info!("Retrying `{}` with {}", command, ELEVATION_HELPER);
        let output = self
            .runner
            .output(&helper, &sudo_args)
            .await
            .map_err(|e| ProvisionError::process_spawn(&helper, &sudo_args, e))?;

        if output.success() {
            warn_on_stderr(&helper, &sudo_args, &output);
            return Ok(output);
        }

        if !requires_interaction(&output.stderr) {
            return Err(ProvisionError::process_exit(
                &helper,
                &sudo_args,
                output.exit_code,
                &output.stderr,
            ));
        }

        if !self.platform.interactive {
            return Err(ProvisionError::ElevationRequiresInteraction {
                command,
                detail: output.stderr.trim().to_string(),
            });
        }

        warn!(
            "{} needs a password for `{}`; prompting on the terminal",
            ELEVATION_HELPER, command
        );
        let mut prompt_args = vec![program.to_string()];
        prompt_args.extend(args.iter().cloned());

        let exit_code = self
            .runner
            .status(&helper, &prompt_args)
            .await
            .map_err(|e| ProvisionError::process_spawn(&helper, &prompt_args, e))?;

        if exit_code == 0 {
            Ok(CommandOutput::new())
        } else {
            Err(ProvisionError::process_exit(&helper, &prompt_args, exit_code, ""))
        }
    }

    /// Whether the process already runs as root/Administrator.
    ///
    /// Best effort: any probe failure reads as `false`.
    pub async fn is_privileged(&self) -> bool {
        let probe = match self.platform.os {
            TargetOs::Linux => self.runner.output("id", &["-u".to_string()]).await,
            TargetOs::Windows => {
                self.runner
                    .output("net", &["session".to_string()])
                    .await
            }
        };

        match (self.platform.os, probe) {
            (TargetOs::Linux, Ok(output)) => output.success() && output.stdout.trim() == "0",
            (TargetOs::Windows, Ok(output)) => output.success(),
            (_, Err(e)) => {
                debug!("Privilege probe failed: {}", e);
                false
            }
        }
    }

    /// Whether commands can run with elevated privileges: already privileged,
    /// or sudo is present and `sudo -n true` succeeds.
    pub async fn has_elevation_access(&self) -> bool {
        if self.is_privileged().await {
            return true;
        }
        if self.platform.os == TargetOs::Windows {
            return false;
        }

        let Some(helper) = self.runner.locate(ELEVATION_HELPER) else {
            debug!("{} not found on PATH", ELEVATION_HELPER);
            return false;
        };

        let args = [NON_INTERACTIVE_FLAG.to_string(), "true".to_string()];
        match self
            .runner
            .output(&helper.to_string_lossy(), &args)
            .await
        {
            Ok(output) => output.success(),
            Err(e) => {
                debug!("Elevation probe failed: {}", e);
                false
            }
        }
    }

    /// Ask for the sudo password once on the terminal (`sudo -v`), so that
    /// later `sudo -n` calls succeed from the credential cache
    pub async fn refresh_credentials(&self) -> Result<()> {
        let helper = self.runner.locate(ELEVATION_HELPER).ok_or_else(|| {
            ProvisionError::ElevationUnavailable {
                command: format!("{} -v", ELEVATION_HELPER),
                detail: format!("{} not found on PATH", ELEVATION_HELPER),
            }
        })?;
        let helper = helper.to_string_lossy().to_string();
        let args = vec!["-v".to_string()];

        let exit_code = self
            .runner
            .status(&helper, &args)
            .await
            .map_err(|e| ProvisionError::process_spawn(&helper, &args, e))?;

        if exit_code == 0 {
            Ok(())
        } else {
            Err(ProvisionError::process_exit(&helper, &args, exit_code, ""))
        }
    }
}

fn warn_on_stderr(program: &str, args: &[String], output: &CommandOutput) {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        warn!("`{}` wrote to stderr: {}", display_command(program, args), stderr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::{fail, ok, spawn_error, status, FakeRunner};
    use std::io::ErrorKind;

    fn runner(fake: &Arc<FakeRunner>, os: TargetOs, interactive: bool) -> ElevatedRunner {
        ElevatedRunner::new(fake.clone(), PlatformContext::new(os, interactive))
    }

    #[test]
    fn test_permission_signatures() {
        assert!(is_permission_denied("open /etc/ssh/sshd_config: Permission denied"));
        assert!(is_permission_denied("Error: EACCES: permission denied"));
        assert!(is_permission_denied("EPERM: operation not permitted"));
        assert!(!is_permission_denied("No such file or directory"));
    }

    #[test]
    fn test_interaction_signatures() {
        assert!(requires_interaction("sudo: a password is required"));
        assert!(requires_interaction("sudo: a terminal is required to read the password"));
        assert!(requires_interaction("sudo: no tty present and no askpass program specified"));
        assert!(!requires_interaction("sudo: apt-get: command not found"));
    }

    #[tokio::test]
    async fn test_success_runs_once() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("systemctl is-active ssh", ok("active\n"));

        let output = runner(&fake, TargetOs::Linux, false)
            .run("systemctl", &["is-active", "ssh"], &RunOptions::new())
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout, "active\n");
        assert_eq!(fake.calls(), vec!["systemctl is-active ssh"]);
    }

    #[tokio::test]
    async fn test_success_with_stderr_is_not_an_error() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("apt-get", ok_with_stderr("W: some warning"));

        let output = runner(&fake, TargetOs::Linux, false)
            .run("apt-get", &["update"], &RunOptions::new())
            .await
            .unwrap();
        assert_eq!(output.stderr, "W: some warning");
        assert_eq!(fake.calls().len(), 1);
    }

    fn ok_with_stderr(stderr: &str) -> crate::exec::testing::Reply {
        crate::exec::testing::Reply::Output(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: 0,
        })
    }

    #[tokio::test]
    async fn test_permission_denied_retries_non_interactive() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("cp", fail(1, "cp: cannot create regular file: Permission denied"));
        fake.expect("sudo -n cp", ok(""));

        let output = runner(&fake, TargetOs::Linux, true)
            .run("cp", &["/tmp/a", "/etc/ssh/sshd_config"], &RunOptions::new())
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(
            fake.calls(),
            vec![
                "cp /tmp/a /etc/ssh/sshd_config",
                "sudo -n cp /tmp/a /etc/ssh/sshd_config",
            ]
        );
    }

    #[tokio::test]
    async fn test_spawn_permission_error_escalates() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("/usr/sbin/sshd", spawn_error(ErrorKind::PermissionDenied, "EACCES"));
        fake.expect("sudo -n /usr/sbin/sshd", ok(""));

        runner(&fake, TargetOs::Linux, false)
            .run("/usr/sbin/sshd", &["-t"], &RunOptions::new())
            .await
            .unwrap();

        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_windows_never_escalates() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("powershell.exe", fail(1, "Access is denied. Permission denied"));

        let err = runner(&fake, TargetOs::Windows, true)
            .run("powershell.exe", &["-Command", "Start-Service sshd"], &RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProcessExit { exit_code: 1, .. }));
        assert!(err.is_privilege_related());
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_helper_is_elevation_unavailable() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("mv", fail(1, "mv: cannot move: Permission denied"));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("mv", &["-f", "a", "b"], &RunOptions::new())
            .await
            .unwrap_err();

        match err {
            ProvisionError::ElevationUnavailable { command, detail } => {
                assert_eq!(command, "mv -f a b");
                assert!(detail.contains("sudo not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_password_required_without_tty() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("apt-get", fail(100, "E: Could not open lock file - open (13: Permission denied)"));
        fake.expect("sudo -n apt-get", fail(1, "sudo: a password is required"));

        let err = runner(&fake, TargetOs::Linux, false)
            .run("apt-get", &["install", "-y", "openssh-server"], &RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ElevationRequiresInteraction { .. }));
        assert!(err.is_privilege_related());
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_password_required_with_tty_prompts() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("apt-get", fail(100, "Permission denied"));
        fake.expect("sudo -n apt-get", fail(1, "sudo: a password is required"));
        fake.expect("sudo apt-get", status(0));

        let output = runner(&fake, TargetOs::Linux, true)
            .run("apt-get", &["install", "-y", "openssh-server"], &RunOptions::new())
            .await
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.is_empty());
        assert_eq!(
            fake.calls(),
            vec![
                "apt-get install -y openssh-server",
                "sudo -n apt-get install -y openssh-server",
                "status: sudo apt-get install -y openssh-server",
            ]
        );
    }

    #[tokio::test]
    async fn test_interactive_retry_failure() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("apt-get", fail(100, "Permission denied"));
        fake.expect("sudo -n apt-get", fail(1, "sudo: a terminal is required"));
        fake.expect("sudo apt-get", status(1));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("apt-get", &["install"], &RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProcessExit { exit_code: 1, .. }));
    }

    #[tokio::test]
    async fn test_non_interactive_retry_other_failure_propagates() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("install", fail(1, "Permission denied"));
        fake.expect("sudo -n install", fail(1, "install: cannot stat '/tmp/x': No such file"));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("install", &["-m", "0644", "/tmp/x", "/etc/ssh/x"], &RunOptions::new())
            .await
            .unwrap_err();

        match err {
            ProvisionError::ProcessExit { command, stderr, .. } => {
                assert!(command.starts_with("sudo -n install"));
                assert!(stderr.contains("cannot stat"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fake.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_non_permission_failure_is_not_retried() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("systemctl", fail(5, "Unit sshd.service not found."));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("systemctl", &["start", "sshd"], &RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProcessExit { exit_code: 5, .. }));
        assert!(!err.is_privilege_related());
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_spawn_not_found_is_not_retried() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("rc-service", spawn_error(ErrorKind::NotFound, "No such file or directory"));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("rc-service", &["sshd", "start"], &RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProcessSpawn { .. }));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_without_elevation_option() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("cat", fail(1, "cat: /root/x: Permission denied"));

        let err = runner(&fake, TargetOs::Linux, true)
            .run("cat", &["/root/x"], &RunOptions::new().without_elevation())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::ProcessExit { .. }));
        assert_eq!(fake.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_require_root_goes_straight_to_sudo() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("id -u", ok("1000\n"));
        let runner = runner(&fake, TargetOs::Linux, false);

        for action in ["enable", "restart"] {
            runner
                .run("systemctl", &[action, "ssh"], &RunOptions::elevated())
                .await
                .unwrap();
        }

        // the privilege probe runs once and is shared by later calls
        assert_eq!(
            fake.calls(),
            vec![
                "id -u",
                "sudo -n systemctl enable ssh",
                "sudo -n systemctl restart ssh",
            ]
        );
    }

    #[tokio::test]
    async fn test_require_root_runs_directly_when_privileged() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("id -u", ok("0\n"));

        runner(&fake, TargetOs::Linux, false)
            .run("systemctl", &["enable", "sshd"], &RunOptions::elevated())
            .await
            .unwrap();
        assert_eq!(fake.calls(), vec!["id -u", "systemctl enable sshd"]);
    }

    #[tokio::test]
    async fn test_require_root_without_sudo() {
        let fake = Arc::new(FakeRunner::new());

        let err = runner(&fake, TargetOs::Linux, false)
            .with_privileged(false)
            .run("dnf", &["install", "-y", "openssh-server"], &RunOptions::elevated())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ElevationUnavailable { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_require_root_is_ignored_on_windows() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));

        runner(&fake, TargetOs::Windows, true)
            .with_privileged(false)
            .run("powershell.exe", &["-Command", "Restart-Service sshd"], &RunOptions::elevated())
            .await
            .unwrap();
        assert_eq!(fake.calls(), vec!["powershell.exe -Command Restart-Service sshd"]);
    }

    #[tokio::test]
    async fn test_is_privileged_linux() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("id -u", ok("0\n"));
        assert!(runner(&fake, TargetOs::Linux, false).is_privileged().await);

        let fake = Arc::new(FakeRunner::new());
        fake.expect("id -u", ok("1000\n"));
        assert!(!runner(&fake, TargetOs::Linux, false).is_privileged().await);
    }

    #[tokio::test]
    async fn test_is_privileged_never_fails() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("net session", spawn_error(ErrorKind::NotFound, "not found"));
        assert!(!runner(&fake, TargetOs::Windows, false).is_privileged().await);
    }

    #[tokio::test]
    async fn test_has_elevation_access_via_sudo() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("id -u", ok("1000\n"));
        fake.expect("sudo -n true", ok(""));
        assert!(runner(&fake, TargetOs::Linux, false).has_elevation_access().await);
        assert_eq!(fake.calls(), vec!["id -u", "sudo -n true"]);
    }

    #[tokio::test]
    async fn test_has_elevation_access_sudo_needs_password() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        fake.expect("id -u", ok("1000\n"));
        fake.expect("sudo -n true", fail(1, "sudo: a password is required"));
        assert!(!runner(&fake, TargetOs::Linux, true).has_elevation_access().await);
    }

    #[tokio::test]
    async fn test_refresh_credentials_prompts_once() {
        let fake = Arc::new(FakeRunner::new().on_path("sudo"));
        runner(&fake, TargetOs::Linux, true)
            .refresh_credentials()
            .await
            .unwrap();
        assert_eq!(fake.calls(), vec!["status: sudo -v"]);
    }

    #[tokio::test]
    async fn test_has_elevation_access_without_sudo() {
        let fake = Arc::new(FakeRunner::new());
        fake.expect("id -u", ok("1000\n"));
        assert!(!runner(&fake, TargetOs::Linux, false).has_elevation_access().await);
        assert_eq!(fake.calls(), vec!["id -u"]);
    }
}
