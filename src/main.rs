//! ssh-provision - Entry point
//!
//! Parses CLI arguments, builds the plan for this host, runs the provisioning
//! stages and reports the outcome. Logs go to stderr; stdout carries the
//! report (plain text or JSON).

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ssh_provision::config::{Args, Config, Mode};
use ssh_provision::exec::elevation::ELEVATION_HELPER;
use ssh_provision::orchestrator::{self, ProvisionBackend, SystemBackend};
use ssh_provision::report;
use ssh_provision::{ElevatedRunner, PlatformContext, Plan, ProvisionError, TargetOs, TokioCommandRunner};

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing/logging to stderr (stdout is for the report)
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let json = args.json;
    let dry_run = args.dry_run;

    // Validate and create config
    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            emit_failure(&e, json);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let platform = match PlatformContext::detect() {
        Ok(platform) => platform,
        Err(e) => {
            error!("{}", e);
            emit_failure(&e, json);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    info!("ssh-provision v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Target: {} (port {}, users: {})",
        platform.os,
        config.port,
        config.users().join(" ")
    );

    let runner = ElevatedRunner::new(Arc::new(TokioCommandRunner::new()), platform);
    let backend = SystemBackend::new(runner);
    let plan = Plan::detect(&backend, platform.os).await;

    if dry_run {
        if json {
            println!("{}", report::plan_json(&plan));
        } else {
            print!("{}", report::plan_summary(&plan, &config));
        }
        return ExitCode::SUCCESS;
    }

    if let Err(e) = prepare_elevation(&backend, &config, platform).await {
        error!("{}", e);
        emit_failure(&e, json);
        return ExitCode::from(EXIT_FAILURE);
    }

    let outcome = tokio::select! {
        outcome = orchestrator::execute(&plan, &config, &backend) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Received SIGINT (Ctrl+C), stopping; the host may be partially provisioned");
            return ExitCode::from(EXIT_INTERRUPTED);
        }
    };

    match outcome {
        Ok(result) => {
            if json {
                println!("{}", report::success_json(&plan, &result));
            } else {
                print!("{}", report::success_summary(&result, &config));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            emit_failure(&e, json);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// On an interactive Linux terminal without cached sudo credentials, prompt
/// for the password once up front so every later `sudo -n` succeeds.
async fn prepare_elevation(
    backend: &SystemBackend,
    config: &Config,
    platform: PlatformContext,
) -> Result<(), ProvisionError> {
    if platform.os != TargetOs::Linux || !platform.interactive || config.mode == Mode::Root {
        return Ok(());
    }
    if backend.has_elevation_access().await {
        return Ok(());
    }
    if backend.runner().locate(ELEVATION_HELPER).is_none() {
        return Ok(());
    }

    info!("Elevated privileges are needed; {} may ask for your password", ELEVATION_HELPER);
    backend.runner().refresh_credentials().await
}

fn emit_failure(err: &ProvisionError, json: bool) {
    if json {
        println!("{}", report::failure_json(err));
    } else {
        eprint!("{}", report::failure_summary(err));
    }
}
