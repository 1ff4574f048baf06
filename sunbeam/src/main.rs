//! Sunbeam CLI
//!
//! Inspects Juju model status and waits for applications, units and
//! machines to converge, using the `juju` client as the control plane.

#![forbid(unsafe_code)]

mod commands;
mod logging;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use sunbeam_common::{ConfigError, JujuError, SunbeamConfig};
use tracing::debug;

use logging::{LogOptions, init_logging};

#[derive(Parser)]
#[command(name = "sunbeam")]
#[command(author, version, about = "Sunbeam - Juju status and convergence waits")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, env = "SUNBEAM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Options shared by every wait command.
#[derive(Args, Debug, Clone)]
struct WaitOptions {
    /// Overall wait budget, e.g. `10m` (configured default when unset)
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print wait events as JSON lines on stdout
    #[arg(long)]
    events: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarise application status of a model
    Status {
        #[arg(short, long)]
        model: String,

        /// Restrict to these applications
        #[arg(short, long = "app")]
        apps: Vec<String>,

        /// Print the full snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Wait for applications to reach a desired status
    Wait {
        #[arg(short, long)]
        model: String,

        #[arg(short, long = "app", required = true)]
        apps: Vec<String>,

        /// Restrict the check to these units
        #[arg(short, long = "unit")]
        units: Vec<String>,

        /// Accepted workload statuses (default: active)
        #[arg(long = "status")]
        statuses: Vec<String>,

        /// Accepted agent statuses
        #[arg(long = "agent-status")]
        agent_statuses: Vec<String>,

        /// Accepted workload messages
        #[arg(long = "message")]
        messages: Vec<String>,

        #[command(flatten)]
        wait: WaitOptions,
    },

    /// Wait for applications, or the whole model, to be active
    WaitActive {
        #[arg(short, long)]
        model: String,

        #[arg(short, long = "app")]
        apps: Vec<String>,

        #[command(flatten)]
        wait: WaitOptions,
    },

    /// Wait for units to be idle and active
    WaitUnits {
        #[arg(short, long)]
        model: String,

        #[arg(short, long = "unit", required = true)]
        units: Vec<String>,

        /// Accepted workload statuses (default: active)
        #[arg(long = "workload")]
        workload: Vec<String>,

        /// Accepted agent statuses (default: idle)
        #[arg(long = "agent")]
        agent: Vec<String>,

        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Wait for applications or units to be removed
    WaitGone {
        #[arg(short, long)]
        model: String,

        #[arg(short, long = "app", conflicts_with = "units", required_unless_present = "units")]
        apps: Vec<String>,

        #[arg(short, long = "unit")]
        units: Vec<String>,

        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Wait for every machine of a model to be deployed
    WaitMachines {
        #[arg(short, long)]
        model: String,

        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_error(&err, verbose);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let loaded = SunbeamConfig::load(cli.config.as_deref())?;
    let _logging = init_logging(&LogOptions {
        level: loaded.config.log.level.clone(),
        verbose: cli.verbose,
        json: cli.log_json,
        file: cli.log_file.clone(),
    })?;
    match &loaded.path {
        Some(path) => debug!("Loaded configuration from {}", path.display()),
        None => debug!("Using default configuration"),
    }
    if !loaded.env_overrides.is_empty() {
        debug!("Environment overrides: {}", loaded.env_overrides.join(", "));
    }

    let events = match &cli.command {
        Commands::Wait { wait, .. } | Commands::WaitActive { wait, .. } => wait.events,
        _ => false,
    };
    let context = commands::Context::new(&loaded.config, events);
    let outcome = match cli.command {
        Commands::Status { model, apps, json } => {
            commands::status::run(&context, &model, &apps, json).await
        }
        Commands::Wait {
            model,
            apps,
            units,
            statuses,
            agent_statuses,
            messages,
            wait,
        } => {
            let request = commands::wait::WaitRequest {
                apps,
                units,
                statuses,
                agent_statuses,
                messages,
                timeout: wait.timeout,
            };
            commands::wait::desired(&context, &model, request).await
        }
        Commands::WaitActive { model, apps, wait } => {
            commands::wait::active(&context, &model, apps, wait.timeout).await
        }
        Commands::WaitUnits {
            model,
            units,
            workload,
            agent,
            timeout,
        } => commands::wait::units(&context, &model, &units, &workload, &agent, timeout).await,
        Commands::WaitGone {
            model,
            apps,
            units,
            timeout,
        } => commands::wait::gone(&context, &model, &apps, &units, timeout).await,
        Commands::WaitMachines { model, timeout } => {
            commands::wait::machines(&context, &model, timeout).await
        }
    };
    context.close().await;
    outcome
}

fn report_error(err: &anyhow::Error, verbose: bool) {
    let entry = if let Some(juju) = err.downcast_ref::<JujuError>() {
        Some(juju.code().entry())
    } else {
        err.downcast_ref::<ConfigError>()
            .map(|config| config.code().entry())
    };
    match entry {
        Some(entry) => {
            eprintln!("{} [{}] {}", "error:".red().bold(), entry.code, err);
            if verbose {
                eprintln!();
                eprint!("{}", commands::helpers::indent_lines(&entry.format_full(), "  "));
                eprintln!();
            }
        }
        None => eprintln!("{} {:#}", "error:".red().bold(), err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_wait_parses_repeated_flags_and_duration() {
        let cli = Cli::try_parse_from([
            "sunbeam", "wait", "-m", "openstack", "--app", "cinder", "--app", "cinder-ceph",
            "--status", "active", "--status", "blocked", "--timeout", "90s", "--events",
        ])
        .unwrap();
        match cli.command {
            Commands::Wait {
                model,
                apps,
                statuses,
                wait,
                ..
            } => {
                assert_eq!(model, "openstack");
                assert_eq!(apps, vec!["cinder", "cinder-ceph"]);
                assert_eq!(statuses, vec!["active", "blocked"]);
                assert_eq!(wait.timeout, Some(Duration::from_secs(90)));
                assert!(wait.events);
            }
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn test_wait_gone_needs_apps_or_units() {
        assert!(Cli::try_parse_from(["sunbeam", "wait-gone", "-m", "openstack"]).is_err());
        assert!(
            Cli::try_parse_from(["sunbeam", "wait-gone", "-m", "m", "--app", "a", "--unit", "a/0"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["sunbeam", "wait-gone", "-m", "m", "--unit", "a/0"]).is_ok());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sunbeam", "status", "-m", "openstack", "-v", "--log-json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.log_json);
    }

    #[test]
    fn test_bad_timeout_is_rejected() {
        assert!(
            Cli::try_parse_from(["sunbeam", "wait-machines", "-m", "m", "--timeout", "soon"])
                .is_err()
        );
    }
}
