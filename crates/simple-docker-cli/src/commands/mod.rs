//! CLI command definitions and dispatch.

pub mod init;
pub mod logs;
pub mod ps;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::constants::{CGROUP_V2_PATH, DEFAULT_INFO_DIR, DEFAULT_ROOT_DIR};

/// simple-docker: a minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "simple-docker", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Root storage directory holding the base archive and all layers.
    #[arg(long, global = true, env = "SIMPLE_DOCKER_ROOT", default_value = DEFAULT_ROOT_DIR)]
    pub root: PathBuf,

    /// Directory holding per-container metadata and logs.
    #[arg(long, global = true, env = "SIMPLE_DOCKER_INFO_DIR", default_value = DEFAULT_INFO_DIR)]
    pub info_dir: PathBuf,

    /// Cgroups v2 mount point.
    #[arg(long, global = true, env = "SIMPLE_DOCKER_CGROUP_ROOT", default_value = CGROUP_V2_PATH)]
    pub cgroup_root: PathBuf,
}

impl Cli {
    /// Builds the runtime configuration from the global flags.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            info_dir: self.info_dir.clone(),
            cgroup_root: self.cgroup_root.clone(),
            ..RuntimeConfig::with_root(&self.root)
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container.
    Run(run::RunArgs),
    /// Bootstrap a container from the inside (not for direct use).
    #[command(hide = true)]
    Init(init::InitArgs),
    /// List recorded containers.
    Ps,
    /// View a detached container's output.
    Logs(logs::LogsArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.runtime_config();
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Init(args) => init::execute(args),
        Command::Ps => ps::execute(&config).map(|()| ExitCode::SUCCESS),
        Command::Logs(args) => logs::execute(&args, &config).map(|()| ExitCode::SUCCESS),
    }
}

/// Parses a duration given in (possibly fractional) seconds.
pub(crate) fn parse_seconds(value: &str) -> Result<Duration, String> {
    let seconds: f64 = value
        .parse()
        .map_err(|_| format!("not a number of seconds: {value}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration {value}: {e}"))
}
