//! `simple-docker run`: Run a command in a new container.

use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use simple_docker_common::config::{MountPolicy, RuntimeConfig};
use simple_docker_common::types::ResourceLimits;
use simple_docker_core::cgroup::memory::parse_memory_size;
use simple_docker_runtime::supervisor::{RunRequest, Supervisor};

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the container to this terminal.
    #[arg(short = 't', long = "tty", conflicts_with = "detach")]
    pub tty: bool,

    /// Send the container's output to its log file instead of the terminal.
    ///
    /// This is also what happens when `-t` is not given. The supervisor
    /// waits for the container either way, so teardown always runs.
    #[arg(short, long)]
    pub detach: bool,

    /// Bind-mount a host directory: `<host-path>:<container-path>`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Container name (defaults to the generated ID).
    #[arg(long)]
    pub name: Option<String>,

    /// Memory limit, e.g. `100m` or `1g`.
    #[arg(short, long, value_parser = parse_memory)]
    pub memory: Option<u64>,

    /// Relative CPU weight (1-10000).
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub cpu_weight: Option<u64>,

    /// CPUs the container may use, e.g. `0-1,3`.
    #[arg(long)]
    pub cpuset: Option<String>,

    /// Whether a failed `/proc` or `/dev` mount aborts the container.
    #[arg(long, default_value_t = MountPolicy::Strict)]
    pub mount_policy: MountPolicy,

    /// Seconds the container waits for its command before giving up.
    #[arg(long, value_parser = super::parse_seconds)]
    pub handoff_timeout: Option<Duration>,

    /// Command and arguments to run.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    /// Whether the container shares this terminal.
    const fn interactive(&self) -> bool {
        self.tty && !self.detach
    }

    fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            memory_bytes: self.memory,
            cpu_weight: self.cpu_weight,
            cpuset_cpus: self.cpuset.clone(),
        }
    }
}

/// Executes the `run` command.
///
/// Blocks until the container exits and returns its exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be launched.
pub fn execute(args: RunArgs, mut config: RuntimeConfig) -> anyhow::Result<ExitCode> {
    config.mount_policy = args.mount_policy;
    config.handoff_timeout = args.handoff_timeout;

    ctrlc::set_handler(|| {
        tracing::warn!("interrupt received, waiting for the container to exit");
    })
    .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;

    let tty = args.interactive();
    let limits = args.limits();
    if let Some(bytes) = limits.memory_bytes {
        tracing::info!(memory = %output::format_bytes(bytes), "memory limit requested");
    }

    let supervisor = Supervisor::new(config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let outcome = supervisor
        .run(RunRequest {
            tty,
            command: args.command,
            volume: args.volume,
            name: args.name,
            limits,
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if !tty {
        eprintln!(
            "container {} ({}) exited with code {}",
            outcome.name, outcome.id, outcome.exit_code
        );
    }
    Ok(output::exit_code(outcome.exit_code))
}

fn parse_memory(value: &str) -> Result<u64, String> {
    parse_memory_size(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use crate::commands::{Cli, Command};

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("simple-docker").chain(args.iter().copied()))
    }

    #[test]
    fn tty_and_detach_conflict() {
        assert!(parse(&["run", "-t", "-d", "--", "sh"]).is_err());
    }

    #[test]
    fn command_keeps_its_own_flags() {
        let cli = parse(&["run", "-d", "--name", "c1", "sh", "-c", "ls -l"]).expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.detach);
        assert_eq!(args.name.as_deref(), Some("c1"));
        assert_eq!(args.command, vec!["sh", "-c", "ls -l"]);
    }

    #[test]
    fn limits_are_parsed() {
        let cli = parse(&["run", "-m", "100m", "--cpu-weight", "50", "--cpuset", "0", "top"])
            .expect("parse");
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        let limits = args.limits();
        assert_eq!(limits.memory_bytes, Some(100 * 1024 * 1024));
        assert_eq!(limits.cpu_weight, Some(50));
        assert_eq!(limits.cpuset_cpus.as_deref(), Some("0"));
    }

    #[test]
    fn bad_limits_are_rejected() {
        assert!(parse(&["run", "-m", "lots", "top"]).is_err());
        assert!(parse(&["run", "--cpu-weight", "0", "top"]).is_err());
    }

    #[test]
    fn detach_and_default_both_log_to_file() {
        for argv in [&["run", "-d", "sh"][..], &["run", "sh"][..]] {
            let Command::Run(args) = parse(argv).expect("parse").command else {
                panic!("expected run");
            };
            assert!(!args.interactive(), "{argv:?}");
        }
        let Command::Run(args) = parse(&["run", "-t", "sh"]).expect("parse").command else {
            panic!("expected run");
        };
        assert!(args.interactive());
    }

    #[test]
    fn command_is_required() {
        assert!(parse(&["run", "-t"]).is_err());
    }
}
