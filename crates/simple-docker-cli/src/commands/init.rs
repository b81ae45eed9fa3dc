//! `simple-docker init`: First code run inside a new container.
//!
//! Invoked by the supervisor, never by users. With no arguments the command
//! is read from the inherited handoff pipe; with arguments they are the
//! command.

use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use simple_docker_common::config::MountPolicy;
use simple_docker_common::constants::HANDOFF_FD;
use simple_docker_core::bootstrap::{Bootstrap, BootstrapOptions, CommandSource};
use simple_docker_core::handoff::HandoffReceiver;

/// Arguments for the `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Whether a failed `/proc` or `/dev` mount is fatal.
    #[arg(long, default_value_t = MountPolicy::Strict)]
    pub mount_policy: MountPolicy,

    /// Seconds to wait for the command on the handoff pipe.
    #[arg(long, value_parser = super::parse_seconds)]
    pub handoff_timeout: Option<Duration>,

    /// Command to run instead of reading the handoff pipe.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

/// Executes the `init` command.
///
/// Only returns on failure; success replaces this process.
///
/// # Errors
///
/// Returns the failed bootstrap stage and its cause.
#[allow(unsafe_code)]
pub fn execute(args: InitArgs) -> anyhow::Result<ExitCode> {
    tracing::info!(pid = std::process::id(), "bootstrapping container init");
    let source = if args.command.is_empty() {
        // SAFETY: the launcher installs the handoff read end at HANDOFF_FD
        // and nothing else in this process refers to it.
        let receiver = unsafe { HandoffReceiver::from_inherited(HANDOFF_FD) }
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        CommandSource::Handoff(receiver)
    } else {
        CommandSource::Arguments(args.command)
    };
    let options = BootstrapOptions {
        mount_policy: args.mount_policy,
        handoff_timeout: args.handoff_timeout,
    };

    let Err(e) = Bootstrap::new(source, options).run();
    Err(e.into())
}
