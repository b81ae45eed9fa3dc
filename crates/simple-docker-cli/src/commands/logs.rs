//! `simple-docker logs`: View a detached container's output.

use clap::Args;
use simple_docker_common::config::RuntimeConfig;
use simple_docker_runtime::logs;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is not found or its log is unreadable.
pub fn execute(args: &LogsArgs, config: &RuntimeConfig) -> anyhow::Result<()> {
    let content = logs::read_logs(config, &args.container).map_err(|e| anyhow::anyhow!("{e}"))?;

    if content.is_empty() {
        println!("No logs available for container: {}", args.container);
    } else {
        print!("{content}");
    }

    Ok(())
}
