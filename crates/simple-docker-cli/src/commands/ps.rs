//! `simple-docker ps`: List recorded containers.

use simple_docker_common::config::RuntimeConfig;
use simple_docker_runtime::state;

use crate::output;

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the info directory cannot be listed.
pub fn execute(config: &RuntimeConfig) -> anyhow::Result<()> {
    let containers = state::list(config).map_err(|e| anyhow::anyhow!("{e}"))?;
    print!("{}", output::container_table(&containers));
    Ok(())
}
