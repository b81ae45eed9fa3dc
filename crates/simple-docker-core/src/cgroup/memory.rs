//! Memory resource control via cgroups v2.

use std::path::Path;

use simple_docker_common::error::Result;

/// Sets the hard memory limit (`memory.max`) for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    super::write_control(cgroup_path, "memory.max", &bytes.to_string())?;
    tracing::debug!(bytes, "memory max set");
    Ok(())
}

/// Parses a memory size such as `100m`, `1g`, `512k` or a plain byte count.
///
/// # Errors
///
/// Returns [`simple_docker_common::error::DockerError::Config`] if the
/// value is not a positive size.
pub fn parse_memory_size(value: &str) -> Result<u64> {
    use simple_docker_common::error::DockerError;

    let invalid = || DockerError::Config {
        message: format!("invalid memory size: {value}"),
    };
    let trimmed = value.trim().to_ascii_lowercase();
    let trimmed = trimmed.strip_suffix('b').unwrap_or(&trimmed);
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let amount: u64 = digits.parse().map_err(|_| invalid())?;
    amount
        .checked_mul(multiplier)
        .filter(|bytes| *bytes > 0)
        .ok_or_else(invalid)
}
