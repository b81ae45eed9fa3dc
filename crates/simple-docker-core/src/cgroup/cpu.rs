//! CPU resource control via cgroups v2.
//!
//! Manages `cpu.weight` and `cpuset.cpus`.

use std::path::Path;

use simple_docker_common::error::{DockerError, Result};

/// Sets the CPU weight for a cgroup.
///
/// Weight is a value between 1 and 10000 that controls the relative
/// share of CPU time this cgroup receives under contention.
///
/// # Errors
///
/// Returns an error if the weight is out of range or writing to
/// `cpu.weight` fails.
pub fn set_cpu_weight(cgroup_path: &Path, weight: u64) -> Result<()> {
    if !(1..=10_000).contains(&weight) {
        return Err(DockerError::Config {
            message: format!("cpu weight {weight} is outside 1-10000"),
        });
    }
    super::write_control(cgroup_path, "cpu.weight", &weight.to_string())?;
    tracing::debug!(weight, "CPU weight set");
    Ok(())
}

/// Pins the cgroup to the CPUs in `cpus` (cpuset list syntax, e.g. `0-1,3`).
///
/// # Errors
///
/// Returns an error if writing to `cpuset.cpus` fails.
pub fn set_cpuset_cpus(cgroup_path: &Path, cpus: &str) -> Result<()> {
    super::write_control(cgroup_path, "cpuset.cpus", cpus)?;
    tracing::debug!(cpus, "cpuset set");
    Ok(())
}
