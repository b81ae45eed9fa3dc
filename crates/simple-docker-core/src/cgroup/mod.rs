//! Cgroups v2 resource management.
//!
//! Each container gets its own group under
//! `<cgroup_root>/simple-docker/<name>` in the unified hierarchy. Limits are
//! written to the group's control files and the init process is moved in
//! through `cgroup.procs`.

pub mod cpu;
pub mod memory;

use std::path::{Path, PathBuf};

use simple_docker_common::constants::CGROUP_GROUP_NAME;
use simple_docker_common::error::{DockerError, Result};
use simple_docker_common::types::ResourceLimits;

/// Resource control applied to a running container.
pub trait ResourceManager {
    /// Writes every limit present in `limits`.
    ///
    /// # Errors
    ///
    /// Returns an error if a control file cannot be written.
    fn apply(&self, limits: &ResourceLimits) -> Result<()>;

    /// Moves process `pid` into the group.
    ///
    /// # Errors
    ///
    /// Returns an error if `cgroup.procs` cannot be written.
    fn add_process(&self, pid: u32) -> Result<()>;

    /// Removes the group. Must run after every member has exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the group directory cannot be removed.
    fn release(&self) -> Result<()>;
}

/// Handle to a cgroup for a specific container.
#[derive(Debug)]
pub struct CgroupManager {
    path: PathBuf,
}

impl CgroupManager {
    /// Creates the cgroup for container `name` under `cgroup_root`.
    ///
    /// Controllers are enabled for the parent group on a best-effort basis;
    /// a kernel that refuses them surfaces as a failed limit write later.
    ///
    /// # Errors
    ///
    /// Returns an error if the cgroup directory cannot be created.
    pub fn create(cgroup_root: &Path, name: &str) -> Result<Self> {
        let parent = cgroup_root.join(CGROUP_GROUP_NAME);
        let path = parent.join(name);
        std::fs::create_dir_all(&path).map_err(|e| DockerError::io(&path, e))?;
        enable_controllers(&parent);
        tracing::info!(path = %path.display(), "cgroup created");
        Ok(Self { path })
    }

    /// Path of the group directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResourceManager for CgroupManager {
    fn apply(&self, limits: &ResourceLimits) -> Result<()> {
        if let Some(bytes) = limits.memory_bytes {
            memory::set_memory_max(&self.path, bytes)?;
        }
        if let Some(weight) = limits.cpu_weight {
            cpu::set_cpu_weight(&self.path, weight)?;
        }
        if let Some(cpus) = &limits.cpuset_cpus {
            cpu::set_cpuset_cpus(&self.path, cpus)?;
        }
        Ok(())
    }

    fn add_process(&self, pid: u32) -> Result<()> {
        write_control(&self.path, "cgroup.procs", &pid.to_string())?;
        tracing::debug!(pid, "added process to cgroup");
        Ok(())
    }

    fn release(&self) -> Result<()> {
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(DockerError::io(&self.path, e)),
        }
        tracing::info!(path = %self.path.display(), "cgroup destroyed");
        Ok(())
    }
}

fn enable_controllers(parent: &Path) {
    if let Err(e) = write_control(parent, "cgroup.subtree_control", "+cpu +cpuset +memory") {
        tracing::debug!(error = %e, "controllers not enabled for parent group");
    }
}

/// Writes `value` to the control file `file` of the group at `group`.
pub(crate) fn write_control(group: &Path, file: &str, value: &str) -> Result<()> {
    let path = group.join(file);
    std::fs::write(&path, value).map_err(|e| DockerError::io(&path, e))
}
