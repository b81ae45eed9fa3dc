//! Container log management.
//!
//! Detached containers write stdout and stderr to `container.log` in their
//! info directory.

use std::path::PathBuf;

use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::error::{DockerError, Result};

/// Returns the log file path for a container.
#[must_use]
pub fn log_path(config: &RuntimeConfig, name: &str) -> PathBuf {
    config.container_log_path(name)
}

/// Reads a container's log.
///
/// Returns an empty string if the container exists but has not logged
/// anything, as with interactive containers.
///
/// # Errors
///
/// Returns [`DockerError::NotFound`] if the container is unknown, or an
/// error if the log exists but cannot be read.
pub fn read_logs(config: &RuntimeConfig, name: &str) -> Result<String> {
    if !config.container_info_dir(name).is_dir() {
        return Err(DockerError::NotFound {
            kind: "container",
            id: name.to_string(),
        });
    }
    let path = log_path(config, name);
    if !path.exists() {
        return Ok(String::new());
    }
    std::fs::read_to_string(&path).map_err(|e| DockerError::io(path, e))
}
