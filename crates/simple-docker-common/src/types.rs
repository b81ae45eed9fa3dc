//! Domain primitive types used across the simple-docker workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DockerError, Result};

/// Number of hex characters kept from a generated UUID.
const SHORT_ID_LEN: usize = 12;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random short container ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(SHORT_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks that a container name is usable as a single path component.
///
/// # Errors
///
/// Returns [`DockerError::Config`] for empty names, `.`, `..`, or names
/// containing `/` or NUL.
pub fn validate_container_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(DockerError::Config {
            message: format!("invalid container name: {name:?}"),
        });
    }
    Ok(())
}

/// Resource limits handed to the resource manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU weight (1-10000).
    pub cpu_weight: Option<u64>,
    /// CPUs the container may run on, in cpuset list syntax (`0-1,3`).
    pub cpuset_cpus: Option<String>,
}

impl ResourceLimits {
    /// Returns `true` when no limit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_weight.is_none() && self.cpuset_cpus.is_none()
    }
}

/// Lifecycle status recorded for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The container was stopped from outside.
    Stopped,
    /// The container's process exited on its own.
    Exited,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Metadata record persisted for each container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// PID of the container's init process as seen from the host.
    pub pid: String,
    /// Container identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Command line run inside the container.
    pub command: String,
    /// Creation time, `YYYY-MM-DD HH:MM:SS` local time.
    #[serde(rename = "createTime")]
    pub created_time: String,
    /// Current status.
    pub status: ContainerStatus,
}

impl ContainerInfo {
    /// Creates a `running` record stamped with the current local time.
    #[must_use]
    pub fn running(id: ContainerId, name: impl Into<String>, pid: u32, command: &[String]) -> Self {
        Self {
            pid: pid.to_string(),
            id,
            name: name.into(),
            command: command.join(" "),
            created_time: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: ContainerStatus::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_distinct() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_eq!(a.as_str().len(), SHORT_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn container_name_rules() {
        assert!(validate_container_name("c1").is_ok());
        assert!(validate_container_name("web-1.a").is_ok());
        assert!(validate_container_name("").is_err());
        assert!(validate_container_name("..").is_err());
        assert!(validate_container_name("a/b").is_err());
    }

    #[test]
    fn limits_emptiness() {
        assert!(ResourceLimits::default().is_empty());
        let limits = ResourceLimits {
            cpuset_cpus: Some("0".into()),
            ..ResourceLimits::default()
        };
        assert!(!limits.is_empty());
    }

    #[test]
    fn container_info_uses_wire_field_names() {
        let info = ContainerInfo::running(
            ContainerId::new("0123456789ab"),
            "c1",
            4242,
            &["/bin/sleep".to_string(), "1".to_string()],
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["pid"], "4242");
        assert_eq!(json["command"], "/bin/sleep 1");
        assert_eq!(json["status"], "running");
        assert!(json.get("createTime").is_some());
    }

    #[test]
    fn status_display_matches_serialized_form() {
        for status in [
            ContainerStatus::Running,
            ContainerStatus::Stopped,
            ContainerStatus::Exited,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
