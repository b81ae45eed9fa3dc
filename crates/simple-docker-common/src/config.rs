//! Runtime configuration record.
//!
//! Built once when the process starts and passed by reference into every
//! component that needs a path or policy, so nothing reads global state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::DockerError;

/// How the bootstrap reacts when mounting `/proc` or `/dev` fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountPolicy {
    /// A failed pseudo-filesystem mount aborts the bootstrap.
    #[default]
    Strict,
    /// A failed pseudo-filesystem mount is logged and the container proceeds.
    BestEffort,
}

impl fmt::Display for MountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::BestEffort => write!(f, "best-effort"),
        }
    }
}

impl FromStr for MountPolicy {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "best-effort" => Ok(Self::BestEffort),
            other => Err(DockerError::Config {
                message: format!("unknown mount policy: {other} (expected strict or best-effort)"),
            }),
        }
    }
}

/// Root configuration for the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Root storage directory holding the base archive and all layers.
    pub root_dir: PathBuf,
    /// Directory holding one info directory (metadata + log) per container.
    pub info_dir: PathBuf,
    /// Cgroups v2 mount point.
    pub cgroup_root: PathBuf,
    /// Base-layer archive file name under `root_dir`.
    pub base_archive: String,
    /// Extracted base-layer directory name under `root_dir`.
    pub base_layer: String,
    /// Write-layer parent directory name under `root_dir`.
    pub write_layer: String,
    /// Overlay work parent directory name under `root_dir`.
    pub work_layer: String,
    /// Merge-point parent directory name under `root_dir`.
    pub merge_dir: String,
    /// Failure policy for `/proc` and `/dev` mounts inside the container.
    pub mount_policy: MountPolicy,
    /// Upper bound on how long the bootstrap waits for the command.
    ///
    /// `None` waits indefinitely.
    pub handoff_timeout: Option<Duration>,
}

impl RuntimeConfig {
    /// Creates a configuration with default names rooted at `root_dir`.
    #[must_use]
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the base-layer archive.
    #[must_use]
    pub fn base_archive_path(&self) -> PathBuf {
        self.root_dir.join(&self.base_archive)
    }

    /// Path of the shared, read-only base layer.
    #[must_use]
    pub fn base_layer_path(&self) -> PathBuf {
        self.root_dir.join(&self.base_layer)
    }

    /// Path of the info directory for the named container.
    #[must_use]
    pub fn container_info_dir(&self, name: &str) -> PathBuf {
        self.info_dir.join(name)
    }

    /// Path of the detached-mode log file for the named container.
    #[must_use]
    pub fn container_log_path(&self, name: &str) -> PathBuf {
        self.container_info_dir(name)
            .join(constants::CONTAINER_LOG_FILE)
    }

    /// Path of the metadata file for the named container.
    #[must_use]
    pub fn container_config_path(&self, name: &str) -> PathBuf {
        self.container_info_dir(name).join(constants::CONFIG_FILE_NAME)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(constants::DEFAULT_ROOT_DIR),
            info_dir: PathBuf::from(constants::DEFAULT_INFO_DIR),
            cgroup_root: PathBuf::from(constants::CGROUP_V2_PATH),
            base_archive: constants::BASE_ARCHIVE_NAME.to_string(),
            base_layer: constants::BASE_LAYER_NAME.to_string(),
            write_layer: constants::WRITE_LAYER_NAME.to_string(),
            work_layer: constants::WORK_LAYER_NAME.to_string(),
            merge_dir: constants::MERGE_DIR_NAME.to_string(),
            mount_policy: MountPolicy::default(),
            handoff_timeout: None,
        }
    }
}
