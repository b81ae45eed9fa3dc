//! Default paths and fixed names.
//!
//! These are only defaults: every component reads paths from a
//! [`RuntimeConfig`](crate::config::RuntimeConfig) built once at startup.

/// Default root storage directory holding the base archive and layers.
pub const DEFAULT_ROOT_DIR: &str = "/root";

/// Default directory holding one info directory per container.
pub const DEFAULT_INFO_DIR: &str = "/var/run/simple-docker";

/// Cgroups v2 unified hierarchy mount point.
pub const CGROUP_V2_PATH: &str = "/sys/fs/cgroup";

/// File name of the base-layer archive under the root directory.
pub const BASE_ARCHIVE_NAME: &str = "busybox.tar";

/// Directory name of the extracted base layer under the root directory.
pub const BASE_LAYER_NAME: &str = "busybox";

/// Directory under the root holding one writable layer per container.
pub const WRITE_LAYER_NAME: &str = "writeLayer";

/// Directory under the root holding one overlay work directory per container.
pub const WORK_LAYER_NAME: &str = "workLayer";

/// Directory under the root holding one merge point per container.
pub const MERGE_DIR_NAME: &str = "mnt";

/// Metadata file inside a container's info directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Detached-mode output file inside a container's info directory.
pub const CONTAINER_LOG_FILE: &str = "container.log";

/// Transient directory created inside the new root to receive the old root.
pub const PIVOT_DIR_NAME: &str = ".pivot_root";

/// Verb that routes an invocation of the binary into the in-namespace bootstrap.
pub const INIT_VERB: &str = "init";

/// File descriptor number the handoff read end is installed at in the child.
pub const HANDOFF_FD: i32 = 3;

/// Cgroup directory grouping all containers under the cgroup root.
pub const CGROUP_GROUP_NAME: &str = "simple-docker";
