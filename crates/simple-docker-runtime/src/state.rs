//! Persistent container metadata.
//!
//! Each container has a `config.json` in its info directory holding a
//! [`ContainerInfo`]. There is no daemon: `ps` and `logs` read these files.

use std::path::Path;

use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::constants::CONFIG_FILE_NAME;
use simple_docker_common::error::{DockerError, Result};
use simple_docker_common::types::{ContainerInfo, ContainerStatus};

/// Persists `info` as the container's `config.json`, replacing any previous
/// record atomically.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn record(config: &RuntimeConfig, info: &ContainerInfo) -> Result<()> {
    let dir = config.container_info_dir(&info.name);
    std::fs::create_dir_all(&dir).map_err(|e| DockerError::io(&dir, e))?;
    let path = config.container_config_path(&info.name);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(info)?;
    std::fs::write(&tmp, json).map_err(|e| DockerError::io(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| DockerError::io(&path, e))?;
    tracing::debug!(path = %path.display(), status = %info.status, "container info recorded");
    Ok(())
}

/// Loads the record of container `name`.
///
/// # Errors
///
/// Returns [`DockerError::NotFound`] if no record exists, or an error if it
/// cannot be read or parsed.
pub fn load(config: &RuntimeConfig, name: &str) -> Result<ContainerInfo> {
    let path = config.container_config_path(name);
    if !path.exists() {
        return Err(DockerError::NotFound {
            kind: "container",
            id: name.to_string(),
        });
    }
    read_info(&path)
}

/// Lists every recorded container, oldest first.
///
/// Unreadable records are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the info directory exists but cannot be listed.
pub fn list(config: &RuntimeConfig) -> Result<Vec<ContainerInfo>> {
    let entries = match std::fs::read_dir(&config.info_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(DockerError::io(&config.info_dir, e)),
    };

    let mut containers = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| DockerError::io(&config.info_dir, e))?;
        let path = entry.path().join(CONFIG_FILE_NAME);
        if !path.is_file() {
            continue;
        }
        match read_info(&path) {
            Ok(info) => containers.push(info),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping container record"),
        }
    }
    containers.sort_by(|a, b| {
        a.created_time
            .cmp(&b.created_time)
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(containers)
}

/// Sets the status of container `name`.
///
/// # Errors
///
/// Returns an error if the record cannot be loaded or rewritten.
pub fn update_status(config: &RuntimeConfig, name: &str, status: ContainerStatus) -> Result<()> {
    let mut info = load(config, name)?;
    info.status = status;
    record(config, &info)
}

/// Deletes the info directory of container `name`, log included.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be removed.
pub fn remove(config: &RuntimeConfig, name: &str) -> Result<()> {
    let dir = config.container_info_dir(name);
    match std::fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(DockerError::io(&dir, e)),
    }
    tracing::debug!(path = %dir.display(), "container info removed");
    Ok(())
}

fn read_info(path: &Path) -> Result<ContainerInfo> {
    let content = std::fs::read_to_string(path).map_err(|e| DockerError::io(path, e))?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use simple_docker_common::types::ContainerId;

    use super::*;

    fn config(dir: &Path) -> RuntimeConfig {
        RuntimeConfig {
            info_dir: dir.join("info"),
            ..RuntimeConfig::with_root(dir)
        }
    }

    fn info(name: &str, created: &str) -> ContainerInfo {
        ContainerInfo {
            created_time: created.into(),
            ..ContainerInfo::running(
                ContainerId::new(format!("{name}-id")),
                name,
                100,
                &["top".to_string()],
            )
        }
    }

    #[test]
    fn record_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let c1 = info("c1", "2024-01-01 10:00:00");
        record(&config, &c1).expect("record");

        assert_eq!(load(&config, "c1").expect("load"), c1);
        assert!(!config.container_info_dir("c1").join("config.json.tmp").exists());
    }

    #[test]
    fn load_unknown_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load(&config(dir.path()), "ghost").unwrap_err();
        assert!(matches!(err, DockerError::NotFound { kind: "container", .. }));
    }

    #[test]
    fn list_is_empty_without_info_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(list(&config(dir.path())).expect("list").is_empty());
    }

    #[test]
    fn list_orders_by_creation_and_skips_garbage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        record(&config, &info("late", "2024-01-02 00:00:00")).expect("record");
        record(&config, &info("early", "2024-01-01 00:00:00")).expect("record");
        let broken = config.container_info_dir("broken");
        std::fs::create_dir_all(&broken).expect("mkdir");
        std::fs::write(broken.join("config.json"), "{not json").expect("write");
        std::fs::create_dir_all(config.container_info_dir("logs-only")).expect("mkdir");

        let names: Vec<_> = list(&config)
            .expect("list")
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn update_status_rewrites_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        record(&config, &info("c1", "2024-01-01 10:00:00")).expect("record");
        update_status(&config, "c1", ContainerStatus::Exited).expect("update");
        assert_eq!(load(&config, "c1").expect("load").status, ContainerStatus::Exited);
    }

    #[test]
    fn remove_deletes_info_dir_and_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        record(&config, &info("c1", "2024-01-01 10:00:00")).expect("record");
        remove(&config, "c1").expect("remove");
        assert!(!config.container_info_dir("c1").exists());
        remove(&config, "c1").expect("second remove");
    }
}
