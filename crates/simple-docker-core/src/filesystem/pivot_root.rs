//! Secure root filesystem switching via `pivot_root(2)`.
//!
//! More secure than `chroot` because it actually changes the root mount
//! rather than just the process's view of `/`, and the old root can be
//! detached entirely afterward.

use std::path::Path;

use simple_docker_common::error::Result;

/// Makes `new_root` the root filesystem of the calling mount namespace.
///
/// Sequence:
/// 1. bind-mount `new_root` onto itself (recursively) so it is a mount point
///    distinct from its parent, which `pivot_root(2)` requires;
/// 2. create `new_root/.pivot_root` to receive the old root;
/// 3. `pivot_root(new_root, new_root/.pivot_root)`;
/// 4. `chdir("/")`;
/// 5. detach the old root and remove the transient directory.
///
/// # Errors
///
/// Returns an error if any step fails. The caller must treat this as fatal:
/// the process is left with an unknown root.
#[cfg(target_os = "linux")]
pub fn pivot_root(new_root: &Path) -> Result<()> {
    use nix::mount::{MntFlags, MsFlags, mount, umount2};
    use nix::unistd::chdir;
    use simple_docker_common::constants::PIVOT_DIR_NAME;
    use simple_docker_common::error::DockerError;

    tracing::info!(new_root = %new_root.display(), "performing pivot_root");

    mount(
        Some(new_root),
        new_root,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| DockerError::Mount {
        target: new_root.to_path_buf(),
        message: format!("bind mount of new root onto itself failed: {e}"),
    })?;

    let put_old = new_root.join(PIVOT_DIR_NAME);
    std::fs::create_dir_all(&put_old).map_err(|e| DockerError::io(&put_old, e))?;

    nix::unistd::pivot_root(new_root, &put_old).map_err(|e| DockerError::Mount {
        target: new_root.to_path_buf(),
        message: format!("pivot_root failed: {e}"),
    })?;

    chdir("/").map_err(|e| DockerError::io("/", e.into()))?;

    let old_root = Path::new("/").join(PIVOT_DIR_NAME);
    umount2(&old_root, MntFlags::MNT_DETACH).map_err(|e| DockerError::Mount {
        target: old_root.clone(),
        message: format!("detaching old root failed: {e}"),
    })?;
    std::fs::remove_dir(&old_root).map_err(|e| DockerError::io(&old_root, e))?;

    tracing::debug!("old root detached");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `pivot_root(2)` requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn pivot_root(_new_root: &Path) -> Result<()> {
    Err(simple_docker_common::error::DockerError::Config {
        message: "Linux required for native container operations".into(),
    })
}
