//! Mount utilities for container filesystem setup.
//!
//! Host-side mounts (overlay, volume binds, unmounts) go through the
//! [`Mounter`] trait so the workspace logic can be exercised without
//! privileges. In-namespace mounts (`/proc`, `/dev`, propagation) are plain
//! functions called by the bootstrap.

use std::path::{Path, PathBuf};

use simple_docker_common::error::Result;

use super::overlayfs::OverlayConfig;

/// Host mount operations used by the workspace manager.
pub trait Mounter {
    /// Mounts the overlay described by `overlay` at its merged directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_overlay(&self, overlay: &OverlayConfig) -> Result<()>;

    /// Bind-mounts `source` onto `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()>;

    /// Detaches the mount at `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the unmount fails.
    fn unmount(&self, target: &Path) -> Result<()>;

    /// Returns `true` if something is mounted exactly at `target`.
    fn is_mounted(&self, target: &Path) -> bool;
}

/// [`Mounter`] that issues real `mount(2)` / `umount2(2)` syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn mount_overlay(&self, overlay: &OverlayConfig) -> Result<()> {
        super::overlayfs::mount_overlay(overlay)
    }

    fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
        bind_mount(source, target)
    }

    fn unmount(&self, target: &Path) -> Result<()> {
        unmount(target)
    }

    fn is_mounted(&self, target: &Path) -> bool {
        let target = std::fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
        match std::fs::read_to_string(MOUNTINFO_PATH) {
            Ok(table) => mount_points(&table).any(|p| p == target),
            Err(e) => {
                tracing::warn!(error = %e, "cannot read mount table");
                false
            }
        }
    }
}

/// Mount table of the calling process.
const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Iterates the mount points listed in a `mountinfo` table.
///
/// The fifth field of each line is the mount point, with space, tab,
/// newline and backslash octal-escaped.
fn mount_points(table: &str) -> impl Iterator<Item = PathBuf> + '_ {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escape = bytes.get(i + 1..i + 4).filter(|digits| {
            bytes[i] == b'\\' && digits.iter().all(|b| (b'0'..=b'7').contains(b))
        });
        if let Some(digits) = escape {
            let value = digits
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Creates a recursive bind mount from `source` to `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use simple_docker_common::error::DockerError;

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| DockerError::Mount {
        target: target.to_path_buf(),
        message: format!("bind mount of {} failed: {e}", source.display()),
    })?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Lazily detaches the filesystem mounted at `target` (`MNT_DETACH`).
///
/// # Errors
///
/// Returns an error if the `umount2(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    use nix::mount::{MntFlags, umount2};
    use simple_docker_common::error::DockerError;

    umount2(target, MntFlags::MNT_DETACH).map_err(|e| DockerError::Mount {
        target: target.to_path_buf(),
        message: format!("unmount failed: {e}"),
    })?;
    tracing::debug!(target = %target.display(), "unmounted");
    Ok(())
}

/// Marks every mount in the current namespace as private, recursively.
///
/// Must run inside a fresh mount namespace before any mount is changed,
/// otherwise mount events propagate back to the host through shared peers.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn make_mounts_private() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use simple_docker_common::error::DockerError;

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_PRIVATE | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| DockerError::Mount {
        target: "/".into(),
        message: format!("making mounts private failed: {e}"),
    })?;
    tracing::debug!("mount propagation set to private");
    Ok(())
}

/// Mounts a fresh `proc` at `/proc` with `noexec,nosuid,nodev`.
///
/// # Errors
///
/// Returns an error if `/proc` cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_proc() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use simple_docker_common::error::DockerError;

    let target = Path::new("/proc");
    ensure_dir(target)?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| DockerError::Mount {
        target: target.to_path_buf(),
        message: format!("proc mount failed: {e}"),
    })?;
    tracing::debug!("/proc mounted");
    Ok(())
}

/// Mounts an empty `tmpfs` at `/dev` with `nosuid,strictatime,mode=755`.
///
/// # Errors
///
/// Returns an error if `/dev` cannot be created or the mount fails.
#[cfg(target_os = "linux")]
pub fn mount_dev() -> Result<()> {
    use nix::mount::{MsFlags, mount};
    use simple_docker_common::error::DockerError;

    let target = Path::new("/dev");
    ensure_dir(target)?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| DockerError::Mount {
        target: target.to_path_buf(),
        message: format!("tmpfs mount failed: {e}"),
    })?;
    tracing::debug!("/dev mounted");
    Ok(())
}

#[cfg(target_os = "linux")]
fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .map_err(|e| simple_docker_common::error::DockerError::io(path, e))
}

#[cfg(not(target_os = "linux"))]
fn linux_required() -> simple_docker_common::error::DockerError {
    simple_docker_common::error::DockerError::Config {
        message: "Linux required for native container operations".into(),
    }
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: mount propagation requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn make_mounts_private() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `/proc` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_proc() -> Result<()> {
    Err(linux_required())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: `/dev` mounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn mount_dev() -> Result<()> {
    Err(linux_required())
}
