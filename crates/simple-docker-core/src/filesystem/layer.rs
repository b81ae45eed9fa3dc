//! Base-layer extraction.
//!
//! The base layer is unpacked once from its archive and then shared,
//! read-only, by every container built on the same root directory.

use std::path::{Path, PathBuf};

use simple_docker_common::error::{DockerError, Result};

/// Outcome of [`ensure_base_layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseLayer {
    /// The layer directory already existed and was left alone.
    Cached,
    /// The archive was unpacked into a new layer directory.
    Extracted,
}

/// Materializes the base layer at `target` from `archive`, unless `target`
/// already exists.
///
/// The archive is unpacked into a sibling staging directory that is renamed
/// into place only after extraction succeeds, so a failed run never leaves a
/// partially populated cache behind.
///
/// # Errors
///
/// Returns an error if the archive is missing or unreadable, or if
/// extraction or the final rename fails.
pub fn ensure_base_layer(archive: &Path, target: &Path) -> Result<BaseLayer> {
    if target.exists() {
        tracing::debug!(layer = %target.display(), "base layer already present");
        return Ok(BaseLayer::Cached);
    }
    if !archive.is_file() {
        return Err(DockerError::NotFound {
            kind: "base layer archive",
            id: archive.display().to_string(),
        });
    }

    let staging = staging_path(target);
    if staging.exists() {
        std::fs::remove_dir_all(&staging).map_err(|e| DockerError::io(&staging, e))?;
    }
    if let Err(e) = extract_archive(archive, &staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }
    std::fs::rename(&staging, target).map_err(|e| DockerError::io(target, e))?;

    tracing::info!(
        archive = %archive.display(),
        layer = %target.display(),
        "base layer extracted"
    );
    Ok(BaseLayer::Extracted)
}

/// Extracts a tar archive to the target directory.
///
/// Supports both plain `.tar` and gzip-compressed `.tar.gz` / `.tgz` archives.
///
/// # Errors
///
/// Returns an error if the archive cannot be opened or unpacked.
pub fn extract_archive(archive_path: &Path, target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| DockerError::io(target, e))?;

    let file = std::fs::File::open(archive_path).map_err(|e| DockerError::io(archive_path, e))?;

    if is_gzip_archive(archive_path) {
        let decoder = flate2::read::GzDecoder::new(file);
        unpack(tar::Archive::new(decoder), target)
    } else {
        unpack(tar::Archive::new(file), target)
    }
}

fn unpack<R: std::io::Read>(mut archive: tar::Archive<R>, target: &Path) -> Result<()> {
    archive.set_preserve_permissions(true);
    archive.unpack(target).map_err(|e| DockerError::io(target, e))
}

fn staging_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".partial");
    target.with_file_name(name)
}

/// Determines whether the archive is gzip-compressed based on extension.
fn is_gzip_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz") || ext.eq_ignore_ascii_case("tgz"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_tar(dir: &Path) -> PathBuf {
        let tar_path = dir.join("busybox.tar");
        let file = std::fs::File::create(&tar_path).expect("failed to create tar file");
        let mut builder = tar::Builder::new(file);
        let data = b"#!/bin/sh\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/sh", &data[..])
            .expect("failed to append data");
        builder.finish().expect("failed to finish tar");
        tar_path
    }

    #[test]
    fn first_call_extracts_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = create_test_tar(dir.path());
        let target = dir.path().join("busybox");

        let outcome = ensure_base_layer(&archive, &target).expect("extract");
        assert_eq!(outcome, BaseLayer::Extracted);
        assert!(target.join("bin/sh").is_file());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn existing_layer_is_not_reextracted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = create_test_tar(dir.path());
        let target = dir.path().join("busybox");

        let _ = ensure_base_layer(&archive, &target).expect("first");
        std::fs::write(target.join("marker"), b"kept").expect("marker");
        std::fs::remove_file(target.join("bin/sh")).expect("remove");

        let outcome = ensure_base_layer(&archive, &target).expect("second");
        assert_eq!(outcome, BaseLayer::Cached);
        assert!(target.join("marker").exists());
        assert!(!target.join("bin/sh").exists());
    }

    #[test]
    fn missing_archive_is_reported_and_leaves_no_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("busybox");
        let err = ensure_base_layer(&dir.path().join("busybox.tar"), &target).unwrap_err();
        assert!(matches!(err, DockerError::NotFound { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn corrupt_archive_leaves_no_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("busybox.tar.gz");
        std::fs::write(&archive, b"definitely not gzip").expect("write");
        let target = dir.path().join("busybox");

        assert!(ensure_base_layer(&archive, &target).is_err());
        assert!(!target.exists());
        assert!(!staging_path(&target).exists());
    }

    #[test]
    fn is_gzip_archive_detects_extensions() {
        assert!(is_gzip_archive(Path::new("layer.tar.gz")));
        assert!(is_gzip_archive(Path::new("layer.tgz")));
        assert!(!is_gzip_archive(Path::new("busybox.tar")));
    }
}
