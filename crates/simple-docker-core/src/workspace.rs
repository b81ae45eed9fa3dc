//! Layered root filesystem for one container instance.
//!
//! A workspace stacks a per-instance write layer over the shared base layer
//! at a merge point, and optionally bind-mounts a host directory into it.
//! [`Workspace::create`] and [`Workspace::destroy`] attempt every step, record
//! each outcome in a [`WorkspaceReport`], and leave the decision about
//! partial failure to the caller.
//!
//! Creation order is base, write, merge, volume. Destruction is the strict
//! reverse: volume unmount, merge unmount, merge delete, write delete. The
//! base layer and the host side of a volume are never deleted.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::error::{DockerError, Result};

use crate::filesystem::layer;
use crate::filesystem::mount::{HostMounter, Mounter};
use crate::filesystem::overlayfs::OverlayConfig;

/// A host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host: PathBuf,
    /// Mount location inside the container, relative to its root.
    pub container: PathBuf,
}

impl VolumeSpec {
    /// Parses `<host-path>:<container-path>`.
    ///
    /// Returns `None` unless the string splits on `:` into exactly two
    /// non-empty segments and the container path stays inside the root.
    #[must_use]
    pub fn parse(spec: &str) -> Option<Self> {
        let mut parts = spec.split(':');
        let (Some(host), Some(container), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        if host.is_empty() || container.is_empty() {
            return None;
        }
        let container = PathBuf::from(container);
        if container.components().any(|c| c == Component::ParentDir) {
            return None;
        }
        Some(Self {
            host: PathBuf::from(host),
            container,
        })
    }

    /// Parses an optional volume argument, logging and discarding malformed
    /// values.
    #[must_use]
    pub fn from_arg(spec: Option<&str>) -> Option<Self> {
        let spec = spec.filter(|s| !s.is_empty())?;
        let parsed = Self::parse(spec);
        if parsed.is_none() {
            tracing::warn!(volume = spec, "volume parameter is not <host>:<container>, ignoring");
        }
        parsed
    }

    /// Location of the volume mount point inside `merge_point`.
    #[must_use]
    pub fn target_in(&self, merge_point: &Path) -> PathBuf {
        let relative: PathBuf = self
            .container
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect();
        merge_point.join(relative)
    }
}

/// Per-instance filesystem paths of a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    /// Archive the base layer is extracted from.
    pub base_archive: PathBuf,
    /// Shared, read-only base layer.
    pub base_layer: PathBuf,
    /// Writable upper layer of this instance.
    pub write_layer: PathBuf,
    /// Overlay work directory of this instance.
    pub work_dir: PathBuf,
    /// Merged mount point of this instance; the container's future root.
    pub merge_point: PathBuf,
}

impl WorkspaceLayout {
    /// Derives the layout of the named container from the configuration.
    #[must_use]
    pub fn for_container(config: &RuntimeConfig, name: &str) -> Self {
        let root = &config.root_dir;
        Self {
            base_archive: config.base_archive_path(),
            base_layer: config.base_layer_path(),
            write_layer: root.join(&config.write_layer).join(name),
            work_dir: root.join(&config.work_layer).join(name),
            merge_point: root.join(&config.merge_dir).join(name),
        }
    }

    fn overlay(&self) -> OverlayConfig {
        OverlayConfig {
            lower_dirs: vec![self.base_layer.clone()],
            upper_dir: self.write_layer.clone(),
            work_dir: self.work_dir.clone(),
            merged_dir: self.merge_point.clone(),
        }
    }
}

/// One step of workspace creation or destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkspaceStep {
    /// Extract (or reuse) the base layer.
    BaseLayer,
    /// Recreate the write layer and overlay work directory.
    WriteLayer,
    /// Create the merge point directory.
    MergePoint,
    /// Mount the overlay at the merge point.
    MountOverlay,
    /// Create the host side of the volume.
    VolumeHostDir,
    /// Create the volume mount point inside the merge point.
    VolumeTargetDir,
    /// Bind-mount the volume.
    MountVolume,
    /// Unmount the volume.
    UnmountVolume,
    /// Unmount the merge point.
    UnmountMergePoint,
    /// Delete the merge point directory.
    RemoveMergePoint,
    /// Delete the write layer and overlay work directory.
    RemoveWriteLayer,
}

impl fmt::Display for WorkspaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BaseLayer => "base layer",
            Self::WriteLayer => "write layer",
            Self::MergePoint => "merge point",
            Self::MountOverlay => "overlay mount",
            Self::VolumeHostDir => "volume host directory",
            Self::VolumeTargetDir => "volume mount point",
            Self::MountVolume => "volume mount",
            Self::UnmountVolume => "volume unmount",
            Self::UnmountMergePoint => "merge point unmount",
            Self::RemoveMergePoint => "merge point removal",
            Self::RemoveWriteLayer => "write layer removal",
        };
        f.write_str(name)
    }
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    /// The step succeeded.
    Done,
    /// The step was attempted and failed.
    Failed(String),
    /// The step was not attempted.
    Skipped(String),
}

/// A step together with its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Which step ran.
    pub step: WorkspaceStep,
    /// How it went.
    pub status: StepStatus,
}

/// Ordered outcomes of a create or destroy pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceReport {
    steps: Vec<StepOutcome>,
}

impl WorkspaceReport {
    fn record(&mut self, step: WorkspaceStep, result: Result<()>) {
        let status = match result {
            Ok(()) => StepStatus::Done,
            Err(e) => {
                tracing::error!(%step, error = %e, "workspace step failed");
                StepStatus::Failed(e.to_string())
            }
        };
        self.steps.push(StepOutcome { step, status });
    }

    fn skip(&mut self, step: WorkspaceStep, reason: &str) {
        tracing::debug!(%step, reason, "workspace step skipped");
        self.steps.push(StepOutcome {
            step,
            status: StepStatus::Skipped(reason.to_string()),
        });
    }

    fn succeeded(&self, step: WorkspaceStep) -> bool {
        self.steps
            .iter()
            .any(|o| o.step == step && o.status == StepStatus::Done)
    }

    /// All recorded outcomes, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Steps that were attempted and failed.
    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps
            .iter()
            .filter(|o| matches!(o.status, StepStatus::Failed(_)))
    }

    /// Returns `true` when no step failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    /// Converts the report into an error if any step failed.
    ///
    /// # Errors
    ///
    /// Returns [`DockerError::Workspace`] listing every failed step.
    pub fn into_result(self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let message = self
            .failures()
            .map(|o| match &o.status {
                StepStatus::Failed(reason) => format!("{}: {reason}", o.step),
                _ => o.step.to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        Err(DockerError::Workspace { message })
    }
}

/// The layered root filesystem of one container instance.
#[derive(Debug, Clone)]
pub struct Workspace<M = HostMounter> {
    layout: WorkspaceLayout,
    volume: Option<VolumeSpec>,
    mounter: M,
}

impl Workspace<HostMounter> {
    /// Creates a workspace that mounts through real syscalls.
    ///
    /// A malformed `volume` is logged and treated as absent.
    #[must_use]
    pub fn new(layout: WorkspaceLayout, volume: Option<&str>) -> Self {
        Self::with_mounter(layout, volume, HostMounter)
    }
}

impl<M: Mounter> Workspace<M> {
    /// Creates a workspace that mounts through `mounter`.
    #[must_use]
    pub fn with_mounter(layout: WorkspaceLayout, volume: Option<&str>, mounter: M) -> Self {
        Self {
            layout,
            volume: VolumeSpec::from_arg(volume),
            mounter,
        }
    }

    /// The instance's paths.
    #[must_use]
    pub const fn layout(&self) -> &WorkspaceLayout {
        &self.layout
    }

    /// The honored volume, if the argument parsed.
    #[must_use]
    pub const fn volume(&self) -> Option<&VolumeSpec> {
        self.volume.as_ref()
    }

    /// The merge point, which becomes the container's root.
    #[must_use]
    pub fn merge_point(&self) -> &Path {
        &self.layout.merge_point
    }

    /// The mounter in use.
    #[must_use]
    pub const fn mounter(&self) -> &M {
        &self.mounter
    }

    /// Builds the layered filesystem.
    ///
    /// Every step is attempted; volume steps are skipped when the overlay
    /// is not mounted, since the mount point would land outside the union.
    pub fn create(&self) -> WorkspaceReport {
        let layout = &self.layout;
        let mut report = WorkspaceReport::default();

        report.record(
            WorkspaceStep::BaseLayer,
            layer::ensure_base_layer(&layout.base_archive, &layout.base_layer).map(|_| ()),
        );
        report.record(WorkspaceStep::WriteLayer, self.create_write_layer());
        report.record(
            WorkspaceStep::MergePoint,
            create_dir(&layout.merge_point),
        );
        report.record(
            WorkspaceStep::MountOverlay,
            self.mounter.mount_overlay(&layout.overlay()),
        );

        if let Some(volume) = &self.volume {
            if report.succeeded(WorkspaceStep::MountOverlay) {
                let target = volume.target_in(&layout.merge_point);
                report.record(WorkspaceStep::VolumeHostDir, create_dir(&volume.host));
                report.record(WorkspaceStep::VolumeTargetDir, create_dir(&target));
                report.record(
                    WorkspaceStep::MountVolume,
                    self.mounter.bind_mount(&volume.host, &target),
                );
            } else {
                for step in [
                    WorkspaceStep::VolumeHostDir,
                    WorkspaceStep::VolumeTargetDir,
                    WorkspaceStep::MountVolume,
                ] {
                    report.skip(step, "overlay not mounted");
                }
            }
        }

        if report.is_success() {
            tracing::info!(merge_point = %layout.merge_point.display(), "workspace created");
        }
        report
    }

    /// Tears the layered filesystem down, innermost mount first.
    ///
    /// The merge point is only deleted once nothing is mounted on or below
    /// it, so a failed unmount can never cause deletion through a mount into
    /// the write layer or a host volume.
    pub fn destroy(&self) -> WorkspaceReport {
        let layout = &self.layout;
        let mut report = WorkspaceReport::default();
        let volume_target = self
            .volume
            .as_ref()
            .map(|v| v.target_in(&layout.merge_point));

        if let Some(target) = &volume_target {
            if self.mounter.is_mounted(target) {
                report.record(WorkspaceStep::UnmountVolume, self.mounter.unmount(target));
            } else {
                report.skip(WorkspaceStep::UnmountVolume, "not mounted");
            }
        }

        if self.mounter.is_mounted(&layout.merge_point) {
            report.record(
                WorkspaceStep::UnmountMergePoint,
                self.mounter.unmount(&layout.merge_point),
            );
        } else {
            report.skip(WorkspaceStep::UnmountMergePoint, "not mounted");
        }

        let still_mounted = self.mounter.is_mounted(&layout.merge_point)
            || volume_target
                .as_deref()
                .is_some_and(|t| self.mounter.is_mounted(t));
        if still_mounted {
            report.record(
                WorkspaceStep::RemoveMergePoint,
                Err(DockerError::Mount {
                    target: layout.merge_point.clone(),
                    message: "still mounted, refusing to delete".into(),
                }),
            );
        } else {
            report.record(WorkspaceStep::RemoveMergePoint, remove_dir(&layout.merge_point));
        }

        if still_mounted {
            report.skip(WorkspaceStep::RemoveWriteLayer, "merge point still mounted");
        } else {
            report.record(
                WorkspaceStep::RemoveWriteLayer,
                remove_dir(&layout.write_layer).and(remove_dir(&layout.work_dir)),
            );
        }

        if report.is_success() {
            tracing::info!(merge_point = %layout.merge_point.display(), "workspace destroyed");
        }
        report
    }

    fn create_write_layer(&self) -> Result<()> {
        for dir in [&self.layout.write_layer, &self.layout.work_dir] {
            remove_dir(dir)?;
            create_dir(dir)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| DockerError::io(path, e))
}

fn remove_dir(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DockerError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use super::*;

    #[derive(Debug, Default)]
    struct RecordingMounter {
        events: RefCell<Vec<String>>,
        mounted: RefCell<HashSet<PathBuf>>,
        fail_overlay: bool,
    }

    impl RecordingMounter {
        fn events(&self) -> Vec<String> {
            self.events.borrow().clone()
        }
    }

    impl Mounter for RecordingMounter {
        fn mount_overlay(&self, overlay: &OverlayConfig) -> Result<()> {
            if self.fail_overlay {
                return Err(DockerError::Mount {
                    target: overlay.merged_dir.clone(),
                    message: "overlay unsupported".into(),
                });
            }
            self.events
                .borrow_mut()
                .push(format!("overlay {}", overlay.merged_dir.display()));
            let _ = self.mounted.borrow_mut().insert(overlay.merged_dir.clone());
            Ok(())
        }

        fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
            assert!(source.is_dir(), "bind source must exist");
            assert!(target.is_dir(), "bind target must exist");
            self.events
                .borrow_mut()
                .push(format!("bind {} {}", source.display(), target.display()));
            let _ = self.mounted.borrow_mut().insert(target.to_path_buf());
            Ok(())
        }

        fn unmount(&self, target: &Path) -> Result<()> {
            assert!(target.exists(), "unmount must precede deletion");
            self.events
                .borrow_mut()
                .push(format!("umount {}", target.display()));
            let _ = self.mounted.borrow_mut().remove(target);
            Ok(())
        }

        fn is_mounted(&self, target: &Path) -> bool {
            self.mounted.borrow().contains(target)
        }
    }

    fn write_archive(root: &Path) {
        let file = std::fs::File::create(root.join("busybox.tar")).expect("create tar");
        let mut builder = tar::Builder::new(file);
        let data = b"busybox";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/busybox", &data[..])
            .expect("append");
        builder.finish().expect("finish");
    }

    fn layout(root: &Path) -> WorkspaceLayout {
        WorkspaceLayout::for_container(&RuntimeConfig::with_root(root), "c1")
    }

    fn steps(report: &WorkspaceReport) -> Vec<WorkspaceStep> {
        report.steps().iter().map(|o| o.step).collect()
    }

    #[test]
    fn volume_spec_accepts_exactly_two_segments() {
        let v = VolumeSpec::parse("/host/data:/data").expect("valid");
        assert_eq!(v.host, PathBuf::from("/host/data"));
        assert_eq!(v.container, PathBuf::from("/data"));

        for bad in ["", ":", "/a:", ":/b", "/a:/b:/c", "no-colon", "/a:../escape"] {
            assert!(VolumeSpec::parse(bad).is_none(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn volume_target_stays_inside_merge_point() {
        let v = VolumeSpec::parse("/h:/var/data").expect("valid");
        assert_eq!(
            v.target_in(Path::new("/root/mnt/c1")),
            PathBuf::from("/root/mnt/c1/var/data")
        );
    }

    #[test]
    fn layout_is_namespaced_by_container() {
        let cfg = RuntimeConfig::with_root("/srv");
        let a = WorkspaceLayout::for_container(&cfg, "a");
        let b = WorkspaceLayout::for_container(&cfg, "b");
        assert_eq!(a.base_layer, b.base_layer);
        assert_ne!(a.write_layer, b.write_layer);
        assert_ne!(a.merge_point, b.merge_point);
        assert_eq!(a.merge_point, PathBuf::from("/srv/mnt/a"));
        assert_eq!(a.write_layer, PathBuf::from("/srv/writeLayer/a"));
    }

    #[test]
    fn create_runs_steps_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let host = dir.path().join("host-data");
        let spec = format!("{}:/data", host.display());
        let ws = Workspace::with_mounter(layout(dir.path()), Some(&spec), RecordingMounter::default());

        let report = ws.create();
        assert!(report.is_success(), "{report:?}");
        assert_eq!(
            steps(&report),
            vec![
                WorkspaceStep::BaseLayer,
                WorkspaceStep::WriteLayer,
                WorkspaceStep::MergePoint,
                WorkspaceStep::MountOverlay,
                WorkspaceStep::VolumeHostDir,
                WorkspaceStep::VolumeTargetDir,
                WorkspaceStep::MountVolume,
            ]
        );
        let merge = &ws.layout().merge_point;
        assert_eq!(
            ws.mounter().events(),
            vec![
                format!("overlay {}", merge.display()),
                format!("bind {} {}", host.display(), merge.join("data").display()),
            ]
        );
    }

    #[test]
    fn destroy_unmounts_innermost_first_and_keeps_host_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let host = dir.path().join("host-data");
        let spec = format!("{}:/data", host.display());
        let ws = Workspace::with_mounter(layout(dir.path()), Some(&spec), RecordingMounter::default());
        assert!(ws.create().is_success());

        let report = ws.destroy();
        assert!(report.is_success(), "{report:?}");
        assert_eq!(
            steps(&report),
            vec![
                WorkspaceStep::UnmountVolume,
                WorkspaceStep::UnmountMergePoint,
                WorkspaceStep::RemoveMergePoint,
                WorkspaceStep::RemoveWriteLayer,
            ]
        );

        let merge = &ws.layout().merge_point;
        let events = ws.mounter().events();
        assert_eq!(events[2], format!("umount {}", merge.join("data").display()));
        assert_eq!(events[3], format!("umount {}", merge.display()));

        assert!(!ws.mounter().is_mounted(&merge.join("data")));
        assert!(host.is_dir());
        assert!(!merge.exists());
        assert!(!ws.layout().write_layer.exists());
        assert!(!ws.layout().work_dir.exists());
        assert!(ws.layout().base_layer.join("bin/busybox").exists());
    }

    #[test]
    fn malformed_volume_behaves_like_no_volume() {
        let baseline = {
            let dir = tempfile::tempdir().expect("tempdir");
            write_archive(dir.path());
            let ws = Workspace::with_mounter(layout(dir.path()), None, RecordingMounter::default());
            let created = steps(&ws.create());
            let destroyed = steps(&ws.destroy());
            (created, destroyed, ws.mounter().events().len())
        };

        for bad in ["", "/only-host", "/a:", ":/b", "/a:/b:/c"] {
            let dir = tempfile::tempdir().expect("tempdir");
            write_archive(dir.path());
            let ws = Workspace::with_mounter(layout(dir.path()), Some(bad), RecordingMounter::default());
            assert!(ws.volume().is_none());
            let created = steps(&ws.create());
            let destroyed = steps(&ws.destroy());
            assert_eq!(
                (created, destroyed, ws.mounter().events().len()),
                baseline,
                "volume {bad:?}"
            );
        }
    }

    #[test]
    fn second_create_reuses_base_layer() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let ws = Workspace::with_mounter(layout(dir.path()), None, RecordingMounter::default());
        assert!(ws.create().is_success());
        assert!(ws.destroy().is_success());

        let marker = ws.layout().base_layer.join("marker");
        std::fs::write(&marker, b"cached").expect("marker");
        std::fs::remove_file(dir.path().join("busybox.tar")).expect("remove archive");

        let report = ws.create();
        assert!(report.is_success(), "{report:?}");
        assert!(marker.exists());
    }

    #[test]
    fn write_layer_is_recreated_fresh() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let ws = Workspace::with_mounter(layout(dir.path()), None, RecordingMounter::default());
        std::fs::create_dir_all(&ws.layout().write_layer).expect("mkdir");
        std::fs::write(ws.layout().write_layer.join("stale"), b"x").expect("stale");

        assert!(ws.create().is_success());
        assert!(!ws.layout().write_layer.join("stale").exists());
    }

    #[test]
    fn missing_archive_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ws = Workspace::with_mounter(layout(dir.path()), None, RecordingMounter::default());

        let report = ws.create();
        let failed: Vec<_> = report.failures().map(|o| o.step).collect();
        assert_eq!(failed, vec![WorkspaceStep::BaseLayer]);
        let err = report.into_result().unwrap_err();
        assert!(err.to_string().contains("base layer"));
    }

    #[test]
    fn volume_steps_skipped_without_overlay() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let host = dir.path().join("host-data");
        let spec = format!("{}:/data", host.display());
        let mounter = RecordingMounter {
            fail_overlay: true,
            ..RecordingMounter::default()
        };
        let ws = Workspace::with_mounter(layout(dir.path()), Some(&spec), mounter);

        let report = ws.create();
        assert!(!report.is_success());
        assert!(report.steps().iter().any(|o| o.step == WorkspaceStep::MountVolume
            && matches!(o.status, StepStatus::Skipped(_))));
        assert!(!host.exists());

        let teardown = ws.destroy();
        assert!(teardown.is_success(), "{teardown:?}");
        assert!(!ws.layout().merge_point.exists());
    }

    #[test]
    fn merge_point_kept_while_still_mounted() {
        #[derive(Debug, Default)]
        struct StuckMounter(RecordingMounter);

        impl Mounter for StuckMounter {
            fn mount_overlay(&self, overlay: &OverlayConfig) -> Result<()> {
                self.0.mount_overlay(overlay)
            }
            fn bind_mount(&self, source: &Path, target: &Path) -> Result<()> {
                self.0.bind_mount(source, target)
            }
            fn unmount(&self, target: &Path) -> Result<()> {
                Err(DockerError::Mount {
                    target: target.to_path_buf(),
                    message: "device busy".into(),
                })
            }
            fn is_mounted(&self, target: &Path) -> bool {
                self.0.is_mounted(target)
            }
        }

        let dir = tempfile::tempdir().expect("tempdir");
        write_archive(dir.path());
        let ws = Workspace::with_mounter(layout(dir.path()), None, StuckMounter::default());
        assert!(ws.create().is_success());

        let report = ws.destroy();
        let failed: Vec<_> = report.failures().map(|o| o.step).collect();
        assert_eq!(
            failed,
            vec![WorkspaceStep::UnmountMergePoint, WorkspaceStep::RemoveMergePoint]
        );
        assert!(report.steps().iter().any(|o| o.step == WorkspaceStep::RemoveWriteLayer
            && matches!(o.status, StepStatus::Skipped(_))));
        assert!(ws.layout().merge_point.exists());
        assert!(ws.layout().write_layer.is_dir());
        assert!(ws.layout().work_dir.is_dir());
    }
}
