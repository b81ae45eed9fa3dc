//! Parent-side preparation of a container.
//!
//! [`Launcher::launch`] allocates the handoff pipe, prepares stdio, builds
//! the workspace and returns a not-yet-started [`InitProcess`] together with
//! the pipe's write end. Starting the child and sending the command are left
//! to the caller so the PID can be registered first.

use std::fs::File;
use std::path::{Path, PathBuf};

use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::constants::INIT_VERB;
use simple_docker_common::error::{DockerError, Result};
use simple_docker_common::types::{ContainerStatus, validate_container_name};
use simple_docker_core::bootstrap::BootstrapOptions;
use simple_docker_core::filesystem::mount::{HostMounter, Mounter};
use simple_docker_core::handoff::{self, HandoffSender};
use simple_docker_core::namespace::NamespaceConfig;
use simple_docker_core::workspace::{Workspace, WorkspaceLayout};

use crate::process::{InitProcess, StdioMode};
use crate::state;

/// What to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    /// Interactive: share the terminal. Otherwise output goes to the log file.
    pub tty: bool,
    /// Raw `host:container` volume argument.
    pub volume: Option<String>,
    /// Container name; keys every per-instance path.
    pub name: String,
}

/// A prepared container, ready to be started.
#[derive(Debug)]
pub struct Launched<M = HostMounter> {
    /// The init process descriptor.
    pub process: InitProcess,
    /// Write end of the handoff pipe.
    pub handoff: HandoffSender,
    /// The created workspace, kept for teardown.
    pub workspace: Workspace<M>,
}

/// Builds container init processes.
#[derive(Debug, Clone)]
pub struct Launcher<M = HostMounter> {
    config: RuntimeConfig,
    init_program: PathBuf,
    namespaces: NamespaceConfig,
    mounter: M,
}

impl Launcher<HostMounter> {
    /// Creates a launcher that re-invokes the current executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be located.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let exe = std::env::current_exe().map_err(|e| DockerError::io("/proc/self/exe", e))?;
        Ok(Self::with_mounter(config, exe, HostMounter))
    }
}

impl<M: Mounter + Clone> Launcher<M> {
    /// Creates a launcher with an explicit init program and mounter.
    #[must_use]
    pub fn with_mounter(config: RuntimeConfig, init_program: PathBuf, mounter: M) -> Self {
        Self {
            config,
            init_program,
            namespaces: NamespaceConfig::default(),
            mounter,
        }
    }

    /// Overrides the namespaces the child is created in.
    #[must_use]
    pub fn namespaces(mut self, namespaces: NamespaceConfig) -> Self {
        self.namespaces = namespaces;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Prepares a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or already in use, the pipe
    /// or the log file cannot be created, or any workspace step fails. A
    /// failed workspace is torn down before returning.
    pub fn launch(&self, request: &LaunchRequest) -> Result<Launched<M>> {
        validate_container_name(&request.name)?;
        self.ensure_name_free(&request.name)?;
        let (sender, receiver) = handoff::channel()?;

        let stdio = if request.tty {
            StdioMode::Inherit
        } else {
            StdioMode::LogFile(self.create_log_file(&request.name)?)
        };

        let layout = WorkspaceLayout::for_container(&self.config, &request.name);
        let workspace =
            Workspace::with_mounter(layout, request.volume.as_deref(), self.mounter.clone());
        if let Err(e) = workspace.create().into_result() {
            tracing::error!(name = %request.name, error = %e, "workspace creation failed");
            for outcome in workspace.destroy().failures() {
                tracing::warn!(step = %outcome.step, status = ?outcome.status, "rollback step failed");
            }
            return Err(e);
        }

        let args = init_args(&BootstrapOptions::from(&self.config));
        let process = InitProcess::new(
            self.init_program.clone(),
            args,
            self.namespaces.clone(),
            stdio,
            workspace.merge_point().to_path_buf(),
            receiver.into(),
        );
        tracing::info!(
            name = %request.name,
            tty = request.tty,
            merge_point = %workspace.merge_point().display(),
            "container prepared"
        );
        Ok(Launched {
            process,
            handoff: sender,
            workspace,
        })
    }

    /// A name is taken while its merge point is mounted or a live process
    /// is recorded as running under it.
    fn ensure_name_free(&self, name: &str) -> Result<()> {
        let layout = WorkspaceLayout::for_container(&self.config, name);
        let mounted = self.mounter.is_mounted(&layout.merge_point);
        let running = state::load(&self.config, name).is_ok_and(|info| {
            info.status == ContainerStatus::Running
                && !info.pid.is_empty()
                && Path::new("/proc").join(&info.pid).exists()
        });
        if mounted || running {
            tracing::error!(name, mounted, running, "container name already in use");
            return Err(DockerError::Config {
                message: format!("container name {name} is already in use"),
            });
        }
        Ok(())
    }

    fn create_log_file(&self, name: &str) -> Result<File> {
        let dir = self.config.container_info_dir(name);
        std::fs::create_dir_all(&dir).map_err(|e| DockerError::io(&dir, e))?;
        let path = self.config.container_log_path(name);
        let file = File::create(&path).map_err(|e| DockerError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "container log created");
        Ok(file)
    }
}

/// Arguments that route the re-invoked binary into the bootstrap.
#[must_use]
pub fn init_args(options: &BootstrapOptions) -> Vec<String> {
    let mut args = vec![
        INIT_VERB.to_string(),
        "--mount-policy".to_string(),
        options.mount_policy.to_string(),
    ];
    if let Some(timeout) = options.handoff_timeout {
        args.push("--handoff-timeout".to_string());
        args.push(timeout.as_secs_f64().to_string());
    }
    args
}
