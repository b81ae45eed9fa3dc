//! Runs one container from launch to teardown.
//!
//! Order matters: the child is started and its PID registered with the
//! resource manager before the command is sent, so nothing the user runs
//! escapes its limits. Teardown always runs with the parameters used at
//! creation.

use simple_docker_common::config::RuntimeConfig;
use simple_docker_common::error::{DockerError, Result};
use simple_docker_common::types::{ContainerId, ContainerInfo, ContainerStatus, ResourceLimits};
use simple_docker_core::cgroup::{CgroupManager, ResourceManager};
use simple_docker_core::filesystem::mount::{HostMounter, Mounter};
use simple_docker_core::workspace::Workspace;

use crate::launcher::{LaunchRequest, Launcher};
use crate::state;

/// A request to run a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    /// Share the terminal instead of logging to a file.
    pub tty: bool,
    /// Command line to run inside the container.
    pub command: Vec<String>,
    /// Raw `host:container` volume argument.
    pub volume: Option<String>,
    /// Container name; defaults to the generated ID.
    pub name: Option<String>,
    /// Resource limits; empty means no cgroup is created.
    pub limits: ResourceLimits,
}

/// How a container run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Generated container ID.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Exit code of the init process (`128 + signal` if killed).
    pub exit_code: i32,
}

/// Drives a container through launch, start, wait and teardown.
#[derive(Debug)]
pub struct Supervisor<M = HostMounter> {
    launcher: Launcher<M>,
}

impl Supervisor<HostMounter> {
    /// Creates a supervisor that launches the current executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be located.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Ok(Self::with_launcher(Launcher::new(config)?))
    }
}

impl<M: Mounter + Clone> Supervisor<M> {
    /// Creates a supervisor around an existing launcher.
    #[must_use]
    pub const fn with_launcher(launcher: Launcher<M>) -> Self {
        Self { launcher }
    }

    fn config(&self) -> &RuntimeConfig {
        self.launcher.config()
    }

    /// Runs the container to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty, the launch or start fails,
    /// resource limits cannot be applied, or the child cannot be waited
    /// for. Teardown runs before a wait error is returned; teardown failures
    /// are logged, never returned.
    pub fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        if request.command.is_empty() {
            return Err(DockerError::Config {
                message: "no command given".into(),
            });
        }
        let id = ContainerId::generate();
        let name = request.name.clone().unwrap_or_else(|| id.to_string());

        let mut launched = self.launcher.launch(&LaunchRequest {
            tty: request.tty,
            volume: request.volume.clone(),
            name: name.clone(),
        })?;

        let pid = match launched.process.start() {
            Ok(pid) => pid,
            Err(e) => {
                self.teardown(&name, &launched.workspace, request.tty, None);
                return Err(e);
            }
        };

        let cgroup = match self.register(&name, pid, &request.limits) {
            Ok(cgroup) => cgroup,
            Err(e) => {
                // Closing the pipe unsent makes the bootstrap fail and exit.
                drop(launched.handoff);
                if let Err(wait_err) = launched.process.wait() {
                    tracing::warn!(error = %wait_err, "waiting for aborted container failed");
                }
                self.teardown(&name, &launched.workspace, request.tty, None);
                return Err(e);
            }
        };

        let info = ContainerInfo::running(id.clone(), name.as_str(), pid, &request.command);
        if let Err(e) = state::record(self.config(), &info) {
            tracing::warn!(name = %name, error = %e, "container info not recorded");
        }

        if let Err(e) = launched.handoff.send(&request.command) {
            tracing::error!(name = %name, error = %e, "command handoff failed");
        }
        let waited = launched.process.wait();
        if let Err(e) = &waited {
            tracing::error!(name = %name, error = %e, "waiting for container failed");
        }

        self.teardown(&name, &launched.workspace, request.tty, cgroup.as_deref());
        let exit_code = waited?;
        Ok(RunOutcome {
            id,
            name,
            exit_code,
        })
    }

    fn register(
        &self,
        name: &str,
        pid: u32,
        limits: &ResourceLimits,
    ) -> Result<Option<Box<dyn ResourceManager>>> {
        if limits.is_empty() {
            return Ok(None);
        }
        let cgroup = CgroupManager::create(&self.config().cgroup_root, name)?;
        let applied = cgroup.apply(limits).and_then(|()| cgroup.add_process(pid));
        if let Err(e) = applied {
            if let Err(release_err) = cgroup.release() {
                tracing::warn!(error = %release_err, "cgroup release failed");
            }
            return Err(e);
        }
        Ok(Some(Box::new(cgroup)))
    }

    fn teardown(
        &self,
        name: &str,
        workspace: &Workspace<M>,
        tty: bool,
        cgroup: Option<&dyn ResourceManager>,
    ) {
        let recorded = if tty {
            state::remove(self.config(), name)
        } else {
            state::update_status(self.config(), name, ContainerStatus::Exited)
        };
        match recorded {
            Ok(()) | Err(DockerError::NotFound { .. }) => {}
            Err(e) => tracing::warn!(name, error = %e, "container info not updated"),
        }

        if let Some(cgroup) = cgroup {
            if let Err(e) = cgroup.release() {
                tracing::warn!(name, error = %e, "cgroup release failed");
            }
        }

        let report = workspace.destroy();
        for outcome in report.failures() {
            tracing::warn!(name, step = %outcome.step, status = ?outcome.status, "teardown step failed");
        }
        if report.is_success() {
            tracing::info!(name, "container torn down");
        }
    }
}
