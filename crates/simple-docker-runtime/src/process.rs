//! The container's init process descriptor.
//!
//! [`InitProcess`] describes the child before it exists: which program to
//! re-invoke, in which namespaces, with which stdio, in which directory, and
//! which handoff descriptor to inherit. [`InitProcess::start`] creates the
//! child with `clone(2)` so the namespaces exist from its first instruction,
//! and the init process really is PID 1 of the new PID namespace.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};

use simple_docker_common::error::{DockerError, Result};
use simple_docker_core::namespace::NamespaceConfig;

/// Stack size for the cloned child before it execs.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const CHILD_STACK_SIZE: usize = 4 * 1024 * 1024;

/// Exit code of a child that could not exec its program.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
const EXEC_FAILED: isize = 127;

/// Where the child's standard streams go.
#[derive(Debug)]
pub enum StdioMode {
    /// Share the supervisor's terminal.
    Inherit,
    /// Send stdout and stderr to the given log file; stdin is `/dev/null`.
    LogFile(File),
}

/// A not-yet-started (or running) container init process.
#[derive(Debug)]
pub struct InitProcess {
    program: PathBuf,
    args: Vec<String>,
    namespaces: NamespaceConfig,
    stdio: StdioMode,
    working_dir: PathBuf,
    handoff: Option<OwnedFd>,
    pid: Option<u32>,
}

impl InitProcess {
    /// Describes a child that runs `program` with `args` in `working_dir`.
    ///
    /// `handoff` is installed at
    /// [`HANDOFF_FD`](simple_docker_common::constants::HANDOFF_FD) in the
    /// child.
    #[must_use]
    pub fn new(
        program: PathBuf,
        args: Vec<String>,
        namespaces: NamespaceConfig,
        stdio: StdioMode,
        working_dir: PathBuf,
        handoff: OwnedFd,
    ) -> Self {
        Self {
            program,
            args,
            namespaces,
            stdio,
            working_dir,
            handoff: Some(handoff),
            pid: None,
        }
    }

    /// Program the child executes.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments after the program name.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Namespaces the child is created in.
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceConfig {
        &self.namespaces
    }

    /// The child's stdio routing.
    #[must_use]
    pub const fn stdio(&self) -> &StdioMode {
        &self.stdio
    }

    /// Directory the child starts in.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Host PID of the child once started.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Creates the child in fresh namespaces and returns its host PID.
    ///
    /// The supervisor's copy of the handoff read end is closed afterwards,
    /// so the child is the only reader.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was already started, an argument
    /// contains a NUL byte, `/dev/null` cannot be opened, or `clone(2)`
    /// fails (typically for lack of privileges).
    #[cfg(target_os = "linux")]
    pub fn start(&mut self) -> Result<u32> {
        use std::os::fd::AsRawFd;
        use std::os::unix::ffi::OsStrExt;

        use nix::sched::clone;
        use nix::sys::signal::Signal;

        let handoff = self.handoff.take().ok_or_else(|| DockerError::Config {
            message: "init process already started".into(),
        })?;

        let program = cstring(self.program.as_os_str().as_bytes())?;
        let mut argv = vec![program.clone()];
        for arg in &self.args {
            argv.push(cstring(arg.as_bytes())?);
        }
        let argv_ptrs: Vec<*const libc::c_char> = argv
            .iter()
            .map(|a| a.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let cwd = cstring(self.working_dir.as_os_str().as_bytes())?;

        let null = match &self.stdio {
            StdioMode::Inherit => None,
            StdioMode::LogFile(_) => {
                Some(File::open("/dev/null").map_err(|e| DockerError::io("/dev/null", e))?)
            }
        };
        let child = ChildSetup {
            program: &program,
            argv: &argv_ptrs,
            cwd: &cwd,
            handoff_fd: handoff.as_raw_fd(),
            stdio: match (&self.stdio, &null) {
                (StdioMode::LogFile(log), Some(null)) => Some((null.as_raw_fd(), log.as_raw_fd())),
                _ => None,
            },
        };

        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        // SAFETY: the child gets a copy-on-write image of this process
        // (no CLONE_VM), and `ChildSetup::exec` only performs
        // async-signal-safe libc calls on memory prepared above before
        // exec'ing or exiting.
        let pid = unsafe {
            clone(
                Box::new(|| child.exec()),
                &mut stack,
                self.namespaces.clone_flags(),
                Some(Signal::SIGCHLD as i32),
            )
        }
        .map_err(|e| match e {
            nix::errno::Errno::EPERM => DockerError::PermissionDenied {
                message: "creating namespaces requires root".into(),
            },
            e => DockerError::Config {
                message: format!("clone failed: {e}"),
            },
        })?;

        drop(handoff);
        let pid = pid.as_raw().unsigned_abs();
        self.pid = Some(pid);
        tracing::info!(pid, program = %self.program.display(), "init process started");
        Ok(pid)
    }

    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: namespaces require Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn start(&mut self) -> Result<u32> {
        Err(DockerError::Config {
            message: "Linux required for native container operations".into(),
        })
    }

    /// Blocks until the child exits and returns its exit code.
    ///
    /// A child killed by a signal reports `128 + signal`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process was never started or `waitpid(2)`
    /// fails.
    #[cfg(target_os = "linux")]
    pub fn wait(&self) -> Result<i32> {
        use nix::errno::Errno;
        use nix::sys::wait::{WaitStatus, waitpid};
        use nix::unistd::Pid;

        let pid = self.pid.ok_or_else(|| DockerError::Config {
            message: "init process was never started".into(),
        })?;
        let raw = i32::try_from(pid).map_err(|_| DockerError::Config {
            message: format!("pid {pid} out of range"),
        })?;
        loop {
            match waitpid(Pid::from_raw(raw), None) {
                Ok(WaitStatus::Exited(_, code)) => {
                    tracing::info!(pid, code, "init process exited");
                    return Ok(code);
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    tracing::info!(pid, %signal, "init process killed");
                    return Ok(128 + signal as i32);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(DockerError::Config {
                        message: format!("waitpid failed: {e}"),
                    });
                }
            }
        }
    }

    /// Stub for non-Linux platforms.
    ///
    /// # Errors
    ///
    /// Always returns an error: namespaces require Linux.
    #[cfg(not(target_os = "linux"))]
    pub fn wait(&self) -> Result<i32> {
        Err(DockerError::Config {
            message: "Linux required for native container operations".into(),
        })
    }
}

/// Everything the cloned child needs, prepared before `clone(2)`.
#[cfg(target_os = "linux")]
struct ChildSetup<'a> {
    program: &'a CString,
    argv: &'a [*const libc::c_char],
    cwd: &'a CString,
    handoff_fd: libc::c_int,
    /// `(stdin, stdout/stderr)` replacements in detached mode.
    stdio: Option<(libc::c_int, libc::c_int)>,
}

#[cfg(target_os = "linux")]
impl ChildSetup<'_> {
    /// Runs in the child: wires descriptors, changes directory, execs.
    fn exec(&self) -> isize {
        use simple_docker_common::constants::HANDOFF_FD;

        // SAFETY: plain descriptor and exec syscalls on values owned by this
        // (child) copy of the process.
        unsafe {
            if let Some((null, log)) = self.stdio {
                if libc::dup2(null, 0) < 0 || libc::dup2(log, 1) < 0 || libc::dup2(log, 2) < 0 {
                    return EXEC_FAILED;
                }
            }
            // dup2 clears close-on-exec on the copy; an fd already in place
            // needs it cleared by hand.
            if self.handoff_fd == HANDOFF_FD {
                let flags = libc::fcntl(HANDOFF_FD, libc::F_GETFD);
                if flags < 0 || libc::fcntl(HANDOFF_FD, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return EXEC_FAILED;
                }
            } else if libc::dup2(self.handoff_fd, HANDOFF_FD) < 0 {
                return EXEC_FAILED;
            }
            if libc::chdir(self.cwd.as_ptr()) < 0 {
                return EXEC_FAILED;
            }
            let _ = libc::execv(self.program.as_ptr(), self.argv.as_ptr());
        }
        EXEC_FAILED
    }
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn cstring(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| DockerError::Config {
        message: format!(
            "argument contains a NUL byte: {}",
            String::from_utf8_lossy(bytes)
        ),
    })
}
