//! One-shot command handoff from the supervisor to the container.
//!
//! The supervisor keeps the write end, the container inherits the read end.
//! The command line travels as a single space-joined string, unframed; the
//! reader knows it is complete when the writer closes its end. Each end is
//! consumed by its single use.

use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::time::Duration;

use simple_docker_common::error::{DockerError, Result};

/// Write end of the handoff pipe, held by the supervisor.
#[derive(Debug)]
pub struct HandoffSender {
    pipe: File,
}

/// Read end of the handoff pipe, inherited by the container.
#[derive(Debug)]
pub struct HandoffReceiver {
    pipe: File,
}

/// Allocates a handoff pipe.
///
/// Both ends are close-on-exec; the launcher explicitly installs the read end
/// in the child, so the write end never leaks into the container.
///
/// # Errors
///
/// Returns an error if `pipe2(2)` fails.
#[cfg(target_os = "linux")]
pub fn channel() -> Result<(HandoffSender, HandoffReceiver)> {
    use nix::fcntl::OFlag;

    let (read, write) = nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| DockerError::Handoff {
        message: format!("pipe allocation failed: {e}"),
    })?;
    tracing::debug!("handoff pipe allocated");
    Ok((
        HandoffSender {
            pipe: File::from(write),
        },
        HandoffReceiver {
            pipe: File::from(read),
        },
    ))
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: the container handoff requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn channel() -> Result<(HandoffSender, HandoffReceiver)> {
    Err(DockerError::Config {
        message: "Linux required for native container operations".into(),
    })
}

impl HandoffSender {
    /// Writes the command line and closes the pipe.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails, typically because the container
    /// already exited and the read end is gone.
    pub fn send(mut self, command: &[String]) -> Result<()> {
        let line = command.join(" ");
        tracing::info!(command = %line, "sending init command");
        self.pipe
            .write_all(line.as_bytes())
            .map_err(|e| DockerError::Handoff {
                message: format!("write failed: {e}"),
            })
    }
}

impl HandoffReceiver {
    /// Adopts the read end the launcher installed at `fd`.
    ///
    /// # Safety
    ///
    /// `fd` must be an open pipe read end that nothing else in the process
    /// owns or will close. Call this at most once per descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if `fd` is not an open descriptor.
    pub unsafe fn from_inherited(fd: std::os::fd::RawFd) -> Result<Self> {
        use std::os::fd::FromRawFd;

        // SAFETY: F_GETFD only inspects the descriptor table.
        if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
            return Err(DockerError::Handoff {
                message: format!("descriptor {fd} is not open"),
            });
        }
        // SAFETY: the caller guarantees exclusive ownership of `fd`.
        let owned = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self {
            pipe: File::from(owned),
        })
    }

    /// Blocks until the writer closes its end and returns everything written.
    ///
    /// With a `timeout`, gives up if no data or close arrives in time.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait times out, the read fails, the payload is
    /// not UTF-8, or the writer closed without sending anything.
    pub fn recv(mut self, timeout: Option<Duration>) -> Result<String> {
        if let Some(timeout) = timeout {
            self.wait_readable(timeout)?;
        }
        let mut command = String::new();
        let _ = self
            .pipe
            .read_to_string(&mut command)
            .map_err(|e| DockerError::Handoff {
                message: format!("read failed: {e}"),
            })?;
        if command.is_empty() {
            return Err(DockerError::Handoff {
                message: "writer closed without sending a command".into(),
            });
        }
        Ok(command)
    }

    fn wait_readable(&self, timeout: Duration) -> Result<()> {
        use nix::errno::Errno;
        use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let poll_timeout = PollTimeout::try_from(millis).map_err(|e| DockerError::Config {
            message: format!("invalid handoff timeout: {e}"),
        })?;
        loop {
            let mut fds = [PollFd::new(self.pipe.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, poll_timeout) {
                Ok(0) => {
                    return Err(DockerError::Handoff {
                        message: format!("no command received within {timeout:?}"),
                    });
                }
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => {}
                Err(e) => {
                    return Err(DockerError::Handoff {
                        message: format!("poll failed: {e}"),
                    });
                }
            }
        }
    }
}

impl AsFd for HandoffReceiver {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.pipe.as_fd()
    }
}

impl From<HandoffReceiver> for OwnedFd {
    fn from(receiver: HandoffReceiver) -> Self {
        receiver.pipe.into()
    }
}

/// Splits a received command line into its argument vector.
#[must_use]
pub fn parse_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}
