//! In-namespace bootstrap of the container's init process.
//!
//! This is the first code that runs inside the new namespaces. It walks a
//! fixed sequence of stages:
//!
//! ```text
//! AwaitingCommand → PivotingRoot → MountingPseudoFilesystems
//!                 → ResolvingExecutable → Replacing
//! ```
//!
//! Success ends in `execve(2)`: the process image is replaced and
//! [`Bootstrap::run`] never returns. Any failure is reported with the stage
//! it happened in, and the caller must exit.

use std::convert::Infallible;
use std::ffi::{CString, OsStr};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use simple_docker_common::config::{MountPolicy, RuntimeConfig};
use simple_docker_common::error::{DockerError, Result};
use thiserror::Error;

use crate::filesystem::{mount, pivot_root};
use crate::handoff::{self, HandoffReceiver};

/// Where the init process gets the command to run.
#[derive(Debug)]
pub enum CommandSource {
    /// Read the command line from the inherited handoff pipe.
    Handoff(HandoffReceiver),
    /// Use command-line arguments given to the `init` verb.
    Arguments(Vec<String>),
}

/// A bootstrap stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the command line.
    AwaitingCommand,
    /// Re-rooting onto the merge point.
    PivotingRoot,
    /// Mounting `/proc` and `/dev`.
    MountingPseudoFilesystems,
    /// Looking the program up on `PATH`.
    ResolvingExecutable,
    /// Replacing the process image.
    Replacing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingCommand => "awaiting command",
            Self::PivotingRoot => "pivoting root",
            Self::MountingPseudoFilesystems => "mounting pseudo filesystems",
            Self::ResolvingExecutable => "resolving executable",
            Self::Replacing => "replacing process image",
        };
        f.write_str(name)
    }
}

/// Terminal failure of the bootstrap.
#[derive(Debug, Error)]
#[error("bootstrap failed while {stage}: {source}")]
pub struct BootstrapError {
    /// Stage that failed.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub source: DockerError,
}

/// Tunables of the bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapOptions {
    /// Reaction to failed `/proc` or `/dev` mounts.
    pub mount_policy: MountPolicy,
    /// Upper bound on the wait for the command; `None` waits forever.
    pub handoff_timeout: Option<Duration>,
}

impl From<&RuntimeConfig> for BootstrapOptions {
    fn from(config: &RuntimeConfig) -> Self {
        Self {
            mount_policy: config.mount_policy,
            handoff_timeout: config.handoff_timeout,
        }
    }
}

/// Root filesystem operations performed inside the new mount namespace.
pub trait RootFilesystem {
    /// Makes every mount recursively private.
    ///
    /// # Errors
    ///
    /// Returns an error if the remount fails.
    fn make_mounts_private(&self) -> Result<()>;

    /// Makes `new_root` the root of the mount namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if any pivot step fails.
    fn pivot_root(&self, new_root: &Path) -> Result<()>;

    /// Mounts a fresh `/proc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_proc(&self) -> Result<()>;

    /// Mounts a `tmpfs` on `/dev`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount fails.
    fn mount_dev(&self) -> Result<()>;
}

/// The real root filesystem, driven through mount syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRoot;

impl RootFilesystem for HostRoot {
    fn make_mounts_private(&self) -> Result<()> {
        mount::make_mounts_private()
    }

    fn pivot_root(&self, new_root: &Path) -> Result<()> {
        pivot_root::pivot_root(new_root)
    }

    fn mount_proc(&self) -> Result<()> {
        mount::mount_proc()
    }

    fn mount_dev(&self) -> Result<()> {
        mount::mount_dev()
    }
}

/// The init process's bootstrap state machine.
#[derive(Debug)]
pub struct Bootstrap<R = HostRoot> {
    source: Option<CommandSource>,
    options: BootstrapOptions,
    stage: Stage,
    root: R,
}

impl Bootstrap<HostRoot> {
    /// Prepares a bootstrap in the [`Stage::AwaitingCommand`] stage.
    #[must_use]
    pub const fn new(source: CommandSource, options: BootstrapOptions) -> Self {
        Self::with_root(source, options, HostRoot)
    }
}

impl<R: RootFilesystem> Bootstrap<R> {
    /// Prepares a bootstrap that re-roots through `root`.
    #[must_use]
    pub const fn with_root(source: CommandSource, options: BootstrapOptions, root: R) -> Self {
        Self {
            source: Some(source),
            options,
            stage: Stage::AwaitingCommand,
            root,
        }
    }

    /// The current stage.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs every stage and replaces the process image.
    ///
    /// The current working directory must be the merge point that becomes
    /// the new root.
    ///
    /// # Errors
    ///
    /// Only ever returns on failure; the error names the failed stage.
    pub fn run(mut self) -> std::result::Result<Infallible, BootstrapError> {
        let source = self
            .source
            .take()
            .ok_or_else(|| self.fail(DockerError::Handoff {
                message: "command source already consumed".into(),
            }))?;
        let argv = read_command(source, self.options.handoff_timeout).map_err(|e| self.fail(e))?;
        tracing::info!(command = ?argv, "init command received");

        self.advance(Stage::PivotingRoot);
        let new_root = std::env::current_dir()
            .map_err(|e| self.fail(DockerError::io(".", e)))?;
        tracing::info!(current_location = %new_root.display(), "re-rooting");
        self.root.make_mounts_private().map_err(|e| self.fail(e))?;
        self.root.pivot_root(&new_root).map_err(|e| self.fail(e))?;

        self.advance(Stage::MountingPseudoFilesystems);
        mount_pseudo_filesystems(&self.root, self.options.mount_policy)
            .map_err(|e| self.fail(e))?;

        self.advance(Stage::ResolvingExecutable);
        let program = resolve_executable(&argv[0]).map_err(|e| self.fail(e))?;
        tracing::info!(path = %program.display(), "found executable");

        self.advance(Stage::Replacing);
        replace_process(&program, &argv).map_err(|e| self.fail(e))
    }

    fn advance(&mut self, next: Stage) {
        tracing::debug!(from = %self.stage, to = %next, "bootstrap stage");
        self.stage = next;
    }

    fn fail(&self, source: DockerError) -> BootstrapError {
        tracing::error!(stage = %self.stage, error = %source, "bootstrap failed");
        BootstrapError {
            stage: self.stage,
            source,
        }
    }
}

/// Obtains the argument vector from either invocation shape.
///
/// Pipe contents and a single whitespace-containing argument are split on
/// whitespace; multiple arguments are used as given.
///
/// # Errors
///
/// Returns an error if the handoff fails or the command is empty.
pub fn read_command(source: CommandSource, timeout: Option<Duration>) -> Result<Vec<String>> {
    let argv = match source {
        CommandSource::Handoff(receiver) => handoff::parse_command(&receiver.recv(timeout)?),
        CommandSource::Arguments(args) if args.len() == 1 => handoff::parse_command(&args[0]),
        CommandSource::Arguments(args) => args,
    };
    if argv.is_empty() {
        return Err(DockerError::Handoff {
            message: "init command is empty".into(),
        });
    }
    Ok(argv)
}

/// Resolves `program` against `PATH`, or checks it directly when it
/// contains a `/`.
///
/// # Errors
///
/// Returns [`DockerError::NotFound`] if no executable matches.
pub fn resolve_executable(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| {
        tracing::error!(program, error = %e, "look path failed");
        DockerError::NotFound {
            kind: "executable",
            id: program.to_string(),
        }
    })
}

fn mount_pseudo_filesystems<R: RootFilesystem>(root: &R, policy: MountPolicy) -> Result<()> {
    let mounts: [(&str, fn(&R) -> Result<()>); 2] =
        [("/proc", R::mount_proc), ("/dev", R::mount_dev)];
    for (target, mount_fn) in mounts {
        match (mount_fn(root), policy) {
            (Ok(()), _) => {}
            (Err(e), MountPolicy::BestEffort) => {
                tracing::warn!(target, error = %e, "continuing without pseudo filesystem");
            }
            (Err(e), MountPolicy::Strict) => return Err(e),
        }
    }
    Ok(())
}

fn replace_process(program: &Path, argv: &[String]) -> Result<Infallible> {
    let path = to_cstring(program.as_os_str())?;
    let args = argv
        .iter()
        .map(|a| to_cstring(OsStr::new(a)))
        .collect::<Result<Vec<_>>>()?;
    let env = std::env::vars_os()
        .map(|(key, value)| {
            let mut pair = key;
            pair.push("=");
            pair.push(value);
            to_cstring(&pair)
        })
        .collect::<Result<Vec<_>>>()?;

    let Err(e) = nix::unistd::execve(&path, &args, &env);
    Err(DockerError::io(program, e.into()))
}

fn to_cstring(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| DockerError::Config {
        message: format!("argument contains a NUL byte: {}", value.to_string_lossy()),
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    /// Records each root operation and fails the pseudo mounts on request.
    #[derive(Debug, Default)]
    struct StubRoot {
        fail_proc: bool,
        fail_dev: bool,
        calls: RefCell<Vec<&'static str>>,
    }

    impl StubRoot {
        fn call(&self, name: &'static str, fail: bool) -> Result<()> {
            self.calls.borrow_mut().push(name);
            if fail {
                return Err(DockerError::Mount {
                    target: PathBuf::from(name),
                    message: "not permitted".into(),
                });
            }
            Ok(())
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.borrow().clone()
        }
    }

    impl RootFilesystem for &StubRoot {
        fn make_mounts_private(&self) -> Result<()> {
            self.call("private", false)
        }
        fn pivot_root(&self, _new_root: &Path) -> Result<()> {
            self.call("pivot", false)
        }
        fn mount_proc(&self) -> Result<()> {
            self.call("proc", self.fail_proc)
        }
        fn mount_dev(&self) -> Result<()> {
            self.call("dev", self.fail_dev)
        }
    }

    fn options(mount_policy: MountPolicy) -> BootstrapOptions {
        BootstrapOptions {
            mount_policy,
            handoff_timeout: None,
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn argument_shape_keeps_argv() {
        let argv = read_command(CommandSource::Arguments(args(&["sh", "-c", "ls"])), None)
            .expect("argv");
        assert_eq!(argv, args(&["sh", "-c", "ls"]));
    }

    #[test]
    fn single_argument_is_split_like_the_pipe() {
        let argv = read_command(CommandSource::Arguments(args(&["/bin/sleep 1"])), None)
            .expect("argv");
        assert_eq!(argv, args(&["/bin/sleep", "1"]));
    }

    #[test]
    fn empty_command_is_fatal() {
        assert!(read_command(CommandSource::Arguments(Vec::new()), None).is_err());
        assert!(read_command(CommandSource::Arguments(args(&["  "])), None).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn both_invocation_shapes_resolve_identically() {
        let (tx, rx) = handoff::channel().expect("pipe");
        tx.send(&args(&["sh", "-c", "ls"])).expect("send");

        let from_pipe = read_command(CommandSource::Handoff(rx), None).expect("pipe argv");
        let from_args =
            read_command(CommandSource::Arguments(args(&["sh", "-c", "ls"])), None).expect("argv");
        assert_eq!(from_pipe, from_args);

        let pipe_path = resolve_executable(&from_pipe[0]).expect("sh on PATH");
        let args_path = resolve_executable(&from_args[0]).expect("sh on PATH");
        assert_eq!(pipe_path, args_path);
    }

    #[test]
    fn unknown_program_is_not_found() {
        let err = resolve_executable("simple-docker-no-such-program").unwrap_err();
        assert!(matches!(err, DockerError::NotFound { kind: "executable", .. }));
    }

    #[test]
    fn absolute_program_resolves_to_itself() {
        let sh = resolve_executable("sh").expect("sh on PATH");
        assert_eq!(resolve_executable(sh.to_str().expect("utf-8")).expect("abs"), sh);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn failure_reports_the_stage() {
        let (tx, rx) = handoff::channel().expect("pipe");
        drop(tx);
        let bootstrap = Bootstrap::new(CommandSource::Handoff(rx), BootstrapOptions::default());
        assert_eq!(bootstrap.stage(), Stage::AwaitingCommand);

        let Err(err) = bootstrap.run();
        assert_eq!(err.stage, Stage::AwaitingCommand);
        assert!(err.to_string().starts_with("bootstrap failed while awaiting command"));
    }

    #[test]
    fn strict_policy_stops_at_first_failed_mount() {
        let root = StubRoot {
            fail_proc: true,
            ..StubRoot::default()
        };
        assert!(mount_pseudo_filesystems(&&root, MountPolicy::Strict).is_err());
        assert_eq!(root.calls(), vec!["proc"]);
    }

    #[test]
    fn best_effort_policy_attempts_both_mounts() {
        let root = StubRoot {
            fail_proc: true,
            fail_dev: true,
            ..StubRoot::default()
        };
        assert!(mount_pseudo_filesystems(&&root, MountPolicy::BestEffort).is_ok());
        assert_eq!(root.calls(), vec!["proc", "dev"]);
    }

    #[test]
    fn strict_mount_failure_reports_mounting_stage() {
        let root = StubRoot {
            fail_dev: true,
            ..StubRoot::default()
        };
        let bootstrap = Bootstrap::with_root(
            CommandSource::Arguments(args(&["sh"])),
            options(MountPolicy::Strict),
            &root,
        );
        let Err(err) = bootstrap.run();
        assert_eq!(err.stage, Stage::MountingPseudoFilesystems);
        assert_eq!(root.calls(), vec!["private", "pivot", "proc", "dev"]);
    }

    #[test]
    fn best_effort_continues_to_executable_lookup() {
        let root = StubRoot {
            fail_proc: true,
            fail_dev: true,
            ..StubRoot::default()
        };
        let bootstrap = Bootstrap::with_root(
            CommandSource::Arguments(args(&["simple-docker-no-such-program"])),
            options(MountPolicy::BestEffort),
            &root,
        );
        let Err(err) = bootstrap.run();
        assert_eq!(err.stage, Stage::ResolvingExecutable);
        assert!(matches!(err.source, DockerError::NotFound { kind: "executable", .. }));
        assert_eq!(root.calls(), vec!["private", "pivot", "proc", "dev"]);
    }

    #[test]
    fn options_follow_config() {
        let config = RuntimeConfig {
            mount_policy: MountPolicy::BestEffort,
            handoff_timeout: Some(Duration::from_secs(3)),
            ..RuntimeConfig::default()
        };
        let options = BootstrapOptions::from(&config);
        assert_eq!(options.mount_policy, MountPolicy::BestEffort);
        assert_eq!(options.handoff_timeout, Some(Duration::from_secs(3)));
    }
}
