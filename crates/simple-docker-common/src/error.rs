//! Unified error types for the simple-docker workspace.
//!
//! Higher-level crates wrap these variants in their own error types when they
//! need to carry extra context (the bootstrap attaches the stage it failed in).

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum DockerError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A privileged operation was refused by the kernel.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A mount or unmount syscall failed.
    #[error("mount operation on {target} failed: {message}")]
    Mount {
        /// Mount point the operation targeted.
        target: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The command handoff between supervisor and container failed.
    #[error("command handoff failed: {message}")]
    Handoff {
        /// Description of the failure.
        message: String,
    },

    /// One or more workspace steps failed.
    #[error("workspace incomplete: {message}")]
    Workspace {
        /// Summary of the failed steps.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl DockerError {
    /// Builds an [`DockerError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, DockerError>;
