//! # simple-docker-core
//!
//! Low-level Linux isolation primitives for the simple-docker runtime.
//!
//! This crate provides:
//! - **Workspace**: the overlay root filesystem of a container, with an
//!   optional volume bind mount, and its teardown.
//! - **Handoff**: the one-shot pipe that carries the command into the
//!   container.
//! - **Bootstrap**: the in-namespace init sequence ending in `execve`.
//! - **Namespaces** and **cgroups v2** for isolation and resource limits.
//!
//! Unsafe system calls are wrapped with `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod cgroup;
pub mod filesystem;
pub mod handoff;
pub mod namespace;
pub mod workspace;
