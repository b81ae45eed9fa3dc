//! Container lifecycle management for the simple-docker runtime.
//!
//! The [`launcher`] prepares a container, the [`supervisor`] runs it to
//! completion, and [`state`] and [`logs`] expose what it left behind.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod launcher;
pub mod logs;
pub mod process;
pub mod state;
pub mod supervisor;
