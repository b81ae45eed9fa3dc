//! # simple-docker-common
//!
//! Shared configuration record, error definitions, path constants, and
//! domain types used across the simple-docker workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
