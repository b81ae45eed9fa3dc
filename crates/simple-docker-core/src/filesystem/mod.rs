//! Filesystem management for container isolation.
//!
//! Provides base-layer extraction, `OverlayFS` mounting, `pivot_root` for
//! secure root filesystem switching, and mount utilities.

pub mod layer;
pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
