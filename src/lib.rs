//! Workspace placeholder crate.
//!
//! This crate exposes the song store façade behind the `desktop-shims`
//! feature so host applications can depend on `songbook-workspace` without
//! wiring each member crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
