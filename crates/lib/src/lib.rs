//! # Early boot mount orchestration
//!
//! This crate implements the logic run from the initramfs of a snap-based
//! system: each invocation inspects what is currently mounted, and either
//! emits the next mounts needed to assemble the root filesystem or emits
//! nothing once everything is in place.
//!
//! There is no state carried between invocations other than the live
//! mount table and the [`modeenv::Modeenv`] written to the data partition.

pub mod bootmode;
pub mod cli;
mod error;
pub mod initramfs_mounts;
mod kernel_cmdline;
pub mod modeenv;
pub mod mountpoint;
pub mod seed;

pub use error::BootstrapError;
