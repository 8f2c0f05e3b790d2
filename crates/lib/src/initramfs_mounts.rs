//! Generation of mount tuples for the initramfs.
//!
//! The initramfs calls us repeatedly. Each call inspects what is mounted
//! right now and prints the next mounts needed, one per line; after
//! performing them, the initramfs calls us again. Empty output means
//! everything is in place.
//!
//! Nothing is remembered between calls: every step is re-derived from the
//! live mount table (and, in run mode, the modeenv), so a call can be
//! repeated at any point, including after a reboot.

use std::io::Write;

use anyhow::Result;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use snap_bootstrap_mount::MountProbe;

use crate::bootmode::{detect_boot_mode, BootMode};
use crate::kernel_cmdline::Cmdline;
use crate::mountpoint::{write_mount_tuples, MountPoint, MountTuple};
use crate::seed::SeedLoader;
use crate::BootstrapError;

mod install;
mod recover;
mod run;

/// Everything the generators need from the outside world.
pub struct InitramfsEnv<'a> {
    /// Root under which all mount points live, normally [`crate::mountpoint::RUN_MNT`]
    pub run_mnt: Utf8PathBuf,
    /// Source of truth for what is mounted
    pub probe: &'a dyn MountProbe,
    /// Opens recovery systems in the seed
    pub seed_loader: &'a dyn SeedLoader,
}

impl std::fmt::Debug for InitramfsEnv<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitramfsEnv")
            .field("run_mnt", &self.run_mnt)
            .finish_non_exhaustive()
    }
}

impl InitramfsEnv<'_> {
    fn path(&self, mp: MountPoint) -> Utf8PathBuf {
        mp.path(&self.run_mnt)
    }

    fn is_mounted(&self, mp: MountPoint) -> Result<bool> {
        let r = self.probe.is_mounted(&self.path(mp))?;
        tracing::trace!("{mp}: mounted={r}");
        Ok(r)
    }

    /// The tuple mounting partition `mp` by label.
    fn partition(&self, mp: MountPoint) -> Result<MountTuple> {
        MountTuple::partition(mp, &self.run_mnt)
            .ok_or_else(|| anyhow::anyhow!("{mp} is not a partition"))
    }
}

/// Compute the mounts still needed for `mode`. An empty result means
/// the mode has converged.
pub fn generate_mounts(env: &InitramfsEnv, mode: &BootMode) -> Result<Vec<MountTuple>> {
    match mode {
        BootMode::Install(Some(label)) => install::generate_mounts(env, label),
        BootMode::Recover(Some(label)) => recover::generate_mounts(env, label),
        BootMode::Install(None) | BootMode::Recover(None) => {
            Err(BootstrapError::MissingRecoverySystem(mode.kind()).into())
        }
        BootMode::Run => run::generate_mounts(env),
    }
}

/// Read the kernel command line once, determine the boot mode and write
/// the mounts still needed to `out`.
#[context("Generating initramfs mounts")]
pub fn initramfs_mounts(env: &InitramfsEnv, cmdline: &Utf8Path, out: impl Write) -> Result<()> {
    let cmdline = Cmdline::from_path(cmdline)?;
    let mode = detect_boot_mode(&cmdline)?;
    tracing::debug!("Boot mode: {mode:?}");
    let tuples = generate_mounts(env, &mode)?;
    if tuples.is_empty() {
        tracing::debug!("{} mode: nothing left to mount", mode.kind());
    }
    write_mount_tuples(out, &tuples)
}
