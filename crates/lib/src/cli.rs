//! # snap-bootstrap command line
//!
//! Command line tool run from the initramfs.

use std::ffi::OsString;
use std::fs::File;
use std::io::Write;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use fn_error_context::context;
use rustix::fs::FlockOperation;
use snap_bootstrap_mount::{MountInfoProbe, PROC_SELF_MOUNTINFO};

use crate::initramfs_mounts::{initramfs_mounts, InitramfsEnv};
use crate::kernel_cmdline::PROC_CMDLINE;
use crate::mountpoint::RUN_MNT;
use crate::seed::Seed20Loader;
use crate::BootstrapError;

/// Held for the duration of one invocation.
pub const LOCK_FILE: &str = "/run/snap-bootstrap-initramfs-mounts.lock";

/// Options for generating initramfs mounts.
#[derive(Debug, Parser, PartialEq, Eq)]
pub struct InitramfsMountsOpts {
    /// Read the kernel command line from this file
    #[clap(long, default_value = PROC_CMDLINE)]
    pub cmdline: Utf8PathBuf,

    /// The directory under which everything gets mounted
    #[clap(long, default_value = RUN_MNT)]
    pub run_mnt: Utf8PathBuf,

    /// The mount table used to decide what is already mounted
    #[clap(long, default_value = PROC_SELF_MOUNTINFO)]
    pub mountinfo: Utf8PathBuf,

    /// Refuse to run while another invocation holds this lock
    #[clap(long, default_value = LOCK_FILE)]
    pub lock_file: Utf8PathBuf,
}

/// Bootstrap a snap-based system from the initramfs.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "snap-bootstrap", version)]
pub enum Opt {
    /// Print the next mounts needed to assemble the root filesystem.
    ///
    /// Mounts are printed one per line as `[--type=FSTYPE] SOURCE TARGET`.
    /// Once no output is produced, everything is in place.
    InitramfsMounts(InitramfsMountsOpts),
}

/// Take the invocation lock, failing immediately if it is held.
#[context("Locking {path}")]
fn lock_invocation(path: &Utf8Path) -> Result<File> {
    let f = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    match rustix::fs::flock(&f, FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => {}
        Err(e) if e == rustix::io::Errno::WOULDBLOCK => {
            return Err(BootstrapError::ConcurrentInvocation(path.to_owned()).into());
        }
        Err(e) => return Err(e.into()),
    }
    tracing::debug!("Obtained exclusive lock");
    Ok(f)
}

/// Implementation of `initramfs-mounts`.
pub fn run_initramfs_mounts(opts: &InitramfsMountsOpts, out: impl Write) -> Result<()> {
    let _lock = lock_invocation(&opts.lock_file)?;
    let probe = MountInfoProbe::new(opts.mountinfo.clone());
    let env = InitramfsEnv {
        run_mnt: opts.run_mnt.clone(),
        probe: &probe,
        seed_loader: &Seed20Loader,
    };
    initramfs_mounts(&env, &opts.cmdline, out)
}

/// Parse the provided arguments and execute.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

fn run_from_opt(opt: Opt) -> Result<()> {
    match opt {
        Opt::InitramfsMounts(opts) => {
            let mut stdout = std::io::stdout().lock();
            run_initramfs_mounts(&opts, &mut stdout)?;
            stdout.flush().context("Flushing stdout")
        }
    }
}
