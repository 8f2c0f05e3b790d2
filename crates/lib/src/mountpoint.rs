//! Well-known mount points and the instructions we emit for them.

use std::fmt::Display;
use std::io::Write;

use anyhow::{anyhow, Result};
use camino::{Utf8Path, Utf8PathBuf};
use snap_bootstrap_utils::PathQuotedDisplay;

/// The directory under which everything is mounted in the initramfs.
pub const RUN_MNT: &str = "/run/mnt";
/// Stable device paths for partitions, by filesystem label.
pub const DISK_BY_LABEL: &str = "/dev/disk/by-label";

/// A location under the runtime mount root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MountPoint {
    /// The seed partition holding the recovery systems
    UbuntuSeed,
    /// The partition holding the boot assets of the installed system
    UbuntuBoot,
    /// The writable data partition
    UbuntuData,
    /// The base snap
    Base,
    /// The kernel snap
    Kernel,
    /// The snapd snap
    Snapd,
}

impl MountPoint {
    /// The directory name under the mount root. For partitions this is
    /// also the filesystem label.
    pub const fn name(self) -> &'static str {
        match self {
            MountPoint::UbuntuSeed => "ubuntu-seed",
            MountPoint::UbuntuBoot => "ubuntu-boot",
            MountPoint::UbuntuData => "ubuntu-data",
            MountPoint::Base => "base",
            MountPoint::Kernel => "kernel",
            MountPoint::Snapd => "snapd",
        }
    }

    /// The absolute path of this mount point under `run_mnt`.
    pub fn path(self, run_mnt: &Utf8Path) -> Utf8PathBuf {
        run_mnt.join(self.name())
    }

    /// The by-label device backing this mount point, if it is a partition.
    pub fn partition_device(self) -> Option<Utf8PathBuf> {
        match self {
            MountPoint::UbuntuSeed | MountPoint::UbuntuBoot | MountPoint::UbuntuData => {
                Some(Utf8Path::new(DISK_BY_LABEL).join(self.name()))
            }
            MountPoint::Base | MountPoint::Kernel | MountPoint::Snapd => None,
        }
    }
}

impl Display for MountPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One mount instruction for the initramfs.
///
/// Rendered as `<source> <target>`, or `--type=<fstype> <source> <target>`
/// when the filesystem type must be given explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTuple {
    /// Explicit filesystem type, if any
    pub fstype: Option<String>,
    /// What to mount: a device, an image file, or a pseudo source like `tmpfs`
    pub source: String,
    /// Where to mount it
    pub target: Utf8PathBuf,
}

impl MountTuple {
    /// Mount `source` at `target`, letting the filesystem type be probed.
    pub fn new(source: impl Into<String>, target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fstype: None,
            source: source.into(),
            target: target.into(),
        }
    }

    /// Mount the partition backing `mp` by its label.
    ///
    /// Returns `None` if `mp` is not a partition.
    pub fn partition(mp: MountPoint, run_mnt: &Utf8Path) -> Option<Self> {
        let dev = mp.partition_device()?;
        Some(Self::new(dev.into_string(), mp.path(run_mnt)))
    }

    /// A fresh, empty tmpfs at `target`.
    pub fn tmpfs(target: impl Into<Utf8PathBuf>) -> Self {
        Self {
            fstype: Some("tmpfs".into()),
            ..Self::new("tmpfs", target)
        }
    }

    /// Verify this can be expressed as a single whitespace separated line.
    pub fn validate(&self) -> Result<()> {
        let fields = self
            .fstype
            .iter()
            .map(String::as_str)
            .chain([self.source.as_str(), self.target.as_str()]);
        for field in fields {
            if field.is_empty() || field.chars().any(char::is_whitespace) {
                return Err(anyhow!(
                    "Cannot express mount field {} in a mount instruction",
                    PathQuotedDisplay::new(field)
                ));
            }
        }
        Ok(())
    }
}

impl Display for MountTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(fstype) = self.fstype.as_deref() {
            write!(f, "--type={fstype} ")?;
        }
        write!(f, "{} {}", self.source, self.target)
    }
}

/// Write mount instructions, one per line.
///
/// Every tuple is validated before anything is written, so invalid input
/// never results in partial output.
pub fn write_mount_tuples(mut out: impl Write, tuples: &[MountTuple]) -> Result<()> {
    for t in tuples {
        t.validate()?;
    }
    for t in tuples {
        writeln!(out, "{t}")?;
    }
    Ok(())
}
