//! The modeenv records which boot mode and which essential snaps were
//! chosen. It lives on the data partition, is written at the end of
//! install mode and is read on every subsequent boot in run mode.
//!
//! The format is one `key=value` per line.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::io::Write as _;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt as _;
use fn_error_context::context;

use crate::bootmode::BootModeKind;

/// The directory on the data partition holding the system root.
pub const SYSTEM_DATA: &str = "system-data";
/// Path of the modeenv, relative to the system root.
pub const MODEENV_PATH: &str = "var/lib/snapd/modeenv";
/// Directory holding installed snap files, relative to the system root.
pub const SNAP_BLOB_DIR: &str = "var/lib/snapd/snaps";

const KEY_MODE: &str = "mode";
const KEY_RECOVERY_SYSTEM: &str = "recovery_system";
const KEY_BASE: &str = "base";
const KEY_KERNEL: &str = "kernel";

/// The persisted boot mode state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modeenv {
    /// The mode the system was last set up for
    pub mode: BootModeKind,
    /// Label of the recovery system used by install or recover mode
    pub recovery_system: Option<String>,
    /// File name of the base snap in the snap blob directory
    pub base: Option<String>,
    /// File name of the kernel snap in the snap blob directory
    pub kernel: Option<String>,
    /// Keys we don't know about, kept so that rewriting the file
    /// does not drop state owned by later boot stages
    pub extra: BTreeMap<String, String>,
}

impl Modeenv {
    /// A modeenv for `mode` with nothing else set.
    pub fn new(mode: BootModeKind) -> Self {
        Self {
            mode,
            recovery_system: None,
            base: None,
            kernel: None,
            extra: BTreeMap::new(),
        }
    }

    /// Read the modeenv from a system root (e.g. `<data>/system-data`).
    #[context("Reading modeenv")]
    pub fn read_from(root: &Dir) -> Result<Self> {
        let s = root
            .read_to_string(MODEENV_PATH)
            .with_context(|| format!("Reading {MODEENV_PATH}"))?;
        s.parse()
    }

    /// Write the modeenv to a system root, creating parent directories.
    /// The file is replaced atomically.
    #[context("Writing modeenv")]
    pub fn write_to(&self, root: &Dir) -> Result<()> {
        root.create_dir_all("var/lib/snapd")?;
        root.atomic_replace_with(MODEENV_PATH, |f| {
            write!(f, "{self}")?;
            anyhow::Ok(())
        })
    }
}

impl FromStr for Modeenv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut mode = None;
        let mut r = Modeenv::new(BootModeKind::Install);
        let mut seen = BTreeSet::new();
        for (i, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (k, v) = line
                .split_once('=')
                .ok_or_else(|| anyhow!("Malformed modeenv line {}: {line:?}", i + 1))?;
            let (k, v) = (k.trim(), v.trim());
            if !seen.insert(k) {
                anyhow::bail!("Duplicate modeenv key {k:?} on line {}", i + 1);
            }
            let value = (!v.is_empty()).then(|| v.to_owned());
            match k {
                KEY_MODE => mode = Some(v.parse::<BootModeKind>()?),
                KEY_RECOVERY_SYSTEM => r.recovery_system = value,
                KEY_BASE => r.base = value,
                KEY_KERNEL => r.kernel = value,
                _ => {
                    r.extra.insert(k.to_owned(), v.to_owned());
                }
            }
        }
        r.mode = mode.ok_or_else(|| anyhow!("Missing {KEY_MODE} in modeenv"))?;
        Ok(r)
    }
}

impl Display for Modeenv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{KEY_MODE}={}", self.mode)?;
        let known = [
            (KEY_RECOVERY_SYSTEM, &self.recovery_system),
            (KEY_BASE, &self.base),
            (KEY_KERNEL, &self.kernel),
        ];
        for (k, v) in known {
            if let Some(v) = v {
                writeln!(f, "{k}={v}")?;
            }
        }
        for (k, v) in &self.extra {
            writeln!(f, "{k}={v}")?;
        }
        Ok(())
    }
}
