//! Classification of the boot mode from the kernel command line.

use std::fmt::Display;
use std::str::FromStr;

use anyhow::Result;

use crate::kernel_cmdline::Cmdline;
use crate::BootstrapError;

/// Kernel argument selecting the boot mode.
pub const MODE_KARG: &str = "snapd_recovery_mode";
/// Kernel argument selecting the recovery system to use.
pub const SYSTEM_KARG: &str = "snapd_recovery_system";

/// The name of a boot mode, without any associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootModeKind {
    /// First boot: the system is installed from a recovery system
    Install,
    /// Boot into a recovery system, keeping existing data
    Recover,
    /// Normal boot of an installed system
    Run,
}

impl BootModeKind {
    /// The name as used on the kernel command line and in the modeenv.
    pub const fn as_str(self) -> &'static str {
        match self {
            BootModeKind::Install => "install",
            BootModeKind::Recover => "recover",
            BootModeKind::Run => "run",
        }
    }
}

impl Display for BootModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BootModeKind {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "install" => Ok(Self::Install),
            "recover" => Ok(Self::Recover),
            "run" => Ok(Self::Run),
            o => Err(BootstrapError::UnknownMode(o.to_owned())),
        }
    }
}

/// The label of a recovery system in the seed, e.g. `20231001`.
///
/// Labels are made of ASCII letters and digits, optionally separated by
/// single dashes, and are at least two characters long. This keeps them
/// usable as a single path component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecoverySystemLabel(String);

impl RecoverySystemLabel {
    /// The label as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_label(s: &str) -> bool {
    s.len() >= 2
        && s.bytes().all(|c| c.is_ascii_alphanumeric() || c == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
        && !s.contains("--")
}

impl FromStr for RecoverySystemLabel {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !is_valid_label(s) {
            return Err(BootstrapError::InvalidRecoverySystem(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl Display for RecoverySystemLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The mode this boot runs in.
///
/// Install and recover mode operate on a recovery system; it may be absent
/// on the command line, in which case generating mounts fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootMode {
    /// Install from the given recovery system
    Install(Option<RecoverySystemLabel>),
    /// Recover using the given recovery system
    Recover(Option<RecoverySystemLabel>),
    /// Run the installed system; the choice of base and kernel comes
    /// from the modeenv on the data partition.
    Run,
}

impl BootMode {
    /// The name of this mode.
    pub fn kind(&self) -> BootModeKind {
        match self {
            BootMode::Install(_) => BootModeKind::Install,
            BootMode::Recover(_) => BootModeKind::Recover,
            BootMode::Run => BootModeKind::Run,
        }
    }

    fn new(kind: BootModeKind, label: Option<RecoverySystemLabel>) -> Self {
        match kind {
            BootModeKind::Install => BootMode::Install(label),
            BootModeKind::Recover => BootMode::Recover(label),
            BootModeKind::Run => BootMode::Run,
        }
    }
}

/// Determine the boot mode and recovery system from the kernel command line.
///
/// An empty mode value means install. Scanning stops as soon as run mode
/// is seen, as run mode has no use for a recovery system; otherwise it
/// continues until both the mode and the recovery system were found.
/// The recovery system is only validated once the mode needs it.
pub(crate) fn detect_boot_mode(cmdline: &Cmdline) -> Result<BootMode> {
    let mut kind = None;
    let mut label: Option<&[u8]> = None;
    for param in cmdline.iter() {
        if param.key_is(MODE_KARG) {
            if let Some(v) = param.value {
                let k = match v {
                    b"" => BootModeKind::Install,
                    v => String::from_utf8_lossy(v).parse()?,
                };
                if k == BootModeKind::Run {
                    return Ok(BootMode::Run);
                }
                kind = Some(k);
            }
        } else if param.key_is(SYSTEM_KARG) {
            if let Some(v) = param.value.filter(|v| !v.is_empty()) {
                label = Some(v);
            }
        }
        if kind.is_some() && label.is_some() {
            break;
        }
    }
    let kind = kind.ok_or(BootstrapError::ModeUndetected)?;
    let label = label.map(parse_label).transpose()?;
    if label.is_none() {
        tracing::debug!("No {SYSTEM_KARG} found for {kind} mode");
    }
    Ok(BootMode::new(kind, label))
}

fn parse_label(v: &[u8]) -> Result<RecoverySystemLabel, BootstrapError> {
    std::str::from_utf8(v)
        .map_err(|_| BootstrapError::InvalidRecoverySystem(String::from_utf8_lossy(v).into_owned()))?
        .parse()
}
