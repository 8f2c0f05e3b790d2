use camino::Utf8PathBuf;

use crate::bootmode::{BootModeKind, RecoverySystemLabel};
use crate::seed::ComponentType;

/// Failures a caller may need to tell apart from generic I/O or
/// verification errors. These are carried inside [`anyhow::Error`];
/// use `downcast_ref` to recover them.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// `snapd_recovery_mode` has a value we don't know about.
    #[error("cannot use unknown mode {0:?}")]
    UnknownMode(String),
    /// No mode was found on the kernel command line.
    #[error("cannot detect mode nor recovery system to use")]
    ModeUndetected,
    /// `snapd_recovery_system` is not a valid recovery system label.
    #[error("invalid recovery system label {0:?}")]
    InvalidRecoverySystem(String),
    /// The mode needs a recovery system, but none was given.
    #[error("{0} mode requires a recovery system (snapd_recovery_system=)")]
    MissingRecoverySystem(BootModeKind),
    /// The verified seed does not carry a required essential snap.
    #[error("recovery system {label} has no {kind} snap")]
    MissingEssential {
        /// The recovery system which was loaded
        label: RecoverySystemLabel,
        /// The component it lacks
        kind: ComponentType,
    },
    /// Recover mode cannot be set up yet.
    #[error("recover mode mount generation not implemented yet (recovery system {0})")]
    RecoverNotImplemented(RecoverySystemLabel),
    /// Another invocation is running at the same time.
    #[error("another instance is running (lock {0} is held)")]
    ConcurrentInvocation(Utf8PathBuf),
}
