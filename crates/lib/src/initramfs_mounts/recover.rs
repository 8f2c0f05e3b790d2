//! Recover mode.

use anyhow::Result;

use super::InitramfsEnv;
use crate::bootmode::RecoverySystemLabel;
use crate::mountpoint::MountTuple;
use crate::BootstrapError;

/// Recover mode is recognized but has no mount sequence yet; refuse it
/// before touching anything.
pub(super) fn generate_mounts(
    _env: &InitramfsEnv,
    label: &RecoverySystemLabel,
) -> Result<Vec<MountTuple>> {
    tracing::debug!("recover: requested for recovery system {label}");
    Err(BootstrapError::RecoverNotImplemented(label.clone()).into())
}

#[cfg(test)]
mod tests {
    use super::super::testutils::*;
    use super::*;
    use crate::bootmode::BootMode;

    #[test]
    fn test_not_implemented() {
        let (_td, run_mnt) = run_mnt();
        let mounts = FakeMounts::default();
        let seed = FakeSeedLoader::new("20231001");
        let env = InitramfsEnv {
            run_mnt,
            probe: &mounts,
            seed_loader: &seed,
        };
        let mode = BootMode::Recover(Some("20231001".parse().unwrap()));
        let err = super::super::generate_mounts(&env, &mode).unwrap_err();
        match err.downcast_ref::<BootstrapError>() {
            Some(BootstrapError::RecoverNotImplemented(l)) => assert_eq!(l.as_str(), "20231001"),
            o => panic!("unexpected {o:?}"),
        }
        assert_eq!(seed.opened.get(), 0);
        assert_eq!(mounts.count(), 0);
    }
}
