//! Install mode: mount the seed and the essential snaps of the chosen
//! recovery system, create an ephemeral data partition and record the
//! mode there.

use anyhow::{Context, Result};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use fn_error_context::context;

use super::InitramfsEnv;
use crate::bootmode::{BootModeKind, RecoverySystemLabel};
use crate::modeenv::{Modeenv, SYSTEM_DATA};
use crate::mountpoint::{MountPoint, MountTuple};
use crate::seed::ComponentType;
use crate::BootstrapError;

#[context("Generating install mode mounts for recovery system {label}")]
pub(super) fn generate_mounts(
    env: &InitramfsEnv,
    label: &RecoverySystemLabel,
) -> Result<Vec<MountTuple>> {
    // 1. the seed partition
    if !env.is_mounted(MountPoint::UbuntuSeed)? {
        tracing::debug!("install: seed partition not mounted");
        return Ok(vec![env.partition(MountPoint::UbuntuSeed)?]);
    }

    // 2. the essential snaps of the recovery system
    let mut pending = Vec::new();
    for kind in ComponentType::ALL {
        if !env.is_mounted(kind.mount_point())? {
            pending.push(kind);
        }
    }
    if !pending.is_empty() {
        tracing::debug!("install: essential snaps not mounted: {pending:?}");
        return essential_mounts(env, label, &pending);
    }

    // 3. an empty data partition
    if !env.is_mounted(MountPoint::UbuntuData)? {
        tracing::debug!("install: data partition not created");
        return Ok(vec![MountTuple::tmpfs(env.path(MountPoint::UbuntuData))]);
    }

    // 4. record the mode, which is the last thing we do
    let mut modeenv = Modeenv::new(BootModeKind::Install);
    modeenv.recovery_system = Some(label.to_string());
    let data = env.path(MountPoint::UbuntuData);
    let data = Dir::open_ambient_dir(&data, cap_std::ambient_authority())
        .with_context(|| format!("Opening {data}"))?;
    data.create_dir_all(SYSTEM_DATA)?;
    modeenv.write_to(&data.open_dir(SYSTEM_DATA)?)?;
    tracing::debug!("install: wrote modeenv");

    // 5. done
    Ok(Vec::new())
}

/// Load and verify the recovery system and mount its essential snaps
/// of the `pending` types.
fn essential_mounts(
    env: &InitramfsEnv,
    label: &RecoverySystemLabel,
    pending: &[ComponentType],
) -> Result<Vec<MountTuple>> {
    let seed_dir = env.path(MountPoint::UbuntuSeed);
    let mut seed = env.seed_loader.open(&seed_dir, label)?;
    seed.load_assertions()?;
    seed.load_meta()?;
    let components = seed.essential_components();
    pending
        .iter()
        .map(|&kind| -> Result<MountTuple> {
            let c = components
                .iter()
                .find(|c| c.kind == kind)
                .ok_or_else(|| BootstrapError::MissingEssential {
                    label: label.clone(),
                    kind,
                })?;
            tracing::debug!("install: {kind} is {}", c.identity);
            Ok(MountTuple::new(
                c.path.as_str(),
                env.path(kind.mount_point()),
            ))
        })
        .collect()
}
