//! Run mode: mount the partitions of the installed system, then the base
//! and kernel snaps recorded in its modeenv.

use anyhow::{anyhow, ensure, Context, Result};
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use fn_error_context::context;

use super::InitramfsEnv;
use crate::modeenv::{Modeenv, SNAP_BLOB_DIR, SYSTEM_DATA};
use crate::mountpoint::{MountPoint, MountTuple};

#[context("Generating run mode mounts")]
pub(super) fn generate_mounts(env: &InitramfsEnv) -> Result<Vec<MountTuple>> {
    // 1. the seed and boot partitions
    let mut tuples = Vec::new();
    for mp in [MountPoint::UbuntuSeed, MountPoint::UbuntuBoot] {
        if !env.is_mounted(mp)? {
            tuples.push(env.partition(mp)?);
        }
    }
    if !tuples.is_empty() {
        tracing::debug!("run: {} partition(s) not mounted", tuples.len());
        return Ok(tuples);
    }

    // 2. the data partition
    if !env.is_mounted(MountPoint::UbuntuData)? {
        tracing::debug!("run: data partition not mounted");
        return Ok(vec![env.partition(MountPoint::UbuntuData)?]);
    }

    // 3. base and kernel as chosen by the modeenv
    let data = env.path(MountPoint::UbuntuData);
    let root = data.join(SYSTEM_DATA);
    let modeenv = Dir::open_ambient_dir(&root, cap_std::ambient_authority())
        .with_context(|| format!("Opening {root}"))
        .and_then(|d| Modeenv::read_from(&d))?;
    let blobs = root.join(SNAP_BLOB_DIR);
    let choices = [
        (MountPoint::Base, "base", &modeenv.base),
        (MountPoint::Kernel, "kernel", &modeenv.kernel),
    ];
    for (mp, key, value) in choices {
        if env.is_mounted(mp)? {
            continue;
        }
        let name = value
            .as_deref()
            .ok_or_else(|| anyhow!("No {key} set in modeenv"))?;
        ensure!(
            !name.contains('/') && name != "." && name != "..",
            "Invalid {key} in modeenv: {name:?}"
        );
        tracing::debug!("run: {mp} from {name}");
        tuples.push(MountTuple::new(blobs.join(name).into_string(), env.path(mp)));
    }

    // 4. done once both are mounted
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use camino::{Utf8Path, Utf8PathBuf};

    use super::super::testutils::*;
    use super::*;
    use crate::bootmode::BootModeKind;
    use crate::modeenv::MODEENV_PATH;

    const MODEENV: &str = indoc::indoc! { "
        mode=run
        recovery_system=20191118
        base=core20_5.snap
        kernel=pc-kernel_10.snap
    "};

    fn write_modeenv(run_mnt: &Utf8Path, contents: &str) -> Utf8PathBuf {
        let p = run_mnt
            .join("ubuntu-data")
            .join(SYSTEM_DATA)
            .join(MODEENV_PATH);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(&p, contents).unwrap();
        p
    }

    #[test]
    fn test_run_boot() -> Result<()> {
        let (_td, run_mnt) = run_mnt();
        let mounts = FakeMounts::default();
        let seed = FakeSeedLoader::new("20191118");
        let env = InitramfsEnv {
            run_mnt: run_mnt.clone(),
            probe: &mounts,
            seed_loader: &seed,
        };

        let tuples = generate_mounts(&env)?;
        let expected = indoc::indoc! { "
            /dev/disk/by-label/ubuntu-seed @/ubuntu-seed
            /dev/disk/by-label/ubuntu-boot @/ubuntu-boot
        "}
        .replace('@', run_mnt.as_str());
        similar_asserts::assert_eq!(render(&tuples), expected);
        mounts.perform(&tuples);

        let tuples = generate_mounts(&env)?;
        similar_asserts::assert_eq!(
            render(&tuples),
            format!("/dev/disk/by-label/ubuntu-data {run_mnt}/ubuntu-data\n")
        );
        mounts.perform(&tuples);
        let modeenv = write_modeenv(&run_mnt, MODEENV);

        let tuples = generate_mounts(&env)?;
        let expected = indoc::indoc! { "
            @/ubuntu-data/system-data/var/lib/snapd/snaps/core20_5.snap @/base
            @/ubuntu-data/system-data/var/lib/snapd/snaps/pc-kernel_10.snap @/kernel
        "}
        .replace('@', run_mnt.as_str());
        similar_asserts::assert_eq!(render(&tuples), expected);
        // Repeating gives the same answer
        assert_eq!(generate_mounts(&env)?, tuples);
        mounts.perform(&tuples);

        assert!(generate_mounts(&env)?.is_empty());
        assert_eq!(mounts.count(), 5);
        // Run mode never opens the seed nor touches the modeenv
        assert_eq!(seed.opened.get(), 0);
        assert_eq!(std::fs::read_to_string(modeenv)?, MODEENV);
        Ok(())
    }

    #[test]
    fn test_partial() -> Result<()> {
        let (_td, run_mnt) = run_mnt();
        let mounts = FakeMounts::default();
        let seed = FakeSeedLoader::new("20191118");
        let env = InitramfsEnv {
            run_mnt: run_mnt.clone(),
            probe: &mounts,
            seed_loader: &seed,
        };
        mounts.mount(&run_mnt.join("ubuntu-seed"));
        let tuples = generate_mounts(&env)?;
        similar_asserts::assert_eq!(
            render(&tuples),
            format!("/dev/disk/by-label/ubuntu-boot {run_mnt}/ubuntu-boot\n")
        );

        mounts.mount(&run_mnt.join("ubuntu-boot"));
        mounts.mount(&run_mnt.join("ubuntu-data"));
        mounts.mount(&run_mnt.join("base"));
        write_modeenv(&run_mnt, MODEENV);
        let tuples = generate_mounts(&env)?;
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].target, run_mnt.join("kernel"));
        Ok(())
    }

    #[test]
    fn test_bad_modeenv() {
        let (_td, run_mnt) = run_mnt();
        let mounts = FakeMounts::default();
        let seed = FakeSeedLoader::new("20191118");
        let env = InitramfsEnv {
            run_mnt: run_mnt.clone(),
            probe: &mounts,
            seed_loader: &seed,
        };
        for mp in ["ubuntu-seed", "ubuntu-boot", "ubuntu-data"] {
            mounts.mount(&run_mnt.join(mp));
        }

        // Missing entirely
        let err = generate_mounts(&env).unwrap_err();
        assert!(format!("{err:#}").contains("Opening"), "{err:#}");
        std::fs::create_dir_all(run_mnt.join("ubuntu-data").join(SYSTEM_DATA)).unwrap();
        let err = generate_mounts(&env).unwrap_err();
        assert!(format!("{err:#}").contains("Reading modeenv"), "{err:#}");

        for bad in [
            "garbage\n",
            "mode=run\nkernel=pc-kernel_10.snap\n",
            "mode=run\nbase=\nkernel=pc-kernel_10.snap\n",
            "mode=run\nbase=../../../core20_5.snap\nkernel=pc-kernel_10.snap\n",
            "mode=run\nbase=core20_5.snap\nkernel=..\n",
        ] {
            write_modeenv(&run_mnt, bad);
            assert!(generate_mounts(&env).is_err(), "{bad:?}");
        }

        // Only what is still needed has to be valid
        mounts.mount(&run_mnt.join("base"));
        write_modeenv(&run_mnt, "mode=run\nkernel=pc-kernel_10.snap\n");
        assert_eq!(generate_mounts(&env).unwrap().len(), 1);
    }

    #[test]
    fn test_install_modeenv() -> Result<()> {
        // The mode recorded in the modeenv does not matter, the kernel
        // command line decides
        let (_td, run_mnt) = run_mnt();
        let mounts = FakeMounts::default();
        let seed = FakeSeedLoader::new("20191118");
        let env = InitramfsEnv {
            run_mnt: run_mnt.clone(),
            probe: &mounts,
            seed_loader: &seed,
        };
        for mp in ["ubuntu-seed", "ubuntu-boot", "ubuntu-data"] {
            mounts.mount(&run_mnt.join(mp));
        }
        let contents = MODEENV.replace("mode=run", "mode=install");
        write_modeenv(&run_mnt, &contents);
        let tuples = generate_mounts(&env)?;
        assert_eq!(tuples.len(), 2);
        let root = open_dir(&run_mnt.join("ubuntu-data").join(SYSTEM_DATA));
        assert_eq!(Modeenv::read_from(&root)?.mode, BootModeKind::Install);
        Ok(())
    }
}
