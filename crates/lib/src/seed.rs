//! Access to the essential snaps of a recovery system in the seed.
//!
//! Generators only depend on the [`SeedLoader`] and [`Seed`] traits; the
//! surrounding system decides which implementation backs them.
//! [`Seed20Loader`] reads the on-disk seed layout:
//!
//! ```text
//! <seed>/snaps/<name>_<revision>.snap
//! <seed>/systems/<label>/model
//! ```

use std::fmt::Display;

use anyhow::{anyhow, ensure, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;

use crate::bootmode::RecoverySystemLabel;
use crate::mountpoint::MountPoint;

/// The role of an essential snap.
///
/// The declaration order is the order in which components are mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComponentType {
    /// The management daemon (snapd)
    ManagementDaemon,
    /// The kernel
    Kernel,
    /// The base, i.e. the root filesystem
    Base,
}

impl ComponentType {
    /// Every component type, in mount order.
    pub const ALL: [ComponentType; 3] = [
        ComponentType::ManagementDaemon,
        ComponentType::Kernel,
        ComponentType::Base,
    ];

    /// Where this component gets mounted.
    pub const fn mount_point(self) -> MountPoint {
        match self {
            ComponentType::ManagementDaemon => MountPoint::Snapd,
            ComponentType::Kernel => MountPoint::Kernel,
            ComponentType::Base => MountPoint::Base,
        }
    }

    /// The snap type as declared in a model.
    pub const fn snap_type(self) -> &'static str {
        match self {
            ComponentType::ManagementDaemon => "snapd",
            ComponentType::Kernel => "kernel",
            ComponentType::Base => "base",
        }
    }

    fn from_snap_type(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.snap_type() == s)
    }
}

impl Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.snap_type())
    }
}

/// An essential snap resolved from the seed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EssentialComponent {
    /// Path to the snap file
    pub path: Utf8PathBuf,
    /// The declared type
    pub kind: ComponentType,
    /// Identifies the snap and revision, e.g. `core20_5.snap`
    pub identity: String,
}

/// A recovery system opened from a seed.
pub trait Seed {
    /// Load and verify the assertions of the recovery system.
    fn load_assertions(&mut self) -> Result<()>;
    /// Load the metadata of the snaps in the recovery system. Must be
    /// called after [`Seed::load_assertions`].
    fn load_meta(&mut self) -> Result<()>;
    /// The essential components found by [`Seed::load_meta`]; empty if
    /// the metadata has not been loaded.
    fn essential_components(&self) -> &[EssentialComponent];
}

/// Opens recovery systems in a seed.
pub trait SeedLoader {
    /// Open the recovery system `label` of the seed mounted at `seed_dir`.
    fn open(&self, seed_dir: &Utf8Path, label: &RecoverySystemLabel) -> Result<Box<dyn Seed>>;
}

/// Header of a model assertion; only the parts we need.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Model {
    #[serde(rename = "type")]
    assertion_type: String,
    authority_id: String,
    brand_id: String,
    model: String,
    base: String,
    #[serde(default)]
    snaps: Vec<ModelSnap>,
}

#[derive(Debug, Deserialize)]
struct ModelSnap {
    name: String,
    #[serde(rename = "type")]
    snap_type: String,
}

/// Parse and sanity check the header block of a model assertion.
fn parse_model(s: &str) -> Result<Model> {
    // Headers end at the first empty line; what follows is the
    // body and signature.
    let headers = s.split_once("\n\n").map(|(h, _)| h).unwrap_or(s);
    let model: Model = serde_yaml::from_str(headers).context("Parsing model headers")?;
    ensure!(
        model.assertion_type == "model",
        "Unexpected assertion type {:?}",
        model.assertion_type
    );
    for (name, v) in [
        ("authority-id", &model.authority_id),
        ("brand-id", &model.brand_id),
        ("model", &model.model),
        ("base", &model.base),
    ] {
        ensure!(!v.is_empty(), "Empty {name} in model");
    }
    for snap in &model.snaps {
        ensure!(
            !snap.name.is_empty() && !snap.snap_type.is_empty(),
            "Model snap entries need a name and a type"
        );
    }
    Ok(model)
}

/// Find the single `<name>_<revision>.snap` among `files`.
fn find_snap_file<'a>(files: &'a [String], name: &str) -> Result<&'a str> {
    let prefix = format!("{name}_");
    let mut candidates = files.iter().filter(|f| {
        f.strip_prefix(&prefix)
            .and_then(|r| r.strip_suffix(".snap"))
            .is_some_and(|rev| !rev.is_empty() && !rev.contains('_'))
    });
    let found = candidates
        .next()
        .ok_or_else(|| anyhow!("No snap file for {name}"))?;
    if let Some(other) = candidates.next() {
        anyhow::bail!("Multiple snap files for {name}: {found}, {other}");
    }
    Ok(found)
}

/// Loads recovery systems from a seed directory.
#[derive(Debug, Default)]
pub struct Seed20Loader;

impl SeedLoader for Seed20Loader {
    #[context("Opening recovery system {label}")]
    fn open(&self, seed_dir: &Utf8Path, label: &RecoverySystemLabel) -> Result<Box<dyn Seed>> {
        let system_dir = seed_dir.join("systems").join(label.as_str());
        ensure!(
            system_dir.is_dir(),
            "Cannot find recovery system {label} in {seed_dir}"
        );
        Ok(Box::new(Seed20 {
            seed_dir: seed_dir.to_owned(),
            system_dir,
            model: None,
            essentials: Vec::new(),
        }))
    }
}

#[derive(Debug)]
struct Seed20 {
    seed_dir: Utf8PathBuf,
    system_dir: Utf8PathBuf,
    model: Option<Model>,
    essentials: Vec<EssentialComponent>,
}

impl Seed for Seed20 {
    #[context("Loading recovery system assertions")]
    fn load_assertions(&mut self) -> Result<()> {
        let path = self.system_dir.join("model");
        let s = std::fs::read_to_string(&path).with_context(|| format!("Reading {path}"))?;
        let model = parse_model(&s)?;
        tracing::debug!(
            "Loaded model {}/{} (authority {})",
            model.brand_id,
            model.model,
            model.authority_id
        );
        self.model = Some(model);
        Ok(())
    }

    #[context("Loading recovery system snap metadata")]
    fn load_meta(&mut self) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| anyhow!("Assertions have not been loaded"))?;
        let snaps_dir = self.seed_dir.join("snaps");
        let files = snaps_dir
            .read_dir_utf8()
            .with_context(|| format!("Reading {snaps_dir}"))?
            .map(|e| Ok(e?.file_name().to_owned()))
            .collect::<Result<Vec<String>>>()?;

        let mut essentials = Vec::new();
        for snap in &model.snaps {
            let Some(kind) = ComponentType::from_snap_type(&snap.snap_type) else {
                continue;
            };
            if kind == ComponentType::Base {
                ensure!(
                    snap.name == model.base,
                    "Model base {} does not match base snap {}",
                    model.base,
                    snap.name
                );
            }
            ensure!(
                !essentials.iter().any(|c: &EssentialComponent| c.kind == kind),
                "Model lists more than one {kind} snap"
            );
            let identity = find_snap_file(&files, &snap.name)?.to_owned();
            essentials.push(EssentialComponent {
                path: snaps_dir.join(&identity),
                kind,
                identity,
            });
        }
        essentials.sort_by_key(|c| c.kind);
        self.essentials = essentials;
        Ok(())
    }

    fn essential_components(&self) -> &[EssentialComponent] {
        &self.essentials
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = indoc::indoc! { r#"
        type: model
        authority-id: canonical
        series: 16
        brand-id: canonical
        model: ubuntu-core-20-amd64
        architecture: amd64
        base: core20
        grade: signed
        snaps:
          -
            default-channel: 20/stable
            id: UqFziVZDHLSyO3TqSWgNBoAdHbLI4dAH
            name: pc
            type: gadget
          -
            default-channel: 20/stable
            id: pYVQrBcKmBa0mZ4CCN7ExT6jH8rY1hza
            name: pc-kernel
            type: kernel
          -
            default-channel: latest/stable
            id: DLqre5XGLbDqg9jPtiAhRRjDuPVa5X1q
            name: core20
            type: base
          -
            default-channel: latest/stable
            id: PMrrV4ml8uWuEUDBT8dSGnKUYbevVhc4
            name: snapd
            type: snapd
        timestamp: 2019-11-18T00:00:00+00:00
        sign-key-sha3-384: 9tydnLa6MTJ-jaQTFUXEwHl1yRx7ZS4K5cyFDhYDcPzhS7uyEkDxdUjg9g08BtNn

        AcLBXAQAAQoABgUCXdLVBwAKCRDgT5vottzAEgF4EACDH5SSDiCMkTMjjEaiOvmzKiuG
    "# };

    fn setup_seed(model: &str, snaps: &[&str]) -> Result<(tempfile::TempDir, Utf8PathBuf)> {
        let td = tempfile::tempdir()?;
        let seed = Utf8Path::from_path(td.path()).unwrap().to_owned();
        std::fs::create_dir_all(seed.join("systems/20191118"))?;
        std::fs::write(seed.join("systems/20191118/model"), model)?;
        std::fs::create_dir_all(seed.join("snaps"))?;
        for s in snaps {
            std::fs::write(seed.join("snaps").join(s), b"")?;
        }
        Ok((td, seed))
    }

    fn label() -> RecoverySystemLabel {
        "20191118".parse().unwrap()
    }

    fn load(seed: &Utf8Path) -> Result<Vec<EssentialComponent>> {
        let mut s = Seed20Loader.open(seed, &label())?;
        s.load_assertions()?;
        s.load_meta()?;
        Ok(s.essential_components().to_vec())
    }

    const SNAPS: &[&str] = &[
        "pc_1.snap",
        "pc-kernel_1.snap",
        "core20_1.snap",
        "snapd_1.snap",
    ];

    #[test]
    fn test_load_essentials() -> Result<()> {
        let (_td, seed) = setup_seed(MODEL, SNAPS)?;
        let components = load(&seed)?;
        let found: Vec<_> = components
            .iter()
            .map(|c| (c.kind, c.identity.as_str()))
            .collect();
        assert_eq!(
            found,
            [
                (ComponentType::ManagementDaemon, "snapd_1.snap"),
                (ComponentType::Kernel, "pc-kernel_1.snap"),
                (ComponentType::Base, "core20_1.snap"),
            ]
        );
        assert_eq!(components[2].path, seed.join("snaps/core20_1.snap"));
        Ok(())
    }

    #[test]
    fn test_essentials_empty_before_meta() -> Result<()> {
        let (_td, seed) = setup_seed(MODEL, SNAPS)?;
        let mut s = Seed20Loader.open(&seed, &label())?;
        assert!(s.essential_components().is_empty());
        // Metadata needs the model
        assert!(s.load_meta().is_err());
        s.load_assertions()?;
        assert!(s.essential_components().is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_system() -> Result<()> {
        let (_td, seed) = setup_seed(MODEL, SNAPS)?;
        let err = Seed20Loader
            .open(&seed, &"20200101".parse().unwrap())
            .err()
            .unwrap();
        assert!(format!("{err:#}").contains("Cannot find recovery system 20200101"));
        Ok(())
    }

    #[test]
    fn test_missing_or_ambiguous_snap() -> Result<()> {
        let (_td, seed) = setup_seed(MODEL, &["pc-kernel_1.snap", "core20_1.snap"])?;
        let err = load(&seed).unwrap_err();
        assert!(format!("{err:#}").contains("No snap file for snapd"));

        let (_td, seed) = setup_seed(
            MODEL,
            &[
                "pc-kernel_1.snap",
                "core20_1.snap",
                "snapd_1.snap",
                "snapd_2.snap",
            ],
        )?;
        let err = load(&seed).unwrap_err();
        assert!(format!("{err:#}").contains("Multiple snap files for snapd"));
        Ok(())
    }

    #[test]
    fn test_invalid_model() -> Result<()> {
        let cases = [
            MODEL.replace("type: model", "type: serial"),
            MODEL.replace("base: core20", "base: core22"),
            MODEL.replace("brand-id: canonical", "brand-id: \"\""),
            "this is: [not a model".to_string(),
        ];
        for model in cases {
            let (_td, seed) = setup_seed(&model, SNAPS)?;
            assert!(load(&seed).is_err(), "{model}");
        }
        Ok(())
    }

    #[test]
    fn test_find_snap_file() {
        let files = [
            "pc_1.snap",
            "pc-kernel_12.snap",
            "pc_x1.snap.partial",
            "pc_.snap",
        ]
        .map(String::from);
        assert_eq!(find_snap_file(&files, "pc").unwrap(), "pc_1.snap");
        assert_eq!(
            find_snap_file(&files, "pc-kernel").unwrap(),
            "pc-kernel_12.snap"
        );
        assert!(find_snap_file(&files, "core20").is_err());
    }
}
