//! Helpers for interacting with the kernel mount table.
//!
//! Everything here re-reads the mount table on each query; the kernel
//! is the only source of truth for what is mounted, and callers are
//! expected to mutate it between queries.

use std::io::ErrorKind;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;

/// The mount table of the calling process.
pub const PROC_SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// A single entry of a `mountinfo` table, see `proc_pid_mountinfo(5)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    /// Unique identifier of the mount
    pub mount_id: u32,
    /// Identifier of the parent mount
    pub parent_id: u32,
    /// Major number of the backing device
    pub major: u32,
    /// Minor number of the backing device
    pub minor: u32,
    /// Path within the filesystem forming the root of this mount
    pub root: String,
    /// Mount point relative to the process root
    pub mount_point: Utf8PathBuf,
    /// Per-mount options
    pub mount_options: String,
    /// Optional tagged fields (e.g. `shared:1`)
    pub optional_fields: Vec<String>,
    /// Filesystem type
    pub fstype: String,
    /// Filesystem specific source, e.g. a device path
    pub source: String,
    /// Per-superblock options
    pub super_options: String,
}

/// Decode the octal escapes (`\040` and friends) the kernel uses for
/// whitespace and backslashes.
fn unescape(s: &str) -> String {
    let b = s.as_bytes();
    let mut out = Vec::with_capacity(b.len());
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'\\' {
            if let Some(oct) = b.get(i + 1..i + 4) {
                if oct.iter().all(|c| (b'0'..=b'7').contains(c)) {
                    let v = oct
                        .iter()
                        .fold(0u32, |acc, c| acc * 8 + u32::from(c - b'0'));
                    if let Ok(v) = u8::try_from(v) {
                        out.push(v);
                        i += 4;
                        continue;
                    }
                }
            }
        }
        out.push(b[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn next_field<'a>(it: &mut impl Iterator<Item = &'a str>, name: &str) -> Result<&'a str> {
    it.next().ok_or_else(|| anyhow!("Missing field: {name}"))
}

impl FromStr for MountInfo {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut it = line.split_ascii_whitespace();
        let mount_id = next_field(&mut it, "mount id")?
            .parse()
            .context("Parsing mount id")?;
        let parent_id = next_field(&mut it, "parent id")?
            .parse()
            .context("Parsing parent id")?;
        let majmin = next_field(&mut it, "major:minor")?;
        let (major, minor) = majmin
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid major:minor {majmin}"))?;
        let major = major.parse().context("Parsing major")?;
        let minor = minor.parse().context("Parsing minor")?;
        let root = unescape(next_field(&mut it, "root")?);
        let mount_point = unescape(next_field(&mut it, "mount point")?).into();
        let mount_options = next_field(&mut it, "mount options")?.to_owned();
        let mut optional_fields = Vec::new();
        loop {
            let f = next_field(&mut it, "separator")?;
            if f == "-" {
                break;
            }
            optional_fields.push(f.to_owned());
        }
        let fstype = next_field(&mut it, "filesystem type")?.to_owned();
        let source = unescape(next_field(&mut it, "source")?);
        let super_options = next_field(&mut it, "super options")?.to_owned();
        Ok(Self {
            mount_id,
            parent_id,
            major,
            minor,
            root,
            mount_point,
            mount_options,
            optional_fields,
            fstype,
            source,
            super_options,
        })
    }
}

/// Parse the full text of a `mountinfo` table.
pub fn parse_mountinfo(s: &str) -> Result<Vec<MountInfo>> {
    s.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            l.parse()
                .with_context(|| format!("Parsing mountinfo line {}", i + 1))
        })
        .collect()
}

/// Read and parse a `mountinfo` table.
#[context("Reading mount table {path}")]
pub fn read_mountinfo(path: &Utf8Path) -> Result<Vec<MountInfo>> {
    let buf = std::fs::read(path)?;
    parse_mountinfo(&String::from_utf8_lossy(&buf))
}

/// Answers whether a path is currently a mount point.
pub trait MountProbe {
    /// Returns `true` if `path` is an active mount point. A path which
    /// does not exist is simply not mounted.
    fn is_mounted(&self, path: &Utf8Path) -> Result<bool>;
}

/// A [`MountProbe`] backed by a `mountinfo` file, by default
/// the one of the calling process.
#[derive(Debug, Clone)]
pub struct MountInfoProbe {
    mountinfo: Utf8PathBuf,
}

impl MountInfoProbe {
    /// Probe using the provided `mountinfo` table.
    pub fn new(mountinfo: impl Into<Utf8PathBuf>) -> Self {
        Self {
            mountinfo: mountinfo.into(),
        }
    }
}

impl Default for MountInfoProbe {
    fn default() -> Self {
        Self::new(PROC_SELF_MOUNTINFO)
    }
}

/// Resolve symlinks so that the path can be compared with the kernel's view.
fn resolve_mount_target(path: &Utf8Path) -> Result<Utf8PathBuf> {
    match path.canonicalize_utf8() {
        Ok(p) => Ok(p),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(path.to_owned()),
        Err(e) => Err(e).with_context(|| format!("Resolving {path}")),
    }
}

impl MountProbe for MountInfoProbe {
    #[context("Checking whether {path} is mounted")]
    fn is_mounted(&self, path: &Utf8Path) -> Result<bool> {
        let target = resolve_mount_target(path)?;
        let mounted = read_mountinfo(&self.mountinfo)?
            .iter()
            .any(|m| m.mount_point == target);
        tracing::trace!("{target} mounted={mounted}");
        Ok(mounted)
    }
}
