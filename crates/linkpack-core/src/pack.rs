//! Package identity and scan-time instance types.
//!
//! A package copy is identified by the `(device, name, version)` triple:
//! name and version come from its manifest, the device from the manifest
//! file's stat. Copies on different devices never share an identity
//! because hard links cannot cross devices.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Directory name holding installed third-party packages.
pub const DEP_DIR: &str = "node_modules";

/// Per-package metadata file name.
pub const MANIFEST: &str = "package.json";

/// Stat snapshot used for every fingerprint and link-eligibility
/// comparison. mtime is kept in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSig {
    pub dev: u64,
    pub ino: u64,
    pub size: u64,
    pub mtime_ms: i64,
}

impl FileSig {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
            size: meta.size(),
            mtime_ms: meta.mtime() * 1000 + meta.mtime_nsec() / 1_000_000,
        }
    }

    /// Inode numbers are only comparable within one device.
    pub fn same_inode(&self, other: &FileSig) -> bool {
        self.dev == other.dev && self.ino == other.ino
    }
}

/// Stable identity-key encoding, used both in memory and as the
/// persisted reference-file object key.
pub fn pack_key(dev: u64, name: &str, version: &str) -> String {
    format!("{dev}:{name}-{version}")
}

/// The `name`/`version` pair read from a manifest; every other field is
/// ignored. Parsing fails when either is missing or not a string, which
/// drops the instance from the scan.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
}

/// One discovered on-disk copy of a package: the manifest's parent
/// directory plus the manifest's stat snapshot.
#[derive(Debug, Clone)]
pub struct PackageInstance {
    pub dir: PathBuf,
    pub sig: FileSig,
}

impl PackageInstance {
    pub fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST)
    }
}

/// Best-effort manifest read: `None` for unreadable or incomplete JSON.
pub async fn read_manifest(path: &Path) -> Option<PackageManifest> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}
