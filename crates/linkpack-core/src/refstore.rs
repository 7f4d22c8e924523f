//! Persisted package-reference store.
//!
//! Maps each package identity key to a short, ordered list of known-good
//! fingerprints (oldest and most trusted first, the current master at the
//! front). The store is loaded once at process start, mutated in memory
//! during a run, and written back at process end by the host.
//!
//! Wire format is a JSON object: identity key → array of
//! `[directoryPath, inode, mtimeEpochMillis]` arrays.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pack::PackageInstance;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read reference file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed reference file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One persisted fingerprint: package directory, manifest inode, manifest
/// mtime in epoch milliseconds. Serializes as a 3-element JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRef(PathBuf, u64, i64);

impl PackRef {
    pub fn new(dir: PathBuf, ino: u64, mtime_ms: i64) -> Self {
        Self(dir, ino, mtime_ms)
    }

    pub fn from_instance(instance: &PackageInstance) -> Self {
        Self(instance.dir.clone(), instance.sig.ino, instance.sig.mtime_ms)
    }

    pub fn dir(&self) -> &Path {
        &self.0
    }

    pub fn ino(&self) -> u64 {
        self.1
    }

    pub fn mtime_ms(&self) -> i64 {
        self.2
    }
}

/// In-memory view of the reference file.
///
/// `BTreeMap` keeps keys sorted so the rewritten file is deterministic.
#[derive(Debug, Default)]
pub struct RefStore {
    entries: BTreeMap<String, Vec<PackRef>>,
    dirty: bool,
}

impl RefStore {
    /// Read the store from disk. A missing or empty file yields an empty
    /// store; malformed JSON is an error the host must surface before any
    /// scanning starts.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        let entries = serde_json::from_slice(&bytes).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            entries,
            dirty: false,
        })
    }

    /// Rewrite the whole store, pretty-printed and key-sorted.
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_vec_pretty(&self.entries).map_err(|e| StoreError::Malformed {
            path: path.to_path_buf(),
            source: e,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Fingerprints recorded for one identity, most trusted first.
    /// Absent keys and empty lists both mean "no known master".
    pub fn get(&self, key: &str) -> &[PackRef] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn put(&mut self, key: &str, refs: Vec<PackRef>) {
        self.entries.insert(key.to_string(), refs);
        self.dirty = true;
    }

    /// Record a freshly linked destination for `key`: seed the list with
    /// the master fingerprint when empty, drop any stale entry sharing the
    /// destination's path, append the destination, and trim oldest
    /// non-master entries down to `max_len`. The master at index 0 is
    /// never trimmed.
    pub fn append_trimmed(&mut self, key: &str, master: PackRef, dst: PackRef, max_len: usize) {
        let refs = self.entries.entry(key.to_string()).or_default();
        if refs.is_empty() {
            refs.push(master);
        }
        refs.retain(|r| r.dir() != dst.dir());
        refs.push(dst);
        while refs.len() > max_len.max(1) {
            refs.remove(1);
        }
        self.dirty = true;
    }

    /// Owned copy of every entry, for full revalidation passes.
    pub fn snapshot(&self) -> Vec<(String, Vec<PackRef>)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True once any in-memory mutation happened; the host only rewrites
    /// the file when this is set (or after a prune).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn r(dir: &str, ino: u64) -> PackRef {
        PackRef::new(PathBuf::from(dir), ino, 1_600_000_000_000)
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = tempdir().unwrap();
        let store = RefStore::load(&temp.path().join("refs.json")).unwrap();
        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn empty_file_loads_empty() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("refs.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(RefStore::load(&path).unwrap().is_empty());
    }

    #[test]
    fn malformed_file_is_fatal() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("refs.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(
            RefStore::load(&path),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn save_load_roundtrip_preserves_order() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("refs.json");

        let mut store = RefStore::default();
        store.put("1:b-2.0.0", vec![r("/m/b", 7)]);
        store.put("1:a-1.0.0", vec![r("/m/a", 3), r("/x/a", 4)]);
        store.save(&path).unwrap();

        let loaded = RefStore::load(&path).unwrap();
        assert_eq!(loaded.get("1:a-1.0.0"), store.get("1:a-1.0.0"));
        assert_eq!(loaded.get("1:b-2.0.0"), store.get("1:b-2.0.0"));

        // keys are serialized sorted
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.find("1:a-1.0.0").unwrap() < text.find("1:b-2.0.0").unwrap());
    }

    #[test]
    fn append_trimmed_seeds_master_when_empty() {
        let mut store = RefStore::default();
        store.append_trimmed("k", r("/master", 1), r("/dst", 2), 5);
        assert_eq!(store.get("k"), &[r("/master", 1), r("/dst", 2)]);
        assert!(store.is_dirty());
    }

    #[test]
    fn append_trimmed_replaces_same_path_entry() {
        let mut store = RefStore::default();
        store.put("k", vec![r("/master", 1), r("/dst", 2)]);
        // same path, new inode: the stale entry must go
        store.append_trimmed("k", r("/master", 1), r("/dst", 9), 5);
        assert_eq!(store.get("k"), &[r("/master", 1), r("/dst", 9)]);
    }

    #[test]
    fn append_trimmed_bounds_list_and_keeps_master() {
        let mut store = RefStore::default();
        for i in 0..10u64 {
            store.append_trimmed("k", r("/master", 1), r(&format!("/dst{i}"), 100 + i), 3);
        }
        let refs = store.get("k");
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0], r("/master", 1));
        assert_eq!(refs[2], r("/dst9", 109));
    }
}
