//! Master selection backed by the persisted reference store.
//!
//! For each identity the resolver prefers a still-valid stored
//! fingerprint, validated one at a time in stored order, and falls back
//! to the first discovered instance. Resolutions are cached per run and
//! coalesced, so concurrent requests for one identity share a single
//! filesystem probe.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use linkpack_config::Config;

use crate::context::RunContext;
use crate::pack::{pack_key, read_manifest, FileSig, PackageInstance, MANIFEST};
use crate::refstore::PackRef;

/// Revalidate one stored fingerprint: the manifest file must still exist
/// with the recorded inode (and mtime, unless `ignore_mtime`), and
/// re-reading it must yield the same identity. Returns the live instance
/// on success.
pub async fn validate_ref(key: &str, pack_ref: &PackRef, ignore_mtime: bool) -> Option<PackageInstance> {
    let manifest_path = pack_ref.dir().join(MANIFEST);
    let meta = match tokio::fs::symlink_metadata(&manifest_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "failed to stat stored reference");
            return None;
        }
    };
    if !meta.is_file() {
        return None;
    }
    let sig = FileSig::from_metadata(&meta);
    if sig.ino != pack_ref.ino() {
        return None;
    }
    if !ignore_mtime && sig.mtime_ms != pack_ref.mtime_ms() {
        return None;
    }
    let manifest = read_manifest(&manifest_path).await?;
    if pack_key(sig.dev, &manifest.name, &manifest.version) != key {
        return None;
    }
    Some(PackageInstance {
        dir: pack_ref.dir().to_path_buf(),
        sig,
    })
}

/// Per-run resolution cache. Concurrent lookups for one key await the
/// same in-flight resolution instead of probing the filesystem twice.
pub struct MasterCache {
    inner: std::sync::Mutex<HashMap<String, Arc<OnceCell<PackageInstance>>>>,
}

impl MasterCache {
    pub fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<PackageInstance>> {
        let mut map = self.inner.lock().expect("master cache poisoned");
        map.entry(key.to_string()).or_default().clone()
    }
}

impl Default for MasterCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the master instance for `key`, consulting the per-run cache
/// first. `first` is the fallback: the earliest discovered instance of
/// the group.
pub async fn resolve_master(
    ctx: &Arc<RunContext>,
    config: &Config,
    key: &str,
    first: &PackageInstance,
) -> PackageInstance {
    let cell = ctx.masters.cell(key);
    cell.get_or_init(|| do_resolve(ctx.clone(), config.link.ignore_mtime, key.to_string(), first.clone()))
        .await
        .clone()
}

async fn do_resolve(
    ctx: Arc<RunContext>,
    ignore_mtime: bool,
    key: String,
    first: PackageInstance,
) -> PackageInstance {
    let stored = ctx.refs.lock().await.get(&key).to_vec();

    // Sequential on purpose: only the first valid entry matters and
    // validating the rest would be wasted I/O.
    for (idx, pack_ref) in stored.iter().enumerate() {
        if ctx.is_cancelled() {
            return first;
        }
        if let Some(master) = validate_ref(&key, pack_ref, ignore_mtime).await {
            if idx != 0 {
                // leading entries failed validation; keep the tail
                ctx.refs.lock().await.put(&key, stored[idx..].to_vec());
            }
            return master;
        }
    }

    if ctx.is_cancelled() {
        return first;
    }
    // Nothing stored survived: adopt the first discovered instance.
    ctx.refs
        .lock()
        .await
        .put(&key, vec![PackRef::from_instance(&first)]);
    first
}
