//! Concurrent discovery of installed packages under dependency trees.
//!
//! Walks each root directory looking for `node_modules/<pkg>/package.json`
//! manifests, parses out name and version, and streams
//! `(identity key, instance)` pairs over a bounded channel. Grouping
//! drains that stream into per-identity buckets once the walk completes;
//! membership cannot be known earlier.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use linkpack_config::Config;

use crate::context::RunContext;
use crate::pack::{pack_key, read_manifest, FileSig, PackageInstance, DEP_DIR, MANIFEST};

/// Buffered emissions before the scanner backpressures.
const SCAN_CHANNEL_CAPACITY: usize = 256;

/// One scanner emission: the identity key plus the discovered instance.
#[derive(Debug)]
pub struct ScanHit {
    pub key: String,
    pub instance: PackageInstance,
}

/// Directory-descent rule for locating `node_modules/<pkg>` trees:
/// no dot directories; always enter `node_modules`; once under a
/// `node_modules` ancestor, only enter children whose parent is itself
/// named `node_modules` (nested dependency trees), skipping package
/// source and asset directories entirely.
fn descend_into(name: &str, parent: &Path) -> bool {
    if name.starts_with('.') {
        return false;
    }
    if name == DEP_DIR {
        return true;
    }
    if parent.iter().any(|c| c == OsStr::new(DEP_DIR)) {
        return parent.file_name() == Some(OsStr::new(DEP_DIR));
    }
    true
}

/// A manifest only counts when its package directory sits directly inside
/// a `node_modules` directory; top-level project manifests never qualify.
fn parent_is_dep_dir(dir: &Path) -> bool {
    dir.parent().and_then(Path::file_name) == Some(OsStr::new(DEP_DIR))
}

/// Walk `roots` concurrently and stream discovered packages. The returned
/// receiver closes when every root is exhausted or the run is cancelled.
pub fn find_packages(
    ctx: Arc<RunContext>,
    config: &Config,
    roots: Vec<PathBuf>,
) -> mpsc::Receiver<ScanHit> {
    let (tx, rx) = mpsc::channel(SCAN_CHANNEL_CAPACITY);
    let sem = Arc::new(Semaphore::new(config.scan.concurrent_ops));
    let tree_depth = config.scan.tree_depth;

    for root in roots {
        let ctx = ctx.clone();
        let tx = tx.clone();
        let sem = sem.clone();
        tokio::spawn(async move {
            walk_root(ctx, root, tree_depth, sem, tx).await;
        });
    }

    rx
}

async fn walk_root(
    ctx: Arc<RunContext>,
    root: PathBuf,
    tree_depth: usize,
    sem: Arc<Semaphore>,
    tx: mpsc::Sender<ScanHit>,
) {
    let mut pending = vec![(root, 0usize)];
    let mut manifest_tasks = JoinSet::new();

    while let Some((dir, depth)) = pending.pop() {
        if ctx.is_cancelled() {
            break;
        }
        for (name, file_type) in list_dir(&sem, &dir).await {
            if file_type.is_dir() {
                let within_depth = tree_depth == 0 || depth < tree_depth;
                if within_depth && descend_into(&name.to_string_lossy(), &dir) {
                    pending.push((dir.join(&name), depth + 1));
                }
            } else if file_type.is_file() && name == MANIFEST && parent_is_dep_dir(&dir) {
                let ctx = ctx.clone();
                let tx = tx.clone();
                let sem = sem.clone();
                let dir = dir.clone();
                manifest_tasks.spawn(async move {
                    let _permit = sem
                        .acquire_owned()
                        .await
                        .expect("scan semaphore closed");
                    if ctx.is_cancelled() {
                        return;
                    }
                    if let Some(hit) = probe_manifest(&dir).await {
                        let seen = ctx.stats.packages_seen.fetch_add(1, Ordering::Relaxed) + 1;
                        ctx.progress.on_scan_progress(seen, &hit.instance.dir);
                        let _ = tx.send(hit).await;
                    }
                });
            }
        }
    }

    while manifest_tasks.join_next().await.is_some() {}
}

/// List one directory without following symlinks. Errors are recovered
/// locally: a vanished directory is silent, anything else is logged and
/// yields what was read so far.
async fn list_dir(sem: &Semaphore, dir: &Path) -> Vec<(std::ffi::OsString, std::fs::FileType)> {
    let _permit = sem.acquire().await.expect("scan semaphore closed");
    let mut rd = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "failed to read directory");
            return Vec::new();
        }
    };
    let mut entries = Vec::new();
    loop {
        match rd.next_entry().await {
            Ok(Some(entry)) => {
                if let Ok(file_type) = entry.file_type().await {
                    entries.push((entry.file_name(), file_type));
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "directory listing failed");
                break;
            }
        }
    }
    entries
}

/// Stat and parse one candidate manifest. `None` for vanished files and
/// manifests without a usable name/version.
async fn probe_manifest(dir: &Path) -> Option<ScanHit> {
    let path = dir.join(MANIFEST);
    let meta = match tokio::fs::symlink_metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to stat manifest");
            return None;
        }
    };
    if !meta.is_file() {
        return None;
    }
    let Some(manifest) = read_manifest(&path).await else {
        debug!(path = %path.display(), "manifest has no usable name/version");
        return None;
    };
    let sig = FileSig::from_metadata(&meta);
    Some(ScanHit {
        key: pack_key(sig.dev, &manifest.name, &manifest.version),
        instance: PackageInstance {
            dir: dir.to_path_buf(),
            sig,
        },
    })
}

/// Drain the scan stream into per-identity buckets, preserving discovery
/// order within each group. Cancellation stops the drain early; callers
/// treat the partial map as discardable.
pub async fn group_packages(
    ctx: &RunContext,
    mut rx: mpsc::Receiver<ScanHit>,
) -> HashMap<String, Vec<PackageInstance>> {
    let mut groups: HashMap<String, Vec<PackageInstance>> = HashMap::new();
    while let Some(hit) = rx.recv().await {
        if ctx.is_cancelled() {
            break;
        }
        groups.entry(hit.key).or_default().push(hit.instance);
    }
    groups
}
