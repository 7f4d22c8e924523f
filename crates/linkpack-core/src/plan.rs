//! Per-pair file enumeration and link-eligibility filtering.
//!
//! Given one decided master directory and one destination directory of
//! the same identity, enumerate the master's regular files (dot entries
//! and nested `node_modules` excluded; nested packages are their own
//! identities), stat the corresponding destination path, and stream out
//! every pair that passes the eligibility filter.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;
use walkdir::WalkDir;

use linkpack_config::Config;

use crate::context::RunContext;
use crate::pack::{FileSig, DEP_DIR};
use crate::refstore::PackRef;

/// One decided master→destination package pair.
#[derive(Debug, Clone)]
pub struct LinkSrcDst {
    pub key: String,
    pub src_dir: PathBuf,
    pub src_sig: FileSig,
    pub dst_dir: PathBuf,
    pub dst_sig: FileSig,
}

/// One concrete file decided eligible for hard-linking.
#[derive(Debug, Clone)]
pub struct FileLinkCandidate {
    pub src: PathBuf,
    pub dst: PathBuf,
    pub size: u64,
}

/// Sole integrity check before linking: stat equality, never content.
/// A candidate is linkable iff the destination is not the package
/// manifest itself, does not already share the source inode, sits on the
/// same device with identical size and mtime (unless mtime is ignored),
/// and is worth the syscall.
pub fn link_filter(
    src: &FileSig,
    dst: &FileSig,
    dst_pack_ino: u64,
    min_size: u64,
    ignore_mtime: bool,
) -> bool {
    dst.ino != dst_pack_ino
        && src.ino != dst.ino
        && src.dev == dst.dev
        && src.size == dst.size
        && (ignore_mtime || src.mtime_ms == dst.mtime_ms)
        && dst.size >= min_size
}

/// Plan the file links for one pair. When `update_refs` is set (the
/// side-effecting link mode) the reference store learns the destination
/// as an additional known-good fingerprint before planning begins.
pub fn plan_file_links(
    ctx: Arc<RunContext>,
    config: Arc<Config>,
    pair: LinkSrcDst,
    update_refs: bool,
    sem: Arc<Semaphore>,
) -> mpsc::Receiver<FileLinkCandidate> {
    let (tx, rx) = mpsc::channel(64);

    tokio::spawn(async move {
        if update_refs {
            let master = PackRef::new(pair.src_dir.clone(), pair.src_sig.ino, pair.src_sig.mtime_ms);
            let dst = PackRef::new(pair.dst_dir.clone(), pair.dst_sig.ino, pair.dst_sig.mtime_ms);
            ctx.refs
                .lock()
                .await
                .append_trimmed(&pair.key, master, dst, config.link.ref_size);
        }

        let src_dir = pair.src_dir.clone();
        let files = match tokio::task::spawn_blocking(move || master_files(&src_dir)).await {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %pair.src_dir.display(), error = %e, "master enumeration failed");
                return;
            }
        };

        let pair = Arc::new(pair);
        let mut stat_tasks = JoinSet::new();
        for (rel, src_sig) in files {
            if ctx.is_cancelled() {
                break;
            }
            let permit = sem
                .clone()
                .acquire_owned()
                .await
                .expect("plan semaphore closed");
            let pair = pair.clone();
            let config = config.clone();
            let tx = tx.clone();
            stat_tasks.spawn(async move {
                let _permit = permit;
                if let Some(candidate) = stat_candidate(&pair, &config, &rel, src_sig).await {
                    let _ = tx.send(candidate).await;
                }
            });
        }
        while stat_tasks.join_next().await.is_some() {}
    });

    rx
}

/// Stat the destination counterpart of one master file and apply the
/// eligibility filter. Missing destinations are expected and silent.
async fn stat_candidate(
    pair: &LinkSrcDst,
    config: &Config,
    rel: &Path,
    src_sig: FileSig,
) -> Option<FileLinkCandidate> {
    let dst_path = pair.dst_dir.join(rel);
    let meta = match tokio::fs::symlink_metadata(&dst_path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %dst_path.display(), error = %e, "failed to stat link target");
            return None;
        }
    };
    if !meta.is_file() {
        return None;
    }
    let dst_sig = FileSig::from_metadata(&meta);
    if !link_filter(
        &src_sig,
        &dst_sig,
        pair.dst_sig.ino,
        config.link.min_file_size,
        config.link.ignore_mtime,
    ) {
        return None;
    }
    Some(FileLinkCandidate {
        src: pair.src_dir.join(rel),
        dst: dst_path,
        size: src_sig.size,
    })
}

/// Enumerate the master's regular files relative to its directory,
/// pruning dot entries and nested dependency trees.
fn master_files(src_dir: &Path) -> Vec<(PathBuf, FileSig)> {
    let mut files = Vec::new();
    let walker = WalkDir::new(src_dir)
        .min_depth(1)
        .into_iter()
        .filter_entry(keep_master_entry);
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(dir = %src_dir.display(), error = %e, "master walk error");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "failed to stat master file");
                continue;
            }
        };
        if let Ok(rel) = entry.path().strip_prefix(src_dir) {
            files.push((rel.to_path_buf(), FileSig::from_metadata(&meta)));
        }
    }
    files
}

fn keep_master_entry(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return false;
    }
    !(entry.file_type().is_dir() && name == DEP_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_600_000_000_000;

    fn sig(ino: u64, dev: u64, size: u64, mtime_ms: i64) -> FileSig {
        FileSig {
            dev,
            ino,
            size,
            mtime_ms,
        }
    }

    // dstPackInode = 1 throughout: the destination's own manifest inode
    const PACK_INO: u64 = 1;

    #[test]
    fn matching_candidate_is_included() {
        let master = sig(100, 7, 123, T);
        let dst = sig(101, 7, 123, T);
        assert!(link_filter(&master, &dst, PACK_INO, 0, false));
    }

    #[test]
    fn manifest_inode_is_excluded() {
        let master = sig(100, 7, 123, T);
        let dst = sig(PACK_INO, 7, 123, T);
        assert!(!link_filter(&master, &dst, PACK_INO, 0, false));
    }

    #[test]
    fn already_linked_inode_is_excluded() {
        let master = sig(100, 7, 123, T);
        let dst = sig(100, 7, 123, T);
        assert!(!link_filter(&master, &dst, PACK_INO, 0, false));
    }

    #[test]
    fn different_device_is_excluded() {
        let master = sig(100, 7, 123, T);
        let dst = sig(101, 8, 123, T);
        assert!(!link_filter(&master, &dst, PACK_INO, 0, false));
    }

    #[test]
    fn different_size_is_excluded() {
        let master = sig(100, 7, 123, T);
        let dst = sig(101, 7, 124, T);
        assert!(!link_filter(&master, &dst, PACK_INO, 0, false));
    }

    #[test]
    fn different_mtime_is_excluded_unless_ignored() {
        let master = sig(100, 7, 123, T);
        let dst = sig(101, 7, 123, T + 1);
        assert!(!link_filter(&master, &dst, PACK_INO, 0, false));
        assert!(link_filter(&master, &dst, PACK_INO, 0, true));
    }

    #[test]
    fn small_files_are_excluded() {
        let master = sig(100, 7, 123, T);
        let dst = sig(101, 7, 123, T);
        assert!(!link_filter(&master, &dst, PACK_INO, 124, false));
        assert!(link_filter(&master, &dst, PACK_INO, 123, false));
    }

    #[test]
    fn master_enumeration_skips_dot_and_nested_deps() {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("lib")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/nested")).unwrap();
        std::fs::create_dir_all(root.join(".cache")).unwrap();
        std::fs::write(root.join("index.js"), "x").unwrap();
        std::fs::write(root.join("lib/util.js"), "y").unwrap();
        std::fs::write(root.join(".npmignore"), "z").unwrap();
        std::fs::write(root.join("node_modules/nested/index.js"), "w").unwrap();

        let mut rels: Vec<_> = master_files(root)
            .into_iter()
            .map(|(rel, _)| rel)
            .collect();
        rels.sort();
        assert_eq!(rels, vec![PathBuf::from("index.js"), PathBuf::from("lib/util.js")]);
    }
}
