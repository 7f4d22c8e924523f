//! Reference-store maintenance: full revalidation of every fingerprint.
//!
//! Unlike master resolution, prune does not stop at the first valid
//! entry; every stored fingerprint is checked and stale ones dropped.
//! Identities whose fingerprints all fail keep an empty list. Nothing on
//! disk is mutated beyond reads.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use linkpack_config::Config;

use crate::context::RunContext;
use crate::master::validate_ref;

pub async fn prune(ctx: &Arc<RunContext>, config: &Config) {
    let snapshot = ctx.refs.lock().await.snapshot();
    let sem = Arc::new(Semaphore::new(config.scan.concurrent_ops));
    let ignore_mtime = config.link.ignore_mtime;

    let mut tasks = JoinSet::new();
    for (key, refs) in snapshot {
        if ctx.is_cancelled() {
            break;
        }
        let ctx = ctx.clone();
        let sem = sem.clone();
        tasks.spawn(async move {
            let mut valid = Vec::new();
            for pack_ref in refs {
                if ctx.is_cancelled() {
                    return None;
                }
                let _permit = sem.acquire().await.expect("prune semaphore closed");
                if validate_ref(&key, &pack_ref, ignore_mtime).await.is_some() {
                    valid.push(pack_ref);
                }
            }
            Some((key, valid))
        });
    }

    while let Some(result) = tasks.join_next().await {
        if let Ok(Some((key, valid))) = result {
            ctx.refs.lock().await.put(&key, valid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{pack_key, FileSig, PackageInstance, MANIFEST};
    use crate::refstore::{PackRef, RefStore};
    use std::path::Path;
    use tempfile::tempdir;

    fn make_pkg(dir: &Path, name: &str, version: &str) -> PackageInstance {
        std::fs::create_dir_all(dir).unwrap();
        let manifest = dir.join(MANIFEST);
        std::fs::write(&manifest, format!(r#"{{"name":"{name}","version":"{version}"}}"#)).unwrap();
        let meta = std::fs::symlink_metadata(&manifest).unwrap();
        PackageInstance {
            dir: dir.to_path_buf(),
            sig: FileSig::from_metadata(&meta),
        }
    }

    #[tokio::test]
    async fn prune_drops_stale_keeps_valid() {
        let temp = tempdir().unwrap();
        let alive = make_pkg(&temp.path().join("alive"), "aa", "1.0.0");
        let dead = make_pkg(&temp.path().join("dead"), "aa", "1.0.0");
        let key = pack_key(alive.sig.dev, "aa", "1.0.0");

        let mut store = RefStore::default();
        store.put(
            &key,
            vec![PackRef::from_instance(&dead), PackRef::from_instance(&alive)],
        );
        std::fs::remove_file(dead.manifest_path()).unwrap();

        let ctx = RunContext::silent(store);
        prune(&ctx, &Config::default()).await;

        let refs = ctx.refs.lock().await;
        assert_eq!(refs.get(&key), &[PackRef::from_instance(&alive)]);
        assert!(refs.is_dirty());
    }

    #[tokio::test]
    async fn prune_leaves_empty_list_when_all_stale() {
        let temp = tempdir().unwrap();
        let dead = make_pkg(&temp.path().join("dead"), "aa", "1.0.0");
        let key = pack_key(dead.sig.dev, "aa", "1.0.0");

        let mut store = RefStore::default();
        store.put(&key, vec![PackRef::from_instance(&dead)]);
        std::fs::remove_file(dead.manifest_path()).unwrap();

        let ctx = RunContext::silent(store);
        prune(&ctx, &Config::default()).await;

        let refs = ctx.refs.lock().await;
        assert!(refs.get(&key).is_empty());
        assert_eq!(refs.len(), 1);
    }
}
