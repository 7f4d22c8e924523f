//! Run orchestration: scan → group → resolve → plan → link.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use linkpack_config::Config;

use crate::context::RunContext;
use crate::link::{execute_links, LinkOp};
use crate::master::resolve_master;
use crate::pack::PackageInstance;
use crate::plan::{plan_file_links, LinkSrcDst};
use crate::scan::{find_packages, group_packages};

/// What a run is allowed to do to the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Plan and perform hard links, updating the reference store.
    Link,
    /// Report duplicate groups and the bytes linking would save; no
    /// filesystem mutation, no reference-store persistence.
    DryRun,
    /// Emit one link command per eligible file; no filesystem mutation.
    GenCommands,
}

/// Aggregate outcome of one scan-and-link run.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub packages_seen: u64,
    pub saved_bytes: u64,
    pub link_errors: u64,
    pub cancelled: bool,
}

/// Scan `roots`, group discovered packages by identity, and reconcile
/// every group against its master according to `mode`.
pub async fn scan_and_link(
    ctx: &Arc<RunContext>,
    config: &Config,
    mode: RunMode,
    roots: &[PathBuf],
    linker: Arc<dyn LinkOp>,
) -> RunSummary {
    let config = Arc::new(config.clone());
    let roots = normalize_roots(roots).await;

    let hits = find_packages(ctx.clone(), &config, roots);
    let groups = group_packages(ctx, hits).await;
    info!(
        packages = ctx.stats.packages_seen.load(Ordering::Relaxed),
        identities = groups.len(),
        "scan complete"
    );

    ctx.progress.on_link_start();

    let pair_sem = Arc::new(Semaphore::new(config.scan.concurrent_ops));
    let plan_sem = Arc::new(Semaphore::new(config.scan.concurrent_ops));
    let exec_sem = Arc::new(Semaphore::new(config.scan.concurrent_ops));

    let mut tasks = JoinSet::new();
    for (key, instances) in groups {
        if ctx.is_cancelled() {
            break;
        }
        if mode == RunMode::DryRun && instances.len() > 1 {
            let name_version = key.split_once(':').map(|(_, nv)| nv).unwrap_or(&key);
            let dirs: Vec<PathBuf> = instances.iter().map(|i| i.dir.clone()).collect();
            ctx.progress.on_duplicate_group(name_version, &dirs);
        }
        let instances = Arc::new(instances);
        for idx in 0..instances.len() {
            tasks.spawn(process_instance(
                ctx.clone(),
                config.clone(),
                mode,
                key.clone(),
                instances.clone(),
                idx,
                linker.clone(),
                pair_sem.clone(),
                plan_sem.clone(),
                exec_sem.clone(),
            ));
        }
    }
    while tasks.join_next().await.is_some() {}

    RunSummary {
        packages_seen: ctx.stats.packages_seen.load(Ordering::Relaxed),
        saved_bytes: ctx.stats.saved_bytes.load(Ordering::Relaxed),
        link_errors: ctx.stats.link_errors.load(Ordering::Relaxed),
        cancelled: ctx.is_cancelled(),
    }
}

/// Reconcile one discovered instance against its group's master.
#[allow(clippy::too_many_arguments)]
async fn process_instance(
    ctx: Arc<RunContext>,
    config: Arc<Config>,
    mode: RunMode,
    key: String,
    instances: Arc<Vec<PackageInstance>>,
    idx: usize,
    linker: Arc<dyn LinkOp>,
    pair_sem: Arc<Semaphore>,
    plan_sem: Arc<Semaphore>,
    exec_sem: Arc<Semaphore>,
) {
    let _permit = pair_sem
        .acquire_owned()
        .await
        .expect("pair semaphore closed");
    if ctx.is_cancelled() {
        return;
    }

    let dst = &instances[idx];
    let master = resolve_master(&ctx, &config, &key, &instances[0]).await;

    // A file cannot be linked to itself: the master instance is skipped.
    if !master.sig.same_inode(&dst.sig) && !ctx.is_cancelled() {
        let pair = LinkSrcDst {
            key: key.clone(),
            src_dir: master.dir.clone(),
            src_sig: master.sig,
            dst_dir: dst.dir.clone(),
            dst_sig: dst.sig,
        };
        match mode {
            RunMode::Link => {
                let candidates =
                    plan_file_links(ctx.clone(), config.clone(), pair, true, plan_sem);
                execute_links(&ctx, candidates, linker, exec_sem).await;
            }
            RunMode::DryRun => {
                let mut candidates =
                    plan_file_links(ctx.clone(), config.clone(), pair, false, plan_sem);
                while let Some(candidate) = candidates.recv().await {
                    ctx.stats
                        .saved_bytes
                        .fetch_add(candidate.size, Ordering::Relaxed);
                }
            }
            RunMode::GenCommands => {
                let mut candidates =
                    plan_file_links(ctx.clone(), config.clone(), pair, false, plan_sem);
                while let Some(candidate) = candidates.recv().await {
                    ctx.progress.on_link_command(&candidate.src, &candidate.dst);
                    ctx.stats
                        .saved_bytes
                        .fetch_add(candidate.size, Ordering::Relaxed);
                }
            }
        }
    }

    let completed = ctx.stats.packages_completed.fetch_add(1, Ordering::Relaxed) + 1;
    ctx.progress.on_link_progress(
        completed,
        ctx.stats.packages_seen.load(Ordering::Relaxed),
        ctx.stats.saved_bytes.load(Ordering::Relaxed),
        &dst.dir,
    );
}

/// Canonicalize and deduplicate roots so a root listed twice (directly
/// or through a symlink) is only walked once. Missing roots are skipped
/// with a warning.
async fn normalize_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut normalized: Vec<PathBuf> = Vec::with_capacity(roots.len());
    for root in roots {
        match tokio::fs::canonicalize(root).await {
            Ok(canonical) => {
                if !normalized.contains(&canonical) {
                    normalized.push(canonical);
                }
            }
            Err(e) => warn!(root = %root.display(), error = %e, "skipping unreadable root"),
        }
    }
    normalized
}
