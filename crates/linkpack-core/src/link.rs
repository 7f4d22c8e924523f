//! Hard-link execution with copy-back recovery.

use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::context::RunContext;
use crate::plan::FileLinkCandidate;

/// The link operation, pluggable for tests. Implementations must either
/// fully succeed (destination shares the source inode afterwards) or
/// fail leaving the destination path intact.
#[async_trait]
pub trait LinkOp: Send + Sync {
    async fn replace_with_link(&self, src: &Path, dst: &Path) -> std::io::Result<()>;
}

/// Default implementation: unlink the destination, then hard-link the
/// source into its place. If the link fails after the unlink, the
/// destination is restored by copying the source's bytes and mtime back
/// before the original failure is propagated.
pub struct HardLinker;

#[async_trait]
impl LinkOp for HardLinker {
    async fn replace_with_link(&self, src: &Path, dst: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_file(dst).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        match tokio::fs::hard_link(src, dst).await {
            Ok(()) => Ok(()),
            Err(link_err) => {
                error!(
                    src = %src.display(),
                    dst = %dst.display(),
                    error = %link_err,
                    "hard link failed, restoring destination by copy"
                );
                match restore_copy(src, dst).await {
                    Ok(()) => warn!(dst = %dst.display(), "destination restored by copy"),
                    Err(copy_err) => error!(
                        dst = %dst.display(),
                        error = %copy_err,
                        "recovery copy failed, destination may be missing"
                    ),
                }
                Err(link_err)
            }
        }
    }
}

/// Copy the source back to the vacated destination path, restoring the
/// source's mtime so the file still fingerprints identically.
pub(crate) async fn restore_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    tokio::fs::copy(src, dst).await?;
    let meta = tokio::fs::metadata(src).await?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta);
    let dst = dst.to_path_buf();
    tokio::task::spawn_blocking(move || filetime::set_file_mtime(&dst, mtime))
        .await
        .map_err(std::io::Error::other)?
}

/// Drain planned candidates and execute them with bounded concurrency.
/// Per-file failures are logged and counted, never fatal to the batch;
/// successes add to the run's saved-bytes total. Returns the bytes
/// linked for this batch.
pub async fn execute_links(
    ctx: &Arc<RunContext>,
    mut candidates: mpsc::Receiver<FileLinkCandidate>,
    linker: Arc<dyn LinkOp>,
    sem: Arc<Semaphore>,
) -> u64 {
    let mut tasks = JoinSet::new();
    while let Some(candidate) = candidates.recv().await {
        if ctx.is_cancelled() {
            break;
        }
        let permit = sem
            .clone()
            .acquire_owned()
            .await
            .expect("link semaphore closed");
        let ctx = ctx.clone();
        let linker = linker.clone();
        tasks.spawn(async move {
            let _permit = permit;
            if ctx.is_cancelled() {
                return 0;
            }
            match linker
                .replace_with_link(&candidate.src, &candidate.dst)
                .await
            {
                Ok(()) => {
                    ctx.stats
                        .saved_bytes
                        .fetch_add(candidate.size, Ordering::Relaxed);
                    candidate.size
                }
                Err(e) => {
                    ctx.stats.link_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        src = %candidate.src.display(),
                        dst = %candidate.dst.display(),
                        error = %e,
                        "link failed"
                    );
                    0
                }
            }
        });
    }

    let mut linked_bytes = 0u64;
    while let Some(result) = tasks.join_next().await {
        if let Ok(bytes) = result {
            linked_bytes += bytes;
        }
    }
    linked_bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::tempdir;

    #[tokio::test]
    async fn replaces_destination_with_link() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::write(&src, b"shared content").unwrap();
        std::fs::write(&dst, b"shared content").unwrap();

        HardLinker.replace_with_link(&src, &dst).await.unwrap();

        let src_meta = std::fs::metadata(&src).unwrap();
        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(src_meta.ino(), dst_meta.ino());
        assert_eq!(std::fs::read(&dst).unwrap(), b"shared content");
    }

    #[tokio::test]
    async fn missing_destination_is_linked_anyway() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::write(&src, b"x").unwrap();

        HardLinker.replace_with_link(&src, &dst).await.unwrap();
        assert_eq!(
            std::fs::metadata(&src).unwrap().ino(),
            std::fs::metadata(&dst).unwrap().ino()
        );
    }

    #[tokio::test]
    async fn restore_copy_rebuilds_content_and_mtime() {
        let temp = tempdir().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        std::fs::write(&src, b"original bytes").unwrap();
        let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src, mtime).unwrap();

        restore_copy(&src, &dst).await.unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"original bytes");
        let dst_meta = std::fs::metadata(&dst).unwrap();
        assert_eq!(dst_meta.mtime(), 1_600_000_000);
    }
}
