//! Per-run shared state.
//!
//! Every run constructs its own context; there are no process-wide
//! singletons, so concurrent runs (and tests) stay fully isolated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::master::MasterCache;
use crate::progress::{ProgressSink, SilentSink};
use crate::refstore::RefStore;

/// Counters accumulated across one run.
#[derive(Debug, Default)]
pub struct RunStats {
    pub packages_seen: AtomicU64,
    pub packages_completed: AtomicU64,
    pub saved_bytes: AtomicU64,
    pub link_errors: AtomicU64,
}

impl RunStats {
    pub fn saved_bytes(&self) -> u64 {
        self.saved_bytes.load(Ordering::Relaxed)
    }
}

/// Everything the pipeline stages of one run share: the cancellation
/// token, the reference store, the per-run master-resolution cache, the
/// progress sink, and the counters.
pub struct RunContext {
    cancel: CancellationToken,
    pub refs: Mutex<RefStore>,
    pub masters: MasterCache,
    pub progress: Arc<dyn ProgressSink>,
    pub stats: RunStats,
}

impl RunContext {
    pub fn new(refs: RefStore, progress: Arc<dyn ProgressSink>) -> Arc<Self> {
        Arc::new(Self {
            cancel: CancellationToken::new(),
            refs: Mutex::new(refs),
            masters: MasterCache::new(),
            progress,
            stats: RunStats::default(),
        })
    }

    /// Context with a no-op sink, for embedded use and tests.
    pub fn silent(refs: RefStore) -> Arc<Self> {
        Self::new(refs, Arc::new(SilentSink))
    }

    /// Request cooperative shutdown. Streaming stages observe this at the
    /// top of every loop iteration; in-flight operations finish but their
    /// results are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
