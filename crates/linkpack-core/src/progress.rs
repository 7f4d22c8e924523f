//! Progress reporting seam between the engine and its host.

use std::path::{Path, PathBuf};

/// Receives progress events from a run. All methods have no-op defaults
/// so hosts implement only what they render.
pub trait ProgressSink: Send + Sync {
    /// A package manifest was discovered and parsed during scanning.
    fn on_scan_progress(&self, _packages_seen: u64, _current_dir: &Path) {}

    /// Scanning and grouping finished; link reconciliation starts.
    fn on_link_start(&self) {}

    /// One group of interchangeable package copies (dry-run listing).
    fn on_duplicate_group(&self, _name_version: &str, _dirs: &[PathBuf]) {}

    /// One eligible file pair (command-generation mode).
    fn on_link_command(&self, _src: &Path, _dst: &Path) {}

    /// A destination package finished planning or linking.
    fn on_link_progress(
        &self,
        _completed: u64,
        _total: u64,
        _saved_bytes: u64,
        _current_dir: &Path,
    ) {
    }
}

/// No-op sink for silent or embedded runs.
pub struct SilentSink;

impl ProgressSink for SilentSink {}
