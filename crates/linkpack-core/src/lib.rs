//! # linkpack-core
//!
//! Engine for deduplicating installed packages across `node_modules`
//! trees by hard-linking identical files to one master copy per
//! (device, name, version) identity.
//!
//! Pipeline: the scanner streams discovered packages, the grouping stage
//! buckets them by identity, the master resolver picks a durable master
//! per group through the persisted reference store, the planner filters
//! each destination file by stat fingerprint, and the executor performs
//! the hard links. Every stage observes the run context's cancellation
//! token and bounds its filesystem concurrency independently.

pub mod context;
pub mod link;
pub mod master;
pub mod pack;
pub mod plan;
pub mod progress;
pub mod prune;
pub mod refstore;
pub mod run;
pub mod scan;

pub use context::{RunContext, RunStats};
pub use link::{HardLinker, LinkOp};
pub use pack::{pack_key, FileSig, PackageInstance, DEP_DIR, MANIFEST};
pub use plan::{link_filter, FileLinkCandidate, LinkSrcDst};
pub use progress::{ProgressSink, SilentSink};
pub use prune::prune;
pub use refstore::{PackRef, RefStore, StoreError};
pub use run::{scan_and_link, RunMode, RunSummary};
