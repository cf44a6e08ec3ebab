//! # sos
//!
//! Offline version control: a local revision store that puts any working
//! tree under version control while it is disconnected from its upstream
//! system, and is removed again when going back online.
//!
//! ## Core Concepts
//!
//! - **Revisions**: Each commit stores only what changed (a delta of path
//!   records plus blobs of new content); snapshots are folds over deltas
//! - **Branches**: Full copies or "fast" branches that reference their
//!   parent's history up to a cutover revision
//! - **Change detection**: Compares the file tree with a snapshot by size,
//!   modification time or content hash, honoring tracking patterns
//! - **Switch/update**: Restore another revision, or integrate it with
//!   per-category merge policies
//!
//! ## Example
//!
//! ```ignore
//! use sos::{CommitOptions, GlobalConfig, OfflineOptions, Repository, Selector, SwitchOptions};
//!
//! let mut repo = Repository::offline("./project", GlobalConfig::empty(), OfflineOptions::default())?;
//!
//! // ... edit files ...
//! repo.commit(CommitOptions {
//!     message: Some("first draft".into()),
//!     ..Default::default()
//! })?;
//!
//! // Go back to the initial revision
//! repo.switch(&Selector::parse("/0")?, SwitchOptions::default())?;
//! ```

pub mod blobs;
pub mod branches;
pub mod changes;
pub mod config;
pub mod error;
pub mod glob;
pub mod manifest;
pub mod merge;
pub mod repository;
pub mod revisions;
pub mod selector;
pub mod types;

// Re-exports
pub use blobs::BlobStorage;
pub use branches::{BranchLifecycle, BranchResolver, DuplicateMode, RemovedBranch};
pub use changes::{ChangeDetector, DetectOptions, PatternSet, RenamePattern};
pub use config::{Config, ConfigEdit, ConfigScope, GlobalConfig};
pub use error::{Result, StoreError};
pub use manifest::{Manifest, STORE_FOLDER};
pub use merge::{ConflictResolver, FileChoice, KeepMine, LineChoice, MergeOperation};
pub use repository::{
    BranchOptions, BranchStatus, CommitOptions, CommitReport, DiffReport, DumpReport, FileDiff,
    LogEntry, LsEntry, LsStatus, MoveOptions, MoveReport, OfflineOptions, Repository,
    StatusReport, SwitchOptions, SwitchReport, UpdateOptions, UpdateReport,
};
pub use revisions::{CommitLog, RevisionStore};
pub use selector::Selector;
pub use types::*;
