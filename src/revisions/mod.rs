//! Persistence of per-branch commit logs, per-revision deltas and blobs.

mod commits;
mod deltas;
mod store;

pub use commits::CommitLog;
pub use store::RevisionStore;
