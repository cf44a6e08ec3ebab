//! Branch forest: owner resolution, snapshot folding and lifecycle.
//!
//! Fast branches reference their parent's revisions up to a cutover and
//! only store what was committed after it. Removing a parent copies the
//! shared revisions into its dependents first.

mod lifecycle;
mod resolver;

pub use lifecycle::{BranchLifecycle, DuplicateMode, RemovedBranch};
pub use resolver::{apply_delta, BranchResolver, FoldStep, PathSetFold};
