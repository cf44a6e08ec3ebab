//! Owner resolution and snapshot folding over the branch forest.

use crate::error::{Result, StoreError};
use crate::revisions::{CommitLog, RevisionStore};
use crate::types::{BranchId, BranchInfo, CommitInfo, Hash, PathSet, Revision};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Apply one delta to a snapshot: tombstones remove, everything else upserts.
pub fn apply_delta(snapshot: &mut PathSet, delta: &PathSet) {
    for (path, info) in delta {
        if info.is_tombstone() {
            snapshot.remove(path);
        } else {
            snapshot.insert(path.clone(), info.clone());
        }
    }
}

/// Read-only view of the branch table joined with the revision store.
///
/// Borrowing the table keeps resolution consistent for the duration of one
/// operation; lifecycle changes build a new resolver afterwards.
#[derive(Clone, Copy)]
pub struct BranchResolver<'a> {
    branches: &'a BTreeMap<BranchId, BranchInfo>,
    store: &'a RevisionStore,
}

impl<'a> BranchResolver<'a> {
    pub fn new(branches: &'a BTreeMap<BranchId, BranchInfo>, store: &'a RevisionStore) -> Self {
        Self { branches, store }
    }

    pub fn store(&self) -> &'a RevisionStore {
        self.store
    }

    pub fn branch(&self, branch: BranchId) -> Result<&'a BranchInfo> {
        self.branches
            .get(&branch)
            .ok_or_else(|| StoreError::BranchNotFound(branch.to_string()))
    }

    /// Branch that physically stores `revision` of `branch`.
    ///
    /// Follows parent references while the revision is at or below the
    /// cutover. A missing parent is corruption, never guessed around.
    pub fn resolve_owner(&self, branch: BranchId, revision: Revision) -> Result<BranchId> {
        let mut current = self.branch(branch)?;
        for _ in 0..=self.branches.len() {
            match current.parent {
                Some(parent) if revision <= parent.cutover => {
                    current = self.branches.get(&parent.branch).ok_or_else(|| {
                        StoreError::Corruption(format!(
                            "branch {} refers to missing parent {}",
                            current.number, parent.branch
                        ))
                    })?;
                }
                _ => return Ok(current.number),
            }
        }
        Err(StoreError::Corruption(format!(
            "cyclic parent chain starting at branch {}",
            branch
        )))
    }

    /// Latest revision of a branch: its last own commit, or the cutover for
    /// a fast branch without commits.
    pub fn head_revision(&self, branch: BranchId) -> Result<Revision> {
        let info = self.branch(branch)?;
        let own = self.store.load_commits(branch)?;
        match (own.keys().next_back(), info.parent) {
            (Some(last), _) => Ok(*last),
            (None, Some(parent)) => Ok(parent.cutover),
            (None, None) => Err(StoreError::Corruption(format!(
                "branch {} has no commits",
                branch
            ))),
        }
    }

    /// Commit info of one revision, read through its owner.
    pub fn commit_info(&self, branch: BranchId, revision: Revision) -> Result<CommitInfo> {
        let owner = self.resolve_owner(branch, revision)?;
        self.store
            .load_commits(owner)?
            .remove(&revision)
            .ok_or(StoreError::RevisionNotFound {
                branch,
                revision: revision.0 as i64,
            })
    }

    /// Full commit history of a branch, including revisions serviced by
    /// ancestors. Each owner's log is read once.
    pub fn commit_log(&self, branch: BranchId) -> Result<CommitLog> {
        let head = self.head_revision(branch)?;
        let mut logs: HashMap<BranchId, CommitLog> = HashMap::new();
        let mut history = CommitLog::new();
        for number in 0..=head.0 {
            let revision = Revision(number);
            let owner = self.resolve_owner(branch, revision)?;
            if !logs.contains_key(&owner) {
                logs.insert(owner, self.store.load_commits(owner)?);
            }
            let info = logs
                .get(&owner)
                .and_then(|log| log.get(&revision))
                .cloned()
                .ok_or(StoreError::RevisionNotFound {
                    branch,
                    revision: number as i64,
                })?;
            history.insert(revision, info);
        }
        Ok(history)
    }

    /// Delta recorded at one revision of a branch.
    pub fn delta(&self, branch: BranchId, revision: Revision) -> Result<Arc<PathSet>> {
        let owner = self.resolve_owner(branch, revision)?;
        self.store.load_delta(owner, revision)
    }

    /// Committed path set at `revision`: the fold of deltas `0..=revision`.
    pub fn fold(&self, branch: BranchId, revision: Revision) -> Result<PathSet> {
        let mut snapshot = PathSet::new();
        for number in 0..=revision.0 {
            let delta = self.delta(branch, Revision(number))?;
            apply_delta(&mut snapshot, &delta);
        }
        trace!(%branch, %revision, files = snapshot.len(), "Folded path set");
        Ok(snapshot)
    }

    /// Lazy fold producing the snapshot after every revision `0..=revision`.
    ///
    /// The sequence is forward-only; dropping it early needs no cleanup.
    pub fn fold_incremental(&self, branch: BranchId, revision: Revision) -> PathSetFold<'a> {
        PathSetFold {
            resolver: *self,
            branch,
            next: Revision(0),
            last: revision,
            snapshot: PathSet::new(),
            failed: false,
        }
    }

    /// Most recent revision at or below `revision` that physically holds the
    /// blob for `name_hash`, with the blob's location.
    pub fn find_revision(
        &self,
        branch: BranchId,
        revision: Revision,
        name_hash: &Hash,
    ) -> Result<(Revision, PathBuf)> {
        let mut candidate = Some(revision);
        while let Some(current) = candidate {
            let owner = self.resolve_owner(branch, current)?;
            let blob = self.store.blob_path(owner, current, name_hash);
            if blob.is_file() {
                return Ok((current, blob));
            }
            candidate = current.prev();
        }
        Err(StoreError::ContentNotFound {
            branch,
            revision,
            name_hash: *name_hash,
        })
    }

    /// Branches with at least one revision physically stored by `branch`,
    /// with their cutovers.
    pub fn dependents_of(&self, branch: BranchId) -> Result<Vec<(BranchId, Revision)>> {
        let mut dependents = Vec::new();
        for info in self.branches.values() {
            let Some(parent) = info.parent else { continue };
            if info.number == branch {
                continue;
            }
            let mut depends = false;
            for number in 0..=parent.cutover.0 {
                if self.resolve_owner(info.number, Revision(number))? == branch {
                    depends = true;
                    break;
                }
            }
            if depends {
                dependents.push((info.number, parent.cutover));
            }
        }
        Ok(dependents)
    }
}

/// One step of an incremental fold.
#[derive(Clone, Debug)]
pub struct FoldStep {
    pub revision: Revision,
    /// Delta recorded at this revision.
    pub delta: Arc<PathSet>,
    /// Snapshot after applying the delta.
    pub snapshot: PathSet,
}

/// Iterator returned by [`BranchResolver::fold_incremental`].
pub struct PathSetFold<'a> {
    resolver: BranchResolver<'a>,
    branch: BranchId,
    next: Revision,
    last: Revision,
    snapshot: PathSet,
    failed: bool,
}

impl Iterator for PathSetFold<'_> {
    type Item = Result<FoldStep>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next > self.last {
            return None;
        }
        let revision = self.next;
        self.next = revision.next();

        match self.resolver.delta(self.branch, revision) {
            Ok(delta) => {
                apply_delta(&mut self.snapshot, &delta);
                Some(Ok(FoldStep {
                    revision,
                    delta,
                    snapshot: self.snapshot.clone(),
                }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
