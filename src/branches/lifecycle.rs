//! Branch creation, duplication and removal.

use super::resolver::BranchResolver;
use crate::changes::{ChangeDetector, DetectOptions};
use crate::error::{Result, StoreError};
use crate::manifest::Manifest;
use crate::revisions::{CommitLog, RevisionStore};
use crate::types::{
    BranchId, BranchInfo, BranchParent, CommitInfo, PathSet, Revision, RevisionRef, Timestamp,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How a duplicated branch gets its history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DuplicateMode {
    /// Reference the source's revisions up to the cutover; nothing is copied.
    #[default]
    Fast,
    /// Copy the source's snapshot into the new branch's revision 0.
    Full,
}

/// Outcome of a branch removal.
#[derive(Clone, Debug)]
pub struct RemovedBranch {
    /// Metadata of the removed branch.
    pub info: BranchInfo,
    /// Branches that got the shared revisions copied into their own folders.
    pub materialized: Vec<BranchId>,
    /// Branch that is current afterwards.
    pub current: BranchId,
}

/// Mutates the branch table and the revision store together.
pub struct BranchLifecycle<'a> {
    manifest: &'a mut Manifest,
    store: &'a RevisionStore,
}

impl<'a> BranchLifecycle<'a> {
    pub fn new(manifest: &'a mut Manifest, store: &'a RevisionStore) -> Self {
        Self { manifest, store }
    }

    fn check_name(&self, name: Option<&str>) -> Result<()> {
        if let Some(name) = name {
            if name.is_empty() || name.contains('/') || name.parse::<i64>().is_ok() {
                return Err(StoreError::InvalidOperation(format!(
                    "'{}' is not a valid branch name",
                    name
                )));
            }
            if self.manifest.branches.values().any(|b| b.name.as_deref() == Some(name)) {
                return Err(StoreError::BranchExists(name.to_string()));
            }
        }
        Ok(())
    }

    fn register(&mut self, info: BranchInfo) -> BranchId {
        let id = info.number;
        self.manifest.branches.insert(id, info);
        id
    }

    fn first_commit(&self, branch: BranchId, delta: &PathSet, message: Option<String>) -> Result<()> {
        self.store.save_delta(branch, Revision(0), delta)?;
        let mut log = CommitLog::new();
        log.insert(
            Revision(0),
            CommitInfo {
                number: Revision(0),
                created: Timestamp::now(),
                message,
            },
        );
        self.store.save_commits(branch, &log)
    }

    /// Create a branch whose revision 0 is the working tree as the detector
    /// sees it.
    pub fn create_from_tree(
        &mut self,
        detector: &ChangeDetector<'_>,
        options: DetectOptions<'_>,
        name: Option<String>,
        message: Option<String>,
        template: Option<BranchId>,
    ) -> Result<BranchId> {
        self.check_name(name.as_deref())?;
        let id = self.manifest.next_branch_id();
        let (tracked, untracked) = match template {
            Some(source) => {
                let source = self.manifest.branch(source)?;
                (source.tracked.clone(), source.untracked.clone())
            }
            None => (Vec::new(), Vec::new()),
        };

        self.store.create_branch_dir(id)?;
        let target = RevisionRef::new(id, Revision(0));
        let changes = detector.detect(
            &PathSet::new(),
            &DetectOptions {
                write_to: Some(target),
                ..options
            },
        )?;
        self.first_commit(id, &changes.additions, message)?;

        info!(branch = %id, files = changes.additions.len(), "Created branch from file tree");
        let in_sync = self.manifest.branches.is_empty();
        Ok(self.register(BranchInfo {
            number: id,
            created: Timestamp::now(),
            name,
            in_sync,
            tracked,
            untracked,
            parent: None,
        }))
    }

    /// Create a branch from a committed revision of another branch.
    pub fn duplicate(
        &mut self,
        source: RevisionRef,
        mode: DuplicateMode,
        name: Option<String>,
        message: Option<String>,
    ) -> Result<BranchId> {
        self.check_name(name.as_deref())?;
        let id = self.manifest.next_branch_id();
        let template = self.manifest.branch(source.branch)?.clone();

        let parent = match mode {
            DuplicateMode::Fast => {
                self.store.create_branch_dir(id)?;
                self.store.save_commits(id, &CommitLog::new())?;
                debug!(branch = %id, parent = %source.branch, cutover = %source.revision, "Created fast branch");
                Some(BranchParent {
                    branch: source.branch,
                    cutover: source.revision,
                })
            }
            DuplicateMode::Full => {
                let copied = self.copy_snapshot(source, id, message)?;
                debug!(branch = %id, files = copied, "Copied snapshot into new branch");
                None
            }
        };

        info!(branch = %id, source = %source, ?mode, "Duplicated branch");
        Ok(self.register(BranchInfo {
            number: id,
            created: Timestamp::now(),
            name,
            in_sync: template.in_sync,
            tracked: template.tracked,
            untracked: template.untracked,
            parent,
        }))
    }

    /// Copy the folded snapshot at `source` file by file into revision 0 of
    /// `target`. Returns the number of copied blobs.
    fn copy_snapshot(
        &self,
        source: RevisionRef,
        target: BranchId,
        message: Option<String>,
    ) -> Result<usize> {
        let resolver = BranchResolver::new(&self.manifest.branches, self.store);
        let snapshot = resolver.fold(source.branch, source.revision)?;

        self.store.create_revision_dir(target, Revision(0))?;
        let mut copied = 0;
        for info in snapshot.values() {
            if info.hash.is_none() {
                continue;
            }
            let (_, blob) = resolver.find_revision(source.branch, source.revision, &info.name_hash)?;
            self.store
                .copy_blob(&blob, target, Revision(0), &info.name_hash)?;
            copied += 1;
        }
        self.first_commit(target, &snapshot, message)?;
        Ok(copied)
    }

    /// Remove a branch, first materializing every revision that dependent
    /// fast branches still read through it.
    pub fn remove(&mut self, branch: BranchId) -> Result<RemovedBranch> {
        self.manifest.branch(branch)?;
        if self.manifest.branches.len() <= 1 {
            return Err(StoreError::LastBranch);
        }

        let resolver = BranchResolver::new(&self.manifest.branches, self.store);
        let dependents = resolver.dependents_of(branch)?;

        // Plan copies revision by revision so a revision shared by several
        // dependents is read once through the delta cache.
        let mut plan: BTreeMap<Revision, Vec<(BranchId, BranchId)>> = BTreeMap::new();
        let mut inherited: BTreeMap<BranchId, Vec<CommitInfo>> = BTreeMap::new();
        for (dependent, cutover) in &dependents {
            for number in 0..=cutover.0 {
                let revision = Revision(number);
                let owner = resolver.resolve_owner(*dependent, revision)?;
                plan.entry(revision).or_default().push((owner, *dependent));
                inherited
                    .entry(*dependent)
                    .or_default()
                    .push(resolver.commit_info(*dependent, revision)?);
            }
        }

        for (revision, copies) in &plan {
            for (owner, dependent) in copies {
                debug!(%revision, from = %owner, into = %dependent, "Integrating revision into dependent branch");
                self.store.copy_revision(*owner, *revision, *dependent)?;
            }
        }
        for (dependent, infos) in inherited {
            let mut log = self.store.load_commits(dependent)?;
            log.extend(infos.into_iter().map(|c| (c.number, c)));
            self.store.save_commits(dependent, &log)?;
            self.manifest.branch_mut(dependent)?.parent = None;
        }

        self.store.retire_branch(branch)?;
        let info = self
            .manifest
            .branches
            .remove(&branch)
            .ok_or_else(|| StoreError::BranchNotFound(branch.to_string()))?;
        let current = self
            .manifest
            .branches
            .keys()
            .next_back()
            .copied()
            .ok_or(StoreError::LastBranch)?;
        self.manifest.current_branch = current;

        let materialized: Vec<BranchId> = dependents.into_iter().map(|(d, _)| d).collect();
        info!(%branch, dependents = materialized.len(), %current, "Removed branch");
        Ok(RemovedBranch {
            info,
            materialized,
            current,
        })
    }
}
