//! Branching, committing and branch removal.

use super::Repository;
use crate::branches::{BranchLifecycle, DuplicateMode, RemovedBranch};
use crate::changes::{ChangeDetector, DetectOptions};
use crate::error::{Result, StoreError};
use crate::revisions::CommitLog;
use crate::selector::Selector;
use crate::types::{BranchId, CommitInfo, PathSet, RepositoryMode, RevisionRef, Timestamp};
use tracing::info;

/// Options for `branch`.
#[derive(Clone, Debug, Default)]
pub struct BranchOptions {
    pub name: Option<String>,
    /// Branch from the last commit instead of the file tree.
    pub last: bool,
    /// Stay on the current branch.
    pub stay: bool,
    /// History handling when branching from the last commit.
    pub duplicate: DuplicateMode,
    pub message: Option<String>,
}

/// Options for `commit`.
#[derive(Clone, Debug, Default)]
pub struct CommitOptions {
    pub message: Option<String>,
    /// Record the message as a unique tag.
    pub tag: bool,
    /// Compare contents even if the repository trusts modification times.
    pub strict: bool,
}

/// Outcome of a commit.
#[derive(Clone, Debug)]
pub struct CommitReport {
    pub revision: RevisionRef,
    pub additions: usize,
    pub deletions: usize,
    pub modifications: usize,
    pub moves: usize,
}

impl Repository {
    /// Create a new branch and (unless `stay`) make it current.
    ///
    /// From the file tree in simple mode; from the current branch's latest
    /// snapshot in tracking modes or with `last`.
    pub fn branch(&mut self, options: BranchOptions) -> Result<BranchId> {
        let head = self.head()?;
        let id = if options.last {
            BranchLifecycle::new(&mut self.manifest, &self.store).duplicate(
                head,
                options.duplicate,
                options.name,
                options.message,
            )?
        } else if self.manifest.mode.uses_patterns() {
            BranchLifecycle::new(&mut self.manifest, &self.store).duplicate(
                head,
                DuplicateMode::Full,
                options.name,
                options.message,
            )?
        } else {
            let detector = ChangeDetector::new(&self.root, &self.config, &self.store);
            let detect = DetectOptions {
                check_content: self.manifest.strict,
                ..Default::default()
            };
            BranchLifecycle::new(&mut self.manifest, &self.store).create_from_tree(
                &detector,
                detect,
                options.name,
                options.message,
                Some(head.branch),
            )?
        };

        if !options.stay {
            self.manifest.current_branch = id;
        }
        self.save()?;
        info!(branch = %id, stay = options.stay, "Created branch");
        Ok(id)
    }

    /// Record the file tree's changes as the next revision of the current
    /// branch.
    pub fn commit(&mut self, options: CommitOptions) -> Result<CommitReport> {
        if let Some(message) = &options.message {
            if self.manifest.tags.contains(message) {
                return Err(StoreError::TagConflict(message.clone()));
            }
        } else if options.tag {
            return Err(StoreError::InvalidOperation(
                "a tag needs a commit message".into(),
            ));
        }

        let branch = self.manifest.current_branch;
        if self.manifest.mode == RepositoryMode::Picky
            && self.manifest.branch(branch)?.tracked.is_empty()
        {
            return Err(StoreError::InvalidOperation(
                "no tracking patterns staged for this commit".into(),
            ));
        }

        let head = self.head()?;
        let target = RevisionRef::new(branch, head.revision.next());
        let known = self.snapshot(head)?;
        let filters = self.branch_filters(branch)?;
        let detect = DetectOptions {
            write_to: Some(target),
            ..filters.options(options.strict || self.manifest.strict)
        };

        let changes = match self.detector().detect(&known, &detect) {
            Ok(changes) => changes,
            Err(e) => {
                self.store.discard_revision(target.branch, target.revision)?;
                return Err(e);
            }
        };
        if !changes.is_modified() {
            self.store.discard_revision(target.branch, target.revision)?;
            return Err(StoreError::NothingToCommit);
        }

        let mut delta = PathSet::new();
        delta.extend(changes.additions.iter().map(|(p, i)| (p.clone(), i.clone())));
        delta.extend(changes.modifications.iter().map(|(p, i)| (p.clone(), i.clone())));
        delta.extend(changes.deletions.iter().map(|(p, i)| (p.clone(), i.tombstone())));
        self.store.save_delta(target.branch, target.revision, &delta)?;

        let mut log: CommitLog = self.store.load_commits(branch)?;
        log.insert(
            target.revision,
            CommitInfo {
                number: target.revision,
                created: Timestamp::now(),
                message: options.message.clone(),
            },
        );
        self.store.save_commits(branch, &log)?;

        let picky = self.manifest.mode == RepositoryMode::Picky;
        let info = self.manifest.branch_mut(branch)?;
        if picky {
            info.tracked.clear();
        }
        info.in_sync = false;
        if options.tag {
            if let Some(message) = options.message {
                self.manifest.tags.push(message);
            }
        }
        self.save()?;

        info!(
            revision = %target,
            additions = changes.additions.len(),
            deletions = changes.deletions.len(),
            modifications = changes.modifications.len(),
            "Committed"
        );
        Ok(CommitReport {
            revision: target,
            additions: changes.additions.len(),
            deletions: changes.deletions.len(),
            modifications: changes.modifications.len(),
            moves: changes.moves.len(),
        })
    }

    /// Remove a branch. Requires a clean file tree unless `force`.
    pub fn destroy(&mut self, selector: &Selector, force: bool) -> Result<RemovedBranch> {
        if !selector.has_branch() {
            return Err(StoreError::InvalidSelector(format!(
                "'{}' does not name a branch",
                selector
            )));
        }
        if self.manifest.branches.len() <= 1 {
            return Err(StoreError::LastBranch);
        }
        if !force {
            let (changes, _) = self.current_changes(self.manifest.strict)?;
            if changes.is_modified() {
                return Err(StoreError::DirtyWorkingTree(changes.len()));
            }
        }
        let branch = selector.resolve_branch(&self.manifest)?;
        let removed = BranchLifecycle::new(&mut self.manifest, &self.store).remove(branch)?;
        self.save()?;
        Ok(removed)
    }
}
