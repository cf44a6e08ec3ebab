//! Switching to and integrating other revisions.

use super::Repository;
use crate::changes::DetectOptions;
use crate::error::{Result, StoreError};
use crate::merge::{merge_lines, ConflictResolver, FileChoice, MergeOperation};
use crate::selector::Selector;
use crate::types::{PathInfo, RevisionRef};
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info};

/// Options for `switch`.
#[derive(Clone, Debug, Default)]
pub struct SwitchOptions {
    /// Replace uncommitted changes.
    pub force: bool,
    /// Only take over the target branch's tracking patterns.
    pub meta: bool,
    pub strict: bool,
}

/// Files touched by a switch.
#[derive(Clone, Debug, Default)]
pub struct SwitchReport {
    pub target: Option<RevisionRef>,
    pub restored: Vec<String>,
    pub deleted: Vec<String>,
    pub modified: Vec<String>,
}

/// Options for `update`.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOptions {
    /// Policy for added and removed files.
    pub files: MergeOperation,
    /// Policy for lines of modified text files; defaults to `files`.
    pub lines: Option<MergeOperation>,
    pub strict: bool,
}

/// Files touched by an update.
#[derive(Clone, Debug, Default)]
pub struct UpdateReport {
    pub source: Option<RevisionRef>,
    /// Restored because the other side has them.
    pub added: Vec<String>,
    /// Deleted because the other side does not have them.
    pub removed: Vec<String>,
    /// Only on the other side, left out by the policy.
    pub skipped_additions: Vec<String>,
    /// Only here, kept by the policy.
    pub skipped_removals: Vec<String>,
    /// Replaced by the other side's version.
    pub theirs: Vec<String>,
    /// Merged line by line.
    pub merged: Vec<String>,
    /// Left as they are.
    pub kept: Vec<String>,
}

fn union(a: &[String], b: &[String]) -> Vec<String> {
    a.iter()
        .chain(b)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl Repository {
    /// Make the file tree match another revision and continue work there.
    ///
    /// Uncommitted changes block the switch unless `force`; local deletions
    /// and local additions identical to the target's files never do.
    pub fn switch(&mut self, selector: &Selector, options: SwitchOptions) -> Result<SwitchReport> {
        let target = selector.resolve(&self.manifest, &self.resolver())?;
        let strict = options.strict || self.manifest.strict;

        if options.meta {
            self.uses_patterns()?;
            let source = self.manifest.branch(target.branch)?.clone();
            let current = self.manifest.current_branch;
            let info = self.manifest.branch_mut(current)?;
            info.tracked = source.tracked;
            info.untracked = source.untracked;
            self.manifest.current_branch = target.branch;
            self.save()?;
            info!(%target, "Switched tracking patterns");
            return Ok(SwitchReport {
                target: Some(target),
                ..Default::default()
            });
        }

        let (mut changed, _) = self.current_changes(strict)?;
        let wanted = self.snapshot(target)?;

        let (tracked, untracked) = {
            let current = self.manifest.current()?;
            let other = self.manifest.branch(target.branch)?;
            (
                union(&current.tracked, &other.tracked),
                union(&current.untracked, &other.untracked),
            )
        };
        let filters = self.filters_for(&tracked, &untracked);
        let todos = self.detector().detect(
            &wanted,
            &DetectOptions {
                inverse: true,
                ..filters.options(strict)
            },
        )?;

        changed.deletions.clear();
        changed.moves.clear();
        changed.additions.retain(|path, local| match wanted.get(path) {
            Some(theirs) => !same_content(local, theirs),
            None => true,
        });
        if changed.is_modified() && !options.force {
            return Err(StoreError::DirtyWorkingTree(changed.len()));
        }

        let mut report = SwitchReport {
            target: Some(target),
            ..Default::default()
        };
        for (path, info) in &todos.deletions {
            self.restore_file(path, info, target)?;
            report.restored.push(path.clone());
        }
        for path in todos.additions.keys() {
            self.delete_file(path)?;
            report.deleted.push(path.clone());
        }
        for (path, info) in &todos.modifications {
            self.restore_file(path, info, target)?;
            report.modified.push(path.clone());
        }

        self.manifest.current_branch = target.branch;
        self.save()?;
        info!(
            %target,
            restored = report.restored.len(),
            deleted = report.deleted.len(),
            modified = report.modified.len(),
            "Switched"
        );
        Ok(report)
    }

    /// Integrate another revision into the file tree without switching.
    ///
    /// Files only the other side has are restored if the policy inserts;
    /// files only present here are deleted if it removes. Modified text
    /// files are merged line by line; binary files and `Ask` go to the
    /// resolver.
    pub fn update(
        &mut self,
        selector: &Selector,
        options: UpdateOptions,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<UpdateReport> {
        let source = selector.resolve(&self.manifest, &self.resolver())?;
        let strict = options.strict || self.manifest.strict;
        let line_op = options.lines.unwrap_or(options.files);

        let theirs = self.snapshot(source)?;
        let (tracked, untracked) = {
            let current = self.manifest.current()?;
            let other = self.manifest.branch(source.branch)?;
            (
                union(&current.tracked, &other.tracked),
                union(&current.untracked, &other.untracked),
            )
        };
        let filters = self.filters_for(&tracked, &untracked);
        let changed = self.detector().detect(
            &theirs,
            &DetectOptions {
                inverse: true,
                ..filters.options(strict)
            },
        )?;

        let mut report = UpdateReport {
            source: Some(source),
            ..Default::default()
        };
        for (path, info) in &changed.deletions {
            if options.files.inserts() {
                self.restore_file(path, info, source)?;
                report.added.push(path.clone());
            } else {
                report.skipped_additions.push(path.clone());
            }
        }
        for path in changed.additions.keys() {
            if options.files.removes() {
                self.delete_file(path)?;
                report.removed.push(path.clone());
            } else {
                report.skipped_removals.push(path.clone());
            }
        }
        for (path, info) in &changed.modifications {
            let binary = !self.config.is_text(path);
            let choice = if binary || options.files.asks() {
                resolver.resolve_file(path, binary)?
            } else {
                FileChoice::Merge
            };
            match choice {
                FileChoice::Theirs => {
                    self.restore_file(path, info, source)?;
                    report.theirs.push(path.clone());
                }
                FileChoice::Merge if !binary => {
                    if self.merge_file(path, info, source, line_op, resolver)? {
                        report.merged.push(path.clone());
                    } else {
                        report.kept.push(path.clone());
                    }
                }
                _ => report.kept.push(path.clone()),
            }
        }

        let current = self.manifest.current_branch;
        let uses_patterns = self.manifest.mode.uses_patterns();
        let info = self.manifest.branch_mut(current)?;
        info.in_sync = false;
        if uses_patterns {
            info.tracked = tracked;
        }
        self.save()?;
        info!(
            %source,
            added = report.added.len(),
            removed = report.removed.len(),
            merged = report.merged.len(),
            "Integrated changes"
        );
        Ok(report)
    }

    /// Merge the committed version into the working file. Returns false if
    /// the file stayed as it was.
    fn merge_file(
        &self,
        path: &str,
        info: &PathInfo,
        source: RevisionRef,
        op: MergeOperation,
        resolver: &mut dyn ConflictResolver,
    ) -> Result<bool> {
        let target = self.root.join(path);
        let mine_bytes = fs::read(&target)?;
        let theirs_bytes = self.committed_content(info, source)?;
        if mine_bytes == theirs_bytes {
            return Ok(false);
        }

        let (Ok(mine), Ok(theirs)) = (String::from_utf8(mine_bytes), String::from_utf8(theirs_bytes))
        else {
            return match resolver.resolve_file(path, true)? {
                FileChoice::Theirs => {
                    self.restore_file(path, info, source)?;
                    Ok(true)
                }
                _ => Ok(false),
            };
        };

        let (merged, _) = merge_lines(path, &theirs, &mine, op, resolver)?;
        if merged == mine {
            debug!(path, "Merge left file unchanged");
            return Ok(false);
        }
        fs::write(&target, merged)?;
        Ok(true)
    }
}

fn same_content(a: &PathInfo, b: &PathInfo) -> bool {
    a.size == b.size && a.hash == b.hash
}
