//! Read-only commands: changes, diff, status, log and ls.

use super::Repository;
use crate::branches::FoldStep;
use crate::changes::{normalize_rel_path, PatternSet};
use crate::error::{Result, StoreError};
use crate::manifest::STORE_FOLDER;
use crate::merge::{diff_blocks, split_lines, MergeBlock};
use crate::selector::Selector;
use crate::types::{BranchInfo, ChangeSet, CommitInfo, PathSet, RepositoryMode, RevisionRef};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Textual differences of one modified file.
#[derive(Clone, Debug)]
pub struct FileDiff {
    pub path: String,
    /// Line blocks from the committed to the working version; `None` for
    /// binary files.
    pub blocks: Option<Vec<MergeBlock>>,
}

/// Differences of the file tree against a revision.
#[derive(Clone, Debug)]
pub struct DiffReport {
    pub against: RevisionRef,
    pub changes: ChangeSet,
    pub files: Vec<FileDiff>,
}

/// One branch in a status listing.
#[derive(Clone, Debug)]
pub struct BranchStatus {
    pub info: BranchInfo,
    /// Number of revisions (own and inherited).
    pub revisions: u64,
    pub current: bool,
}

/// Repository summary.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub mode: RepositoryMode,
    pub strict: bool,
    pub compress: bool,
    pub branches: Vec<BranchStatus>,
    /// True if the file tree differs from the current branch's head.
    pub changed: bool,
}

/// One revision in a log listing.
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub commit: CommitInfo,
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    /// Added files handled as text.
    pub text_added: usize,
    /// Files in the snapshot after this revision.
    pub files: usize,
}

/// Versioning status of a listed file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LsStatus {
    /// Excluded by the given ignore pattern.
    Ignored(String),
    /// Covered by these tracking patterns.
    Tracked(Vec<String>),
    /// Neither ignored nor tracked (simple mode: versioned).
    Plain,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LsEntry {
    pub path: String,
    pub status: LsStatus,
}

impl Repository {
    /// Changes of the file tree against a revision (default: latest).
    pub fn changes(&self, selector: &Selector, strict: bool) -> Result<ChangeSet> {
        let against = selector.resolve(&self.manifest, &self.resolver())?;
        self.changes_against(against, strict)
    }

    fn changes_against(&self, against: RevisionRef, strict: bool) -> Result<ChangeSet> {
        let known = self.snapshot(against)?;
        let filters = self.branch_filters(self.manifest.current_branch)?;
        self.detector()
            .detect(&known, &filters.options(strict || self.manifest.strict))
    }

    /// Changes plus line blocks for modified text files.
    pub fn diff(&self, selector: &Selector, ignore_whitespace: bool) -> Result<DiffReport> {
        let against = selector.resolve(&self.manifest, &self.resolver())?;
        let known = self.snapshot(against)?;
        let filters = self.branch_filters(self.manifest.current_branch)?;
        let changes = self
            .detector()
            .detect(&known, &filters.options(self.manifest.strict))?;

        let mut files = Vec::new();
        for path in changes.modifications.keys() {
            let blocks = match known.get(path) {
                Some(info) if self.config.is_text(path) => {
                    let old = self.committed_content(info, against)?;
                    let new = fs::read(self.root.join(path))?;
                    match (String::from_utf8(old), String::from_utf8(new)) {
                        (Ok(old), Ok(new)) => Some(diff_blocks(
                            &split_lines(&old),
                            &split_lines(&new),
                            ignore_whitespace,
                        )),
                        _ => None,
                    }
                }
                _ => None,
            };
            files.push(FileDiff {
                path: path.clone(),
                blocks,
            });
        }
        Ok(DiffReport {
            against,
            changes,
            files,
        })
    }

    /// Repository summary.
    pub fn status(&self) -> Result<StatusReport> {
        let resolver = self.resolver();
        let mut branches = Vec::new();
        for info in self.manifest.branches.values() {
            branches.push(BranchStatus {
                info: info.clone(),
                revisions: resolver.head_revision(info.number)?.0 + 1,
                current: info.number == self.manifest.current_branch,
            });
        }
        let (changes, _) = self.current_changes(self.manifest.strict)?;
        Ok(StatusReport {
            mode: self.manifest.mode,
            strict: self.manifest.strict,
            compress: self.manifest.compress,
            branches,
            changed: changes.is_modified(),
        })
    }

    /// History of the current branch with per-revision file statistics.
    pub fn log(&self) -> Result<Vec<LogEntry>> {
        let resolver = self.resolver();
        let head = self.head()?;
        let commits = resolver.commit_log(head.branch)?;

        let mut entries = Vec::new();
        let mut previous = PathSet::new();
        for step in resolver.fold_incremental(head.branch, head.revision) {
            let FoldStep {
                revision,
                delta,
                snapshot,
            } = step?;
            let (mut added, mut removed, mut modified, mut text_added) = (0, 0, 0, 0);
            for (path, info) in delta.iter() {
                if info.is_tombstone() {
                    removed += 1;
                } else if previous.contains_key(path) {
                    modified += 1;
                } else {
                    added += 1;
                    if self.config.is_text(path) {
                        text_added += 1;
                    }
                }
            }
            let commit = commits.get(&revision).cloned().ok_or_else(|| {
                StoreError::Corruption(format!("no commit entry for {}/{}", head.branch, revision))
            })?;
            entries.push(LogEntry {
                commit,
                added,
                removed,
                modified,
                text_added,
                files: snapshot.len(),
            });
            previous = snapshot;
        }
        Ok(entries)
    }

    /// List files of a folder with their versioning status.
    pub fn ls(&self, folder: &str, recursive: bool) -> Result<Vec<LsEntry>> {
        let folder = normalize_rel_path(folder)?;
        let tracked = self.manifest.current()?.tracked.clone();
        let patterns = PatternSet::new(&tracked);
        let mut entries = Vec::new();
        self.list_folder(&self.root.join(&folder), &folder, recursive, &patterns, &mut entries);
        Ok(entries)
    }

    fn list_folder(
        &self,
        dir: &Path,
        prefix: &str,
        recursive: bool,
        patterns: &PatternSet,
        entries: &mut Vec<LsEntry>,
    ) {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list folder");
                return;
            }
        };
        let mut children: Vec<_> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for child in children {
            let name = child.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if child.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if recursive && name != STORE_FOLDER && !self.config.is_ignored_dir(&name) {
                    self.list_folder(&child.path(), &rel, recursive, patterns, entries);
                }
                continue;
            }
            let status = match self.config.ignoring_pattern(&name) {
                Some(pattern) => LsStatus::Ignored(pattern.to_string()),
                None => {
                    let matching: Vec<String> =
                        patterns.matching(&rel).map(str::to_string).collect();
                    if matching.is_empty() {
                        LsStatus::Plain
                    } else {
                        LsStatus::Tracked(matching)
                    }
                }
            };
            entries.push(LsEntry { path: rel, status });
        }
    }

    /// Tags in creation order.
    pub fn tags(&self) -> &[String] {
        &self.manifest.tags
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::offline_repo;
    use super::super::CommitOptions;
    use super::*;
    use crate::merge::BlockKind;

    #[test]
    fn test_log_statistics() {
        let (dir, mut repo) = offline_repo(&[("a.txt", "a"), ("b.bin", "b")], RepositoryMode::Simple);
        fs::write(dir.path().join("a.txt"), "aa").unwrap();
        fs::remove_file(dir.path().join("b.bin")).unwrap();
        fs::write(dir.path().join("c.md"), "c").unwrap();
        repo.commit(CommitOptions {
            message: Some("second".into()),
            ..Default::default()
        })
        .unwrap();

        let log = repo.log().unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!((log[0].added, log[0].text_added, log[0].files), (2, 1, 2));
        let second = &log[1];
        assert_eq!(second.commit.message.as_deref(), Some("second"));
        assert_eq!((second.added, second.removed, second.modified), (1, 1, 1));
        assert_eq!(second.files, 2);
    }

    #[test]
    fn test_diff_reports_line_blocks() {
        let (dir, repo) = offline_repo(&[("a.txt", "one\ntwo\n"), ("b.bin", "x")], RepositoryMode::Simple);
        fs::write(dir.path().join("a.txt"), "one\n2\n").unwrap();
        fs::write(dir.path().join("b.bin"), "xy").unwrap();

        let report = repo.diff(&Selector::current(), false).unwrap();
        assert_eq!(report.files.len(), 2);
        let text = report.files.iter().find(|f| f.path == "a.txt").unwrap();
        let blocks = text.blocks.as_ref().unwrap();
        assert_eq!(blocks[1].kind, BlockKind::Replace);
        assert!(report.files.iter().any(|f| f.path == "b.bin" && f.blocks.is_none()));
    }

    #[test]
    fn test_status_and_ls() {
        let (dir, mut repo) = offline_repo(&[("a.txt", "a"), ("old.bak", "x")], RepositoryMode::Track);
        repo.add_pattern(".", "*.txt", false).unwrap();

        let listing = repo.ls(".", false).unwrap();
        assert_eq!(
            listing,
            vec![
                LsEntry {
                    path: "a.txt".into(),
                    status: LsStatus::Tracked(vec!["*.txt".into()]),
                },
                LsEntry {
                    path: "old.bak".into(),
                    status: LsStatus::Ignored("*.bak".into()),
                },
            ]
        );

        let status = repo.status().unwrap();
        assert_eq!(status.mode, RepositoryMode::Track);
        assert_eq!(status.branches.len(), 1);
        assert!(status.branches[0].current);
        assert!(status.changed);
        drop(dir);
    }
}
