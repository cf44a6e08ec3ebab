//! Working tree change detection.

use super::moves::detect_moves;
use super::patterns::{split_pattern, PatternSet};
use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::manifest::STORE_FOLDER;
use crate::revisions::RevisionStore;
use crate::types::{ChangeSet, Hash, PathInfo, PathSet, RevisionRef, Timestamp};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Options for a single detection run.
#[derive(Clone, Copy, Debug, Default)]
pub struct DetectOptions<'p> {
    /// Compare content hashes instead of trusting modification times.
    pub check_content: bool,
    /// Report modifications with the known (pre-image) values.
    pub inverse: bool,
    /// Only files covered by these patterns are considered.
    pub consider_only: Option<&'p PatternSet>,
    /// Files covered by these patterns are never considered.
    pub dont_consider: Option<&'p PatternSet>,
    /// Store new and changed content into this revision while scanning.
    pub write_to: Option<RevisionRef>,
}

/// Compares a working tree against a known path set.
pub struct ChangeDetector<'a> {
    root: &'a Path,
    config: &'a Config,
    store: &'a RevisionStore,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(root: &'a Path, config: &'a Config, store: &'a RevisionStore) -> Self {
        Self {
            root,
            config,
            store,
        }
    }

    /// Scan the working tree and report how it differs from `known`.
    ///
    /// With `write_to`, content of additions and modifications is stored in
    /// the same pass. Unreadable files are logged and skipped; a blob that
    /// already exists at the target aborts the scan.
    pub fn detect(&self, known: &PathSet, options: &DetectOptions<'_>) -> Result<ChangeSet> {
        if let Some(target) = options.write_to {
            self.store.create_revision_dir(target.branch, target.revision)?;
        }

        let mut files = Vec::new();
        self.walk(self.root, "", &mut files);

        let mut changes = ChangeSet::default();
        let mut seen = BTreeSet::new();

        for (rel, file) in files {
            if !self.considered(&rel, options) {
                continue;
            }
            seen.insert(rel.clone());

            let (size, mtime) = match stat(&file) {
                Ok(stat) => stat,
                Err(e) => {
                    warn!(path = %rel, error = %e, "Cannot stat file, skipping");
                    continue;
                }
            };

            match known.get(&rel) {
                None => {
                    let name_hash = Hash::of_path(&rel);
                    if let Some(info) =
                        self.scanned(&rel, &file, name_hash, size, mtime, options.write_to)?
                    {
                        changes.additions.insert(rel, info);
                    }
                }
                Some(old) if old.is_tombstone() => {
                    if let Some(info) =
                        self.scanned(&rel, &file, old.name_hash, size, mtime, options.write_to)?
                    {
                        changes.additions.insert(rel, info);
                    }
                }
                Some(old) => {
                    if let Some(info) = self.modified(&rel, &file, old, size, mtime, options)? {
                        changes.modifications.insert(rel, info);
                    }
                }
            }
        }

        for (rel, info) in known {
            if info.is_tombstone() || seen.contains(rel) {
                continue;
            }
            if self.is_excluded(rel) || !self.considered(rel, options) {
                continue;
            }
            changes.deletions.insert(rel.clone(), info.clone());
        }

        changes.moves = detect_moves(&changes, options.check_content);
        debug!(
            additions = changes.additions.len(),
            deletions = changes.deletions.len(),
            modifications = changes.modifications.len(),
            moves = changes.moves.len(),
            "Detected changes"
        );
        Ok(changes)
    }

    /// Collect versionable files below `dir`, sorted by path.
    fn walk(&self, dir: &Path, prefix: &str, files: &mut Vec<(String, PathBuf)>) {
        let read_dir = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Cannot list folder, skipping");
                return;
            }
        };

        let mut entries: Vec<_> = read_dir
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Cannot read folder entry, skipping");
                    None
                }
            })
            .collect();
        entries.sort_by_key(|e| e.file_name());

        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let rel = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

            if is_dir {
                if (prefix.is_empty() && name == STORE_FOLDER) || self.config.is_ignored_dir(&name)
                {
                    continue;
                }
                self.walk(&entry.path(), &rel, files);
            } else if !self.config.is_ignored_file(&name) {
                files.push((rel, entry.path()));
            }
        }
    }

    fn considered(&self, rel: &str, options: &DetectOptions<'_>) -> bool {
        if let Some(only) = options.consider_only {
            if !only.matches(rel) {
                return false;
            }
        }
        if let Some(except) = options.dont_consider {
            if except.matches(rel) {
                return false;
            }
        }
        true
    }

    /// True if ignore rules hide a path (its name or any parent folder).
    fn is_excluded(&self, rel: &str) -> bool {
        let (dir, name) = split_pattern(rel);
        if self.config.is_ignored_file(name) {
            return true;
        }
        if dir.is_empty() {
            return false;
        }
        dir.split('/').enumerate().any(|(depth, part)| {
            (depth == 0 && part == STORE_FOLDER) || self.config.is_ignored_dir(part)
        })
    }

    /// Path info of a newly seen file, or `None` if it cannot be read.
    fn scanned(
        &self,
        rel: &str,
        file: &Path,
        name_hash: Hash,
        size: u64,
        mtime: Timestamp,
        write_to: Option<RevisionRef>,
    ) -> Result<Option<PathInfo>> {
        let hash = match self.content_hash(file, size, &name_hash, write_to) {
            Ok(hash) => hash,
            Err(StoreError::Io(e)) => {
                warn!(path = %rel, error = %e, "Cannot read file, skipping");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        Ok(Some(PathInfo {
            name_hash,
            size: Some(size),
            mtime,
            hash,
        }))
    }

    /// Path info to report for a known file, or `None` if it is unchanged.
    fn modified(
        &self,
        rel: &str,
        file: &Path,
        old: &PathInfo,
        size: u64,
        mtime: Timestamp,
        options: &DetectOptions<'_>,
    ) -> Result<Option<PathInfo>> {
        let changed = old.size != Some(size)
            || (!options.check_content && old.mtime != mtime)
            || (options.check_content && {
                match self.content_hash(file, size, &old.name_hash, None) {
                    Ok(hash) => hash != old.hash,
                    Err(StoreError::Io(e)) => {
                        warn!(path = %rel, error = %e, "Cannot read file, skipping");
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            });
        if !changed {
            return Ok(None);
        }

        let current = self.scanned(rel, file, old.name_hash, size, mtime, options.write_to)?;
        if options.inverse {
            Ok(current.map(|_| old.clone()))
        } else {
            Ok(current)
        }
    }

    /// Hash of a file's content, stored as a blob if `write_to` is given.
    /// Empty files have no hash and no blob.
    fn content_hash(
        &self,
        file: &Path,
        size: u64,
        name_hash: &Hash,
        write_to: Option<RevisionRef>,
    ) -> Result<Option<Hash>> {
        if size == 0 {
            return Ok(None);
        }
        let target = write_to.map(|t| self.store.blob_path(t.branch, t.revision, name_hash));
        let hashed = self.store.blobs().hash_file(file, target.as_deref())?;
        Ok(Some(hashed.hash))
    }
}

fn stat(file: &Path) -> std::io::Result<(u64, Timestamp)> {
    let meta = fs::metadata(file)?;
    Ok((meta.len(), Timestamp::from_system_time(meta.modified()?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchId, Revision};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        store: RevisionStore,
        config: Config,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        let store = RevisionStore::new(root.join(STORE_FOLDER), false);
        fs::create_dir_all(root.join(STORE_FOLDER)).unwrap();
        Fixture {
            _dir: dir,
            root,
            store,
            config: Config::default(),
        }
    }

    #[test]
    fn test_detects_additions_and_writes_blobs() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"0123456789").unwrap();
        fs::write(f.root.join("empty.txt"), b"").unwrap();
        fs::create_dir_all(f.root.join("sub")).unwrap();
        fs::write(f.root.join("sub/b.txt"), b"hello").unwrap();
        fs::write(f.root.join("skip.bak"), b"ignored").unwrap();

        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let target = RevisionRef::new(BranchId(0), Revision(0));
        let changes = detector
            .detect(
                &PathSet::new(),
                &DetectOptions {
                    write_to: Some(target),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(
            changes.additions.keys().collect::<Vec<_>>(),
            vec!["a.txt", "empty.txt", "sub/b.txt"]
        );
        assert!(f
            .store
            .has_blob(BranchId(0), Revision(0), &Hash::of_path("a.txt")));
        assert!(!f
            .store
            .has_blob(BranchId(0), Revision(0), &Hash::of_path("empty.txt")));
        assert_eq!(changes.additions["sub/b.txt"].size, Some(5));
    }

    #[test]
    fn test_detects_modifications_and_deletions() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"0123456789").unwrap();
        fs::write(f.root.join("b.txt"), b"bbbb").unwrap();

        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let known = detector
            .detect(&PathSet::new(), &DetectOptions::default())
            .unwrap()
            .additions;

        fs::write(f.root.join("a.txt"), b"012345678901234").unwrap();
        fs::remove_file(f.root.join("b.txt")).unwrap();

        let changes = detector.detect(&known, &DetectOptions::default()).unwrap();
        assert_eq!(changes.modifications["a.txt"].size, Some(15));
        assert!(changes.deletions.contains_key("b.txt"));
        assert!(changes.additions.is_empty());

        let inverse = detector
            .detect(
                &known,
                &DetectOptions {
                    inverse: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(inverse.modifications["a.txt"].size, Some(10));
    }

    #[test]
    fn test_content_check_ignores_touch() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"same").unwrap();
        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let mut known = detector
            .detect(&PathSet::new(), &DetectOptions::default())
            .unwrap()
            .additions;
        known.get_mut("a.txt").unwrap().mtime = Timestamp(1);

        let lax = detector.detect(&known, &DetectOptions::default()).unwrap();
        assert!(lax.modifications.contains_key("a.txt"));

        let strict = detector
            .detect(
                &known,
                &DetectOptions {
                    check_content: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(strict.is_empty());
    }

    #[test]
    fn test_ignored_paths_are_not_deleted() {
        let f = fixture();
        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let mut known = PathSet::new();
        for path in ["target/out.bin", "notes.bak", "gone.txt"] {
            known.insert(
                path.to_string(),
                PathInfo {
                    name_hash: Hash::of_path(path),
                    size: Some(1),
                    mtime: Timestamp(1),
                    hash: None,
                },
            );
        }
        let changes = detector.detect(&known, &DetectOptions::default()).unwrap();
        assert_eq!(changes.deletions.keys().collect::<Vec<_>>(), vec!["gone.txt"]);
    }

    #[test]
    fn test_tracking_filters() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"a").unwrap();
        fs::write(f.root.join("b.md"), b"b").unwrap();
        fs::write(f.root.join("c.txt"), b"c").unwrap();

        let only = PatternSet::new(&["*.txt"]);
        let except = PatternSet::new(&["c.*"]);
        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let changes = detector
            .detect(
                &PathSet::new(),
                &DetectOptions {
                    consider_only: Some(&only),
                    dont_consider: Some(&except),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(changes.additions.keys().collect::<Vec<_>>(), vec!["a.txt"]);
    }

    #[test]
    fn test_tombstoned_path_is_readded_with_same_name_hash() {
        let f = fixture();
        fs::write(f.root.join("a.txt"), b"back").unwrap();
        let mut known = PathSet::new();
        let name_hash = Hash::of_path("a.txt");
        known.insert(
            "a.txt".into(),
            PathInfo {
                name_hash,
                size: None,
                mtime: Timestamp(1),
                hash: None,
            },
        );
        let detector = ChangeDetector::new(&f.root, &f.config, &f.store);
        let changes = detector.detect(&known, &DetectOptions::default()).unwrap();
        assert_eq!(changes.additions["a.txt"].name_hash, name_hash);
        assert!(changes.deletions.is_empty());
    }
}
