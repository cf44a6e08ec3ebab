//! Repository state and commands.
//!
//! A [`Repository`] is loaded once per command invocation: it holds the
//! manifest, the layered configuration and the revision store for one
//! working tree. Every command is a method that orchestrates change
//! detection, branch resolution and the revision store, and returns a
//! report instead of printing.

mod commit;
mod dump;
mod inspect;
mod switch;
mod tracking;

pub use commit::{BranchOptions, CommitOptions, CommitReport};
pub use dump::DumpReport;
pub use inspect::{
    BranchStatus, DiffReport, FileDiff, LogEntry, LsEntry, LsStatus, StatusReport,
};
pub use switch::{SwitchOptions, SwitchReport, UpdateOptions, UpdateReport};
pub use tracking::{MoveOptions, MoveReport};

use crate::branches::{BranchLifecycle, BranchResolver};
use crate::changes::{ChangeDetector, DetectOptions, PatternSet};
use crate::config::{edit_overlay, Config, ConfigEdit, ConfigScope, GlobalConfig};
use crate::error::{Result, StoreError};
use crate::manifest::{Manifest, STORE_FOLDER};
use crate::revisions::RevisionStore;
use crate::types::{BranchId, BranchInfo, ChangeSet, PathInfo, PathSet, RepositoryMode, RevisionRef};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Options for taking a working tree offline.
#[derive(Clone, Debug, Default)]
pub struct OfflineOptions {
    /// Versioning mode; defaults to the `track`/`picky` configuration flags.
    pub mode: Option<RepositoryMode>,
    /// Compare contents instead of modification times; defaults to `strict`.
    pub strict: Option<bool>,
    /// Store compressed blobs; defaults to `compress`.
    pub compress: Option<bool>,
    /// Wipe an existing store instead of failing.
    pub force: bool,
    /// Name of branch 0; defaults to `defaultbranch`.
    pub name: Option<String>,
    /// Message of revision 0.
    pub message: Option<String>,
}

/// Tracking pattern filters for one branch.
pub(crate) struct Filters {
    only: Option<PatternSet>,
    except: Option<PatternSet>,
}

impl Filters {
    pub(crate) fn options(&self, check_content: bool) -> DetectOptions<'_> {
        DetectOptions {
            check_content,
            consider_only: self.only.as_ref(),
            dont_consider: self.except.as_ref(),
            ..Default::default()
        }
    }
}

/// An offline working tree.
pub struct Repository {
    /// Working tree root.
    root: PathBuf,

    /// Repository manifest (branch table, tags, flags, local config).
    manifest: Manifest,

    /// Effective configuration for this invocation.
    config: Config,

    /// Per-user configuration layer.
    global: GlobalConfig,

    /// Revision storage under the store folder.
    store: RevisionStore,
}

impl Repository {
    /// Closest folder at or above `start` holding a store.
    pub fn find_root(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .find(|dir| dir.join(STORE_FOLDER).is_dir())
            .map(Path::to_path_buf)
    }

    /// Put a working tree under offline version control.
    ///
    /// Branch 0 revision 0 records the current file tree (in tracking modes
    /// nothing is tracked yet, so it starts empty).
    pub fn offline(root: impl AsRef<Path>, global: GlobalConfig, options: OfflineOptions) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store_dir = root.join(STORE_FOLDER);
        if store_dir.exists() {
            if !options.force {
                return Err(StoreError::AlreadyOffline);
            }
            warn!(store = %store_dir.display(), "Wiping existing repository store");
            fs::remove_dir_all(&store_dir)?;
        }

        let config = Config::layered(&Default::default(), global.overlay())?;
        let mode = options.mode.unwrap_or(if config.picky {
            RepositoryMode::Picky
        } else if config.track {
            RepositoryMode::Track
        } else {
            RepositoryMode::Simple
        });
        let strict = options.strict.unwrap_or(config.strict);
        let compress = options.compress.unwrap_or(config.compress);

        fs::create_dir_all(&store_dir)?;
        let mut manifest = Manifest::new(mode, strict, compress);
        let store = RevisionStore::new(&store_dir, compress);

        let only = mode.uses_patterns().then(PatternSet::default);
        let detector = ChangeDetector::new(&root, &config, &store);
        let detect = DetectOptions {
            check_content: strict,
            consider_only: only.as_ref(),
            ..Default::default()
        };
        let name = options.name.or_else(|| config.default_branch.clone());
        let branch = BranchLifecycle::new(&mut manifest, &store).create_from_tree(
            &detector,
            detect,
            name,
            options.message.or_else(|| Some("Offline repository created".to_string())),
            None,
        )?;
        manifest.current_branch = branch;
        manifest.save(&store_dir)?;

        info!(root = %root.display(), %mode, strict, compress, "Repository is now offline");
        Ok(Self {
            root,
            manifest,
            config,
            global,
            store,
        })
    }

    /// Open the repository whose store is in `root`.
    pub fn open(root: impl AsRef<Path>, global: GlobalConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let store_dir = root.join(STORE_FOLDER);
        let manifest = Manifest::load(&store_dir)?
            .ok_or_else(|| StoreError::NotOffline(root.display().to_string()))?;
        let config = Config::layered(&manifest.config, global.overlay())?;
        let store = RevisionStore::new(&store_dir, manifest.compress);
        debug!(root = %root.display(), branch = %manifest.current_branch, "Opened repository");
        Ok(Self {
            root,
            manifest,
            config,
            global,
            store,
        })
    }

    /// Leave offline mode by removing the store.
    ///
    /// `force` ignores branches with commits not reflected upstream;
    /// `force_dirty` also ignores uncommitted changes in the file tree.
    pub fn online(self, force: bool, force_dirty: bool) -> Result<()> {
        let unsynced: Vec<BranchId> = self
            .manifest
            .branches
            .values()
            .filter(|b| !b.in_sync)
            .map(|b| b.number)
            .collect();
        if !unsynced.is_empty() && !force {
            return Err(StoreError::UnsyncedBranches(unsynced));
        }

        let (changes, _) = self.current_changes(self.manifest.strict)?;
        if changes.is_modified() && !force_dirty {
            return Err(StoreError::DirtyWorkingTree(changes.len()));
        }

        fs::remove_dir_all(self.store_dir())?;
        info!(root = %self.root.display(), "Repository is now online");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_FOLDER)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &RevisionStore {
        &self.store
    }

    pub fn mode(&self) -> RepositoryMode {
        self.manifest.mode
    }

    pub fn current_branch(&self) -> Result<&BranchInfo> {
        self.manifest.current()
    }

    pub fn resolver(&self) -> BranchResolver<'_> {
        BranchResolver::new(&self.manifest.branches, &self.store)
    }

    pub fn detector(&self) -> ChangeDetector<'_> {
        ChangeDetector::new(&self.root, &self.config, &self.store)
    }

    /// Latest revision of the current branch.
    pub fn head(&self) -> Result<RevisionRef> {
        let branch = self.manifest.current_branch;
        Ok(RevisionRef::new(branch, self.resolver().head_revision(branch)?))
    }

    /// Committed path set at a revision.
    pub fn snapshot(&self, at: RevisionRef) -> Result<PathSet> {
        self.resolver().fold(at.branch, at.revision)
    }

    /// Persist manifest changes.
    pub fn save(&self) -> Result<()> {
        self.manifest.save(&self.store_dir())
    }

    fn uses_patterns(&self) -> Result<()> {
        if self.manifest.mode.uses_patterns() {
            Ok(())
        } else {
            Err(StoreError::WrongMode(self.manifest.mode.to_string()))
        }
    }

    /// Tracking filters of a branch: nothing in simple mode, otherwise the
    /// tracked patterns minus the untracked ones.
    pub(crate) fn filters_for(&self, tracked: &[String], untracked: &[String]) -> Filters {
        if !self.manifest.mode.uses_patterns() {
            return Filters {
                only: None,
                except: None,
            };
        }
        Filters {
            only: Some(PatternSet::new(tracked)),
            except: (!untracked.is_empty()).then(|| PatternSet::new(untracked)),
        }
    }

    pub(crate) fn branch_filters(&self, branch: BranchId) -> Result<Filters> {
        let info = self.manifest.branch(branch)?;
        Ok(self.filters_for(&info.tracked, &info.untracked))
    }

    /// Changes of the file tree against the current branch's latest commit.
    pub fn current_changes(&self, check_content: bool) -> Result<(ChangeSet, RevisionRef)> {
        let head = self.head()?;
        let known = self.snapshot(head)?;
        let filters = self.branch_filters(head.branch)?;
        let changes = self.detector().detect(&known, &filters.options(check_content))?;
        Ok((changes, head))
    }

    /// Write a committed file version into the working tree.
    pub(crate) fn restore_file(&self, rel: &str, info: &PathInfo, source: RevisionRef) -> Result<()> {
        let target = self.root.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match info.hash {
            None => fs::write(&target, b"")?,
            Some(_) => {
                let (_, blob) =
                    self.resolver()
                        .find_revision(source.branch, source.revision, &info.name_hash)?;
                self.store.blobs().restore(&blob, &target)?;
            }
        }
        let mtime = filetime::FileTime::from_unix_time(
            info.mtime.0.div_euclid(1000),
            (info.mtime.0.rem_euclid(1000) * 1_000_000) as u32,
        );
        if let Err(e) = filetime::set_file_mtime(&target, mtime) {
            warn!(path = %rel, error = %e, "Cannot set modification time");
        }
        debug!(path = %rel, from = %source, "Restored file");
        Ok(())
    }

    /// Committed content of a file at a revision.
    pub(crate) fn committed_content(&self, info: &PathInfo, source: RevisionRef) -> Result<Vec<u8>> {
        if info.hash.is_none() {
            return Ok(Vec::new());
        }
        let (_, blob) = self
            .resolver()
            .find_revision(source.branch, source.revision, &info.name_hash)?;
        self.store.blobs().read(&blob)
    }

    pub(crate) fn delete_file(&self, rel: &str) -> Result<()> {
        fs::remove_file(self.root.join(rel))?;
        debug!(path = %rel, "Deleted file");
        Ok(())
    }

    /// Edit the local (`ConfigScope::Local`) or global configuration layer
    /// and rebuild the effective configuration.
    pub fn edit_config(&mut self, edit: &ConfigEdit, scope: ConfigScope) -> Result<()> {
        match scope {
            ConfigScope::Local => {
                let base = Config::layered(&Default::default(), self.global.overlay())?;
                edit_overlay(&mut self.manifest.config, edit, scope, &base)?;
                self.save()?;
            }
            ConfigScope::Global => self.global.edit(edit)?,
        }
        self.config = Config::layered(&self.manifest.config, self.global.overlay())?;
        Ok(())
    }

    /// Local and global configuration layers.
    pub fn config_layers(&self) -> (&crate::config::ConfigOverlay, &crate::config::ConfigOverlay) {
        (&self.manifest.config, self.global.overlay())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn offline_repo(files: &[(&str, &str)], mode: RepositoryMode) -> (TempDir, Repository) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let target = dir.path().join(path);
            fs::create_dir_all(target.parent().unwrap()).unwrap();
            fs::write(target, content).unwrap();
        }
        let repo = Repository::offline(
            dir.path(),
            GlobalConfig::empty(),
            OfflineOptions {
                mode: Some(mode),
                ..Default::default()
            },
        )
        .unwrap();
        (dir, repo)
    }

    #[test]
    fn test_offline_records_tree_and_reopens() {
        let (dir, repo) = offline_repo(&[("a.txt", "0123456789"), ("sub/b.txt", "b")], RepositoryMode::Simple);
        let head = repo.head().unwrap();
        assert_eq!(head, RevisionRef::new(BranchId(0), crate::types::Revision(0)));
        assert_eq!(repo.snapshot(head).unwrap().len(), 2);
        drop(repo);

        let reopened = Repository::open(dir.path(), GlobalConfig::empty()).unwrap();
        assert!(reopened.current_branch().unwrap().in_sync);
        assert_eq!(Repository::find_root(&dir.path().join("sub")).unwrap(), dir.path());

        assert!(matches!(
            Repository::offline(dir.path(), GlobalConfig::empty(), OfflineOptions::default()),
            Err(StoreError::AlreadyOffline)
        ));
    }

    #[test]
    fn test_open_without_store() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Repository::open(dir.path(), GlobalConfig::empty()),
            Err(StoreError::NotOffline(_))
        ));
    }

    #[test]
    fn test_online_requires_clean_tree() {
        let (dir, repo) = offline_repo(&[("a.txt", "a")], RepositoryMode::Simple);
        fs::write(dir.path().join("new.txt"), "new").unwrap();
        assert!(matches!(
            repo.online(false, false),
            Err(StoreError::DirtyWorkingTree(1))
        ));

        let repo = Repository::open(dir.path(), GlobalConfig::empty()).unwrap();
        repo.online(false, true).unwrap();
        assert!(!dir.path().join(STORE_FOLDER).exists());
    }

    #[test]
    fn test_local_config_edit_rebuilds_effective_config() {
        let (_dir, mut repo) = offline_repo(&[("a.txt", "a")], RepositoryMode::Simple);
        repo.edit_config(
            &ConfigEdit::Add {
                key: "ignores".into(),
                value: "*.tmp".into(),
            },
            ConfigScope::Local,
        )
        .unwrap();
        assert!(repo.config().is_ignored_file("x.tmp"));
        assert!(repo.config().is_ignored_file("x.bak"));
    }
}
