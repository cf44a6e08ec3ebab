//! Revision store: branch folders, commit logs, deltas and blob locations.

use super::commits::{read_commits, write_commits, CommitLog};
use super::deltas::{read_delta, write_delta};
use crate::blobs::BlobStorage;
use crate::error::{Result, StoreError};
use crate::manifest::BACKUP_SUFFIX;
use crate::types::{BranchId, Hash, PathSet, Revision};
use lru::LruCache;
use parking_lot::Mutex;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, trace};

/// Commit log file name inside a branch folder.
const COMMITS_FILE: &str = "commits";

/// Delta file name inside a revision folder.
const DELTA_FILE: &str = "delta";

/// Default number of deltas kept in memory.
const DEFAULT_DELTA_CACHE: usize = 256;

/// On-disk revision storage under the store folder.
///
/// ```text
/// <store>/b<N>/commits          commit log of branch N
/// <store>/b<N>/r<M>/delta       path delta of revision M
/// <store>/b<N>/r<M>/<namehash>  content blobs first stored at revision M
/// ```
pub struct RevisionStore {
    /// Store folder.
    path: PathBuf,

    /// Blob codec for this repository.
    blobs: BlobStorage,

    /// Recently read deltas.
    delta_cache: Mutex<LruCache<(BranchId, Revision), Arc<PathSet>>>,
}

impl RevisionStore {
    /// Open the revision store in `path` with the default cache size.
    pub fn new(path: impl AsRef<Path>, compress: bool) -> Self {
        Self::with_cache_size(path, compress, DEFAULT_DELTA_CACHE)
    }

    pub fn with_cache_size(path: impl AsRef<Path>, compress: bool, cache_size: usize) -> Self {
        let cache_size = NonZeroUsize::new(cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            path: path.as_ref().to_path_buf(),
            blobs: BlobStorage::new(compress),
            delta_cache: Mutex::new(LruCache::new(cache_size)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn blobs(&self) -> &BlobStorage {
        &self.blobs
    }

    /// Folder of a branch.
    pub fn branch_dir(&self, branch: BranchId) -> PathBuf {
        self.path.join(branch.to_string())
    }

    /// Folder of a revision.
    pub fn revision_dir(&self, branch: BranchId, revision: Revision) -> PathBuf {
        self.branch_dir(branch).join(revision.to_string())
    }

    /// Location of a content blob (whether or not it exists).
    pub fn blob_path(&self, branch: BranchId, revision: Revision, name_hash: &Hash) -> PathBuf {
        self.revision_dir(branch, revision).join(name_hash.to_hex())
    }

    /// True if the revision folder physically holds the blob.
    pub fn has_blob(&self, branch: BranchId, revision: Revision, name_hash: &Hash) -> bool {
        self.blob_path(branch, revision, name_hash).is_file()
    }

    pub fn create_branch_dir(&self, branch: BranchId) -> Result<PathBuf> {
        let dir = self.branch_dir(branch);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn create_revision_dir(&self, branch: BranchId, revision: Revision) -> Result<PathBuf> {
        let dir = self.revision_dir(branch, revision);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Discard a revision folder that never got a delta (an aborted commit).
    pub fn discard_revision(&self, branch: BranchId, revision: Revision) -> Result<()> {
        let dir = self.revision_dir(branch, revision);
        if dir.join(DELTA_FILE).exists() {
            return Err(StoreError::InvalidOperation(format!(
                "revision {}/{} is already committed",
                branch, revision
            )));
        }
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Commit log of a branch (its own revisions only for fast branches).
    pub fn load_commits(&self, branch: BranchId) -> Result<CommitLog> {
        let path = self.branch_dir(branch).join(COMMITS_FILE);
        if !path.exists() {
            return Err(StoreError::Corruption(format!(
                "missing commit log for branch {}",
                branch
            )));
        }
        read_commits(&path)
    }

    pub fn save_commits(&self, branch: BranchId, commits: &CommitLog) -> Result<()> {
        let dir = self.create_branch_dir(branch)?;
        write_commits(
            &dir.join(COMMITS_FILE),
            &dir.join(format!("{}{}", COMMITS_FILE, BACKUP_SUFFIX)),
            commits,
        )
    }

    /// Delta recorded at a revision of the branch that physically owns it.
    pub fn load_delta(&self, branch: BranchId, revision: Revision) -> Result<Arc<PathSet>> {
        if let Some(delta) = self.delta_cache.lock().get(&(branch, revision)).cloned() {
            trace!(%branch, %revision, "Delta cache hit");
            return Ok(delta);
        }

        let path = self.revision_dir(branch, revision).join(DELTA_FILE);
        if !path.exists() {
            return Err(StoreError::RevisionNotFound {
                branch,
                revision: revision.0 as i64,
            });
        }
        let delta = Arc::new(read_delta(&path)?);
        self.delta_cache
            .lock()
            .put((branch, revision), Arc::clone(&delta));
        Ok(delta)
    }

    pub fn save_delta(&self, branch: BranchId, revision: Revision, delta: &PathSet) -> Result<()> {
        let dir = self.create_revision_dir(branch, revision)?;
        write_delta(&dir.join(DELTA_FILE), delta)?;
        self.delta_cache
            .lock()
            .put((branch, revision), Arc::new(delta.clone()));
        Ok(())
    }

    /// Copy a whole revision folder (delta and blobs) to another branch.
    ///
    /// The target folder must not exist yet.
    pub fn copy_revision(&self, from: BranchId, revision: Revision, to: BranchId) -> Result<()> {
        let source = self.revision_dir(from, revision);
        let target = self.revision_dir(to, revision);
        if target.exists() {
            return Err(StoreError::InvalidOperation(format!(
                "revision folder {} already exists",
                target.display()
            )));
        }
        debug!(%from, %to, %revision, "Copying revision folder");

        fs::create_dir_all(&target)?;
        for entry in fs::read_dir(&source)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                fs::copy(entry.path(), target.join(entry.file_name()))?;
            }
        }
        Ok(())
    }

    /// Copy one blob into another revision folder, keeping its stored encoding.
    pub fn copy_blob(&self, source: &Path, to: BranchId, revision: Revision, name_hash: &Hash) -> Result<()> {
        let target = self.blob_path(to, revision, name_hash);
        if target.exists() {
            return Err(StoreError::BlobExists(target.display().to_string()));
        }
        fs::copy(source, &target)?;
        Ok(())
    }

    /// Move a branch folder aside as the backup `b<N>_last`, replacing an
    /// older backup.
    pub fn retire_branch(&self, branch: BranchId) -> Result<PathBuf> {
        let dir = self.branch_dir(branch);
        let backup = self
            .path
            .join(format!("{}{}", branch, BACKUP_SUFFIX));
        if backup.exists() {
            if let Err(e) = fs::remove_dir_all(&backup) {
                debug!(error = %e, "Cannot remove previous branch backup");
            }
        }
        fs::rename(&dir, &backup)?;
        self.forget_branch(branch);
        Ok(backup)
    }

    /// Drop cached deltas of a branch.
    pub fn forget_branch(&self, branch: BranchId) {
        let mut cache = self.delta_cache.lock();
        let stale: Vec<_> = cache
            .iter()
            .map(|(key, _)| *key)
            .filter(|(b, _)| *b == branch)
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}
