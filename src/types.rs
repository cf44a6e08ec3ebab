//! Core types for the offline repository.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a branch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchId(pub u64);

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", self.0)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl BranchId {
    pub fn next(self) -> Self {
        BranchId(self.0 + 1)
    }
}

/// Revision number within a branch, starting at 0.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Revision(pub u64);

impl fmt::Debug for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rev({})", self.0)
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

impl Revision {
    pub fn next(self) -> Self {
        Revision(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(Revision(self.0 - 1))
        } else {
            None
        }
    }
}

/// SHA-256 digest, used both for file contents and for path names.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Name hash of a normalized relative path.
    ///
    /// Stable across revisions for the same logical file, so it doubles as
    /// the on-disk blob name.
    pub fn of_path(rel_path: &str) -> Self {
        Self::from_bytes(rel_path.as_bytes())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Convert a file system time, clamping anything before the epoch to 0.
    pub fn from_system_time(time: SystemTime) -> Self {
        let millis = time
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Timestamp(millis)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// A file's presence and identity at a revision.
///
/// `size == None` marks a tombstone: the path was deleted at that revision.
/// `hash` is `None` for tombstones and for empty files, which have no blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathInfo {
    pub name_hash: Hash,
    pub size: Option<u64>,
    pub mtime: Timestamp,
    pub hash: Option<Hash>,
}

impl PathInfo {
    pub fn is_tombstone(&self) -> bool {
        self.size.is_none()
    }

    /// The tombstone recorded when this path gets deleted.
    pub fn tombstone(&self) -> Self {
        Self {
            name_hash: self.name_hash,
            size: None,
            mtime: self.mtime,
            hash: None,
        }
    }
}

/// Relative path (always `/`-separated) to path info.
pub type PathSet = BTreeMap<String, PathInfo>;

/// One entry of a branch's commit log.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub number: Revision,
    pub created: Timestamp,
    pub message: Option<String>,
}

/// Non-owning reference from a fast branch to the branch it was cut from.
///
/// Revisions up to and including `cutover` are serviced by `branch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchParent {
    pub branch: BranchId,
    pub cutover: Revision,
}

/// Branch metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub number: BranchId,
    pub created: Timestamp,
    pub name: Option<String>,
    pub in_sync: bool,
    pub tracked: Vec<String>,
    pub untracked: Vec<String>,
    pub parent: Option<BranchParent>,
}

impl BranchInfo {
    /// Name if set, otherwise the branch number (`b3`).
    pub fn label(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.number.to_string())
    }
}

/// Differences between a working tree and a path set.
///
/// `moves` annotates additions and deletions: a moved file stays in both
/// `additions` (new path) and `deletions` (old path).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub additions: PathSet,
    pub deletions: PathSet,
    pub modifications: PathSet,
    pub moves: BTreeMap<String, (String, PathInfo)>,
}

impl ChangeSet {
    /// True if anything was added, deleted, modified or moved.
    pub fn is_modified(&self) -> bool {
        !self.additions.is_empty()
            || !self.deletions.is_empty()
            || !self.modifications.is_empty()
            || !self.moves.is_empty()
    }

    /// Number of changed paths (moves are counted through their add/delete).
    pub fn len(&self) -> usize {
        self.additions.len() + self.deletions.len() + self.modifications.len()
    }

    pub fn is_empty(&self) -> bool {
        !self.is_modified()
    }

    /// Additions that are not the target of a move.
    pub fn real_additions(&self) -> impl Iterator<Item = (&String, &PathInfo)> {
        self.additions
            .iter()
            .filter(|(path, _)| !self.moves.contains_key(*path))
    }

    /// Deletions that are not the origin of a move.
    pub fn real_deletions(&self) -> impl Iterator<Item = (&String, &PathInfo)> {
        self.deletions.iter().filter(|(path, _)| {
            !self.moves.values().any(|(origin, _)| origin == *path)
        })
    }
}

/// How the working tree is mapped to the versioned set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RepositoryMode {
    /// Every non-ignored file is versioned.
    #[default]
    Simple,
    /// Files matching the branch's tracking patterns are versioned.
    Track,
    /// Like `Track`, but patterns are staged per commit and cleared afterwards.
    Picky,
}

impl RepositoryMode {
    pub fn uses_patterns(self) -> bool {
        !matches!(self, RepositoryMode::Simple)
    }
}

impl fmt::Display for RepositoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryMode::Simple => write!(f, "simple"),
            RepositoryMode::Track => write!(f, "track"),
            RepositoryMode::Picky => write!(f, "picky"),
        }
    }
}

/// A fully resolved (branch, revision) pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RevisionRef {
    pub branch: BranchId,
    pub revision: Revision,
}

impl RevisionRef {
    pub fn new(branch: BranchId, revision: Revision) -> Self {
        Self { branch, revision }
    }
}

impl fmt::Display for RevisionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.branch, self.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hash = Hash::from_bytes(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn test_name_hash_is_stable() {
        assert_eq!(Hash::of_path("src/a.txt"), Hash::of_path("src/a.txt"));
        assert_ne!(Hash::of_path("src/a.txt"), Hash::of_path("src/b.txt"));
    }

    #[test]
    fn test_revision_navigation() {
        assert_eq!(Revision(5).next(), Revision(6));
        assert_eq!(Revision(5).prev(), Some(Revision(4)));
        assert_eq!(Revision(0).prev(), None);
    }

    #[test]
    fn test_tombstone_keeps_name_hash() {
        let info = PathInfo {
            name_hash: Hash::of_path("a.txt"),
            size: Some(10),
            mtime: Timestamp(1),
            hash: Some(Hash::from_bytes(b"0123456789")),
        };
        let tomb = info.tombstone();
        assert!(tomb.is_tombstone());
        assert_eq!(tomb.name_hash, info.name_hash);
        assert!(tomb.hash.is_none());
    }

    #[test]
    fn test_moves_annotate_real_changes() {
        let info = PathInfo {
            name_hash: Hash::of_path("new.txt"),
            size: Some(3),
            mtime: Timestamp(1),
            hash: Some(Hash::from_bytes(b"abc")),
        };
        let mut changes = ChangeSet::default();
        changes.additions.insert("new.txt".into(), info.clone());
        changes.deletions.insert("old.txt".into(), info.clone());
        changes
            .moves
            .insert("new.txt".into(), ("old.txt".into(), info));

        assert!(changes.is_modified());
        assert_eq!(changes.real_additions().count(), 0);
        assert_eq!(changes.real_deletions().count(), 0);
        assert_eq!(changes.len(), 2);
    }
}
