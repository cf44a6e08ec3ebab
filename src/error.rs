//! Error types for the offline repository.

use crate::types::{BranchId, Hash, Revision};
use thiserror::Error;

/// Main error type for repository operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Unknown revision r{revision} on branch {branch}")]
    RevisionNotFound { branch: BranchId, revision: i64 },

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Cannot find versioned content {name_hash} on branch {branch} at or below r{revision}")]
    ContentNotFound {
        branch: BranchId,
        revision: Revision,
        name_hash: Hash,
    },

    #[error("Hash conflict: content already stored at {0}")]
    BlobExists(String),

    #[error("Repository is not offline (no store folder found under {0})")]
    NotOffline(String),

    #[error("Repository is already offline; use force to wipe the existing store")]
    AlreadyOffline,

    #[error("File tree contains changes ({0} paths); use force to proceed")]
    DirtyWorkingTree(usize),

    #[error("There are unsynchronized branches: {0:?}")]
    UnsyncedBranches(Vec<BranchId>),

    #[error("Nothing to commit")]
    NothingToCommit,

    #[error("Cannot remove the only remaining branch")]
    LastBranch,

    #[error("Invalid revision selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Commit message already used as a tag: {0}")]
    TagConflict(String),

    #[error("Operation not available in {0} mode")]
    WrongMode(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            StoreError::Deserialization(e.to_string())
        } else {
            StoreError::Serialization(e.to_string())
        }
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

impl From<zip::result::ZipError> for StoreError {
    fn from(e: zip::result::ZipError) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StoreError>;
