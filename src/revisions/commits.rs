//! Per-branch commit logs.

use crate::error::Result;
use crate::types::{CommitInfo, Revision};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Ordered commit log of one branch.
pub type CommitLog = BTreeMap<Revision, CommitInfo>;

/// Read a commit log document.
pub fn read_commits(path: &Path) -> Result<CommitLog> {
    let data = fs::read(path)?;
    let list: Vec<CommitInfo> = serde_json::from_slice(&data)?;
    Ok(list.into_iter().map(|c| (c.number, c)).collect())
}

/// Write a commit log document, keeping a best-effort backup at `backup`.
pub fn write_commits(path: &Path, backup: &Path, commits: &CommitLog) -> Result<()> {
    if path.exists() {
        if let Err(e) = fs::copy(path, backup) {
            debug!(error = %e, "Cannot back up commit log");
        }
    }
    let list: Vec<&CommitInfo> = commits.values().collect();
    fs::write(path, serde_json::to_vec_pretty(&list)?)?;
    Ok(())
}
