//! Move annotation over additions and deletions.

use crate::types::{ChangeSet, PathInfo};
use std::collections::{BTreeMap, BTreeSet};

/// Pair additions with deletions of the same file content.
///
/// A pair needs equal sizes and equal content hashes; unless `strict`, equal
/// modification times also count. Each deletion is paired at most once.
/// Both sides stay in the change set: the result only annotates them.
pub fn detect_moves(changes: &ChangeSet, strict: bool) -> BTreeMap<String, (String, PathInfo)> {
    let mut moves = BTreeMap::new();
    let mut used: BTreeSet<&str> = BTreeSet::new();

    for (path, added) in &changes.additions {
        if added.is_tombstone() {
            continue;
        }
        let origin = changes.deletions.iter().find(|(old, removed)| {
            !used.contains(old.as_str())
                && removed.size == added.size
                && (same_content(added, removed) || (!strict && removed.mtime == added.mtime))
        });
        if let Some((old, _)) = origin {
            used.insert(old.as_str());
            moves.insert(path.clone(), (old.clone(), added.clone()));
        }
    }
    moves
}

fn same_content(a: &PathInfo, b: &PathInfo) -> bool {
    matches!((a.hash, b.hash), (Some(x), Some(y)) if x == y)
}
