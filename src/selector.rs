//! Revision selector grammar.
//!
//! | Text         | Meaning                                         |
//! |--------------|-------------------------------------------------|
//! | `` or `/`    | current branch, latest revision                 |
//! | `/R`         | revision `R` of the current branch              |
//! | `B/`         | latest revision of branch `B`                   |
//! | `B/R`        | revision `R` of branch `B`                      |
//! | `N`          | revision `N` of the current branch              |
//! | `name`       | latest revision of the branch called `name`     |
//!
//! Branches are given by number or name. Revisions are given by number,
//! negative numbers counting from the end (`-1` is the latest), or by the
//! commit message (or tag) of the revision.

use crate::branches::BranchResolver;
use crate::error::{Result, StoreError};
use crate::manifest::Manifest;
use crate::types::{BranchId, Revision, RevisionRef};
use std::fmt;
use std::str::FromStr;

/// A parsed, unresolved revision selector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selector {
    branch: Option<String>,
    revision: Option<String>,
}

impl Selector {
    /// Selector for the current branch's latest revision.
    pub fn current() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        let selector = match text.split_once('/') {
            Some((branch, revision)) => {
                if revision.contains('/') {
                    return Err(StoreError::InvalidSelector(text.to_string()));
                }
                Self {
                    branch: non_empty(branch),
                    revision: non_empty(revision),
                }
            }
            None if text.is_empty() => Self::default(),
            None if text.parse::<i64>().is_ok() => Self {
                branch: None,
                revision: Some(text.to_string()),
            },
            None => Self {
                branch: Some(text.to_string()),
                revision: None,
            },
        };
        Ok(selector)
    }

    pub fn has_branch(&self) -> bool {
        self.branch.is_some()
    }

    /// Branch the selector refers to.
    pub fn resolve_branch(&self, manifest: &Manifest) -> Result<BranchId> {
        match &self.branch {
            None => Ok(manifest.current_branch),
            Some(label) => manifest
                .find_branch(label)
                .ok_or_else(|| StoreError::BranchNotFound(label.clone())),
        }
    }

    /// Resolve to a committed (branch, revision) pair.
    pub fn resolve(&self, manifest: &Manifest, resolver: &BranchResolver<'_>) -> Result<RevisionRef> {
        let branch = self.resolve_branch(manifest)?;
        let head = resolver.head_revision(branch)?;

        let revision = match &self.revision {
            None => head,
            Some(text) => match text.parse::<i64>() {
                Ok(number) => {
                    let absolute = if number < 0 {
                        head.0 as i64 + 1 + number
                    } else {
                        number
                    };
                    if absolute < 0 || absolute > head.0 as i64 {
                        return Err(StoreError::RevisionNotFound {
                            branch,
                            revision: number,
                        });
                    }
                    Revision(absolute as u64)
                }
                Err(_) => resolver
                    .commit_log(branch)?
                    .values()
                    .rev()
                    .find(|c| c.message.as_deref() == Some(text.as_str()))
                    .map(|c| c.number)
                    .ok_or_else(|| {
                        StoreError::InvalidSelector(format!(
                            "no revision with message '{}' on branch {}",
                            text, branch
                        ))
                    })?,
            },
        };
        Ok(RevisionRef::new(branch, revision))
    }
}

impl FromStr for Selector {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.branch.as_deref().unwrap_or(""),
            self.revision.as_deref().unwrap_or("")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::revisions::{CommitLog, RevisionStore};
    use crate::types::{BranchInfo, CommitInfo, PathSet, RepositoryMode, Timestamp};
    use tempfile::TempDir;

    fn repo(dir: &TempDir) -> (Manifest, RevisionStore) {
        let store = RevisionStore::new(dir.path(), false);
        let mut manifest = Manifest::new(RepositoryMode::Simple, false, false);
        for (number, name, revisions) in [(0u64, "main", 3u64), (1, "feature", 1)] {
            let id = BranchId(number);
            manifest.branches.insert(
                id,
                BranchInfo {
                    number: id,
                    created: Timestamp(0),
                    name: Some(name.to_string()),
                    in_sync: true,
                    tracked: Vec::new(),
                    untracked: Vec::new(),
                    parent: None,
                },
            );
            let mut log = CommitLog::new();
            for r in 0..revisions {
                store.save_delta(id, Revision(r), &PathSet::new()).unwrap();
                log.insert(
                    Revision(r),
                    CommitInfo {
                        number: Revision(r),
                        created: Timestamp(r as i64),
                        message: Some(format!("{}-{}", name, r)),
                    },
                );
            }
            store.save_commits(id, &log).unwrap();
        }
        (manifest, store)
    }

    fn resolve(text: &str, manifest: &Manifest, store: &RevisionStore) -> Result<RevisionRef> {
        let resolver = BranchResolver::new(&manifest.branches, store);
        Selector::parse(text)?.resolve(manifest, &resolver)
    }

    #[test]
    fn test_selector_forms() {
        let dir = TempDir::new().unwrap();
        let (manifest, store) = repo(&dir);
        let at = |b, r| RevisionRef::new(BranchId(b), Revision(r));

        assert_eq!(resolve("", &manifest, &store).unwrap(), at(0, 2));
        assert_eq!(resolve("/", &manifest, &store).unwrap(), at(0, 2));
        assert_eq!(resolve("/1", &manifest, &store).unwrap(), at(0, 1));
        assert_eq!(resolve("1", &manifest, &store).unwrap(), at(0, 1));
        assert_eq!(resolve("-1", &manifest, &store).unwrap(), at(0, 2));
        assert_eq!(resolve("-3", &manifest, &store).unwrap(), at(0, 0));
        assert_eq!(resolve("1/", &manifest, &store).unwrap(), at(1, 0));
        assert_eq!(resolve("feature", &manifest, &store).unwrap(), at(1, 0));
        assert_eq!(resolve("main/0", &manifest, &store).unwrap(), at(0, 0));
        assert_eq!(resolve("main/main-1", &manifest, &store).unwrap(), at(0, 1));
    }

    #[test]
    fn test_selector_errors() {
        let dir = TempDir::new().unwrap();
        let (manifest, store) = repo(&dir);

        assert!(matches!(
            resolve("3", &manifest, &store),
            Err(StoreError::RevisionNotFound { revision: 3, .. })
        ));
        assert!(matches!(
            resolve("-4", &manifest, &store),
            Err(StoreError::RevisionNotFound { .. })
        ));
        assert!(matches!(
            resolve("nope/", &manifest, &store),
            Err(StoreError::BranchNotFound(_))
        ));
        assert!(matches!(
            resolve("/unknown message", &manifest, &store),
            Err(StoreError::InvalidSelector(_))
        ));
        assert!(matches!(
            Selector::parse("a/b/c"),
            Err(StoreError::InvalidSelector(_))
        ));
    }
}
