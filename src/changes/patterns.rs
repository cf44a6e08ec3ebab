//! Directory-anchored tracking patterns.
//!
//! A pattern such as `src/*.rs` applies to files directly inside `src`; a
//! pattern without a slash applies to the repository root.

use crate::error::{Result, StoreError};
use crate::glob::fnmatch;
use std::collections::BTreeMap;
use std::path::{Component, Path};

/// Split a relative path or pattern into (directory, file part).
///
/// The root directory is the empty string.
pub fn split_pattern(pattern: &str) -> (&str, &str) {
    match pattern.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", pattern),
    }
}

/// Normalize a user-supplied relative path to the stored `/`-separated form.
///
/// Rejects absolute paths and paths escaping the repository root.
pub fn normalize_rel_path(path: &str) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(&path.replace('\\', "/")).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(StoreError::InvalidPattern(format!(
                        "'{}' leaves the repository",
                        path
                    )));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(StoreError::InvalidPattern(format!(
                    "'{}' must be relative to the repository root",
                    path
                )))
            }
        }
    }
    Ok(parts.join("/"))
}

/// Build a pattern from a folder and a file glob.
pub fn join_pattern(folder: &str, glob: &str) -> Result<String> {
    if glob.is_empty() || glob.contains('/') {
        return Err(StoreError::InvalidPattern(format!(
            "file pattern '{}' must be a plain file name glob",
            glob
        )));
    }
    let folder = normalize_rel_path(folder)?;
    Ok(if folder.is_empty() {
        glob.to_string()
    } else {
        format!("{}/{}", folder, glob)
    })
}

/// A set of tracking patterns indexed by directory.
#[derive(Clone, Debug, Default)]
pub struct PatternSet {
    by_dir: BTreeMap<String, Vec<String>>,
    len: usize,
}

impl PatternSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut set = Self::default();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let (dir, _) = split_pattern(pattern);
            set.by_dir
                .entry(dir.to_string())
                .or_default()
                .push(pattern.to_string());
            set.len += 1;
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// True if any pattern covers the relative file path.
    pub fn matches(&self, rel_path: &str) -> bool {
        self.matching(rel_path).next().is_some()
    }

    /// Patterns covering the relative file path.
    pub fn matching<'s>(&'s self, rel_path: &'s str) -> impl Iterator<Item = &'s str> + 's {
        let (dir, name) = split_pattern(rel_path);
        self.by_dir
            .get(dir)
            .into_iter()
            .flatten()
            .filter(move |pattern| fnmatch(split_pattern(pattern).1, name))
            .map(String::as_str)
    }
}
