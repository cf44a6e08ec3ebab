//! Tracking patterns and pattern-based file moves.

use super::Repository;
use crate::changes::{join_pattern, reorder_renames, split_pattern, RenamePattern};
use crate::error::{Result, StoreError};
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info};

/// Options for `move_files`.
#[derive(Clone, Copy, Debug, Default)]
pub struct MoveOptions {
    /// Only rewrite the tracking pattern, leave the files alone.
    pub soft: bool,
    /// Overwrite existing files at the target names.
    pub force: bool,
}

/// Outcome of `move_files`.
#[derive(Clone, Debug, Default)]
pub struct MoveReport {
    /// Tracking pattern now in place of the source pattern.
    pub pattern: String,
    /// (old path, new path) in the order they were renamed.
    pub renamed: Vec<(String, String)>,
}

impl Repository {
    /// Track (or, with `negative`, untrack) files matching `glob` in `folder`.
    pub fn add_pattern(&mut self, folder: &str, glob: &str, negative: bool) -> Result<String> {
        self.uses_patterns()?;
        let pattern = join_pattern(folder, glob)?;
        let info = self.manifest.branch_mut(self.manifest.current_branch)?;
        let list = if negative {
            &mut info.untracked
        } else {
            &mut info.tracked
        };
        if list.contains(&pattern) {
            return Err(StoreError::InvalidPattern(format!(
                "'{}' is already {}",
                pattern,
                if negative { "untracked" } else { "tracked" }
            )));
        }
        list.push(pattern.clone());
        self.save()?;
        info!(%pattern, negative, "Added tracking pattern");
        Ok(pattern)
    }

    /// Drop a tracking (or, with `negative`, untracking) pattern.
    pub fn remove_pattern(&mut self, folder: &str, glob: &str, negative: bool) -> Result<String> {
        self.uses_patterns()?;
        let pattern = join_pattern(folder, glob)?;
        let info = self.manifest.branch_mut(self.manifest.current_branch)?;
        let list = if negative {
            &mut info.untracked
        } else {
            &mut info.tracked
        };
        let Some(position) = list.iter().position(|p| *p == pattern) else {
            return Err(StoreError::InvalidPattern(format!(
                "'{}' is not {}",
                pattern,
                if negative { "untracked" } else { "tracked" }
            )));
        };
        list.remove(position);
        self.save()?;
        info!(%pattern, negative, "Removed tracking pattern");
        Ok(pattern)
    }

    /// Rename files matching the tracked pattern `source` (`folder/glob`)
    /// to `target`, carrying wildcard captures over, and replace the
    /// tracking pattern.
    ///
    /// The rename takes effect in history with the next commit, as a
    /// deletion plus an addition.
    pub fn move_files(&mut self, source: &str, target: &str, options: MoveOptions) -> Result<MoveReport> {
        self.uses_patterns()?;
        let (source_folder, source_glob) = split_pattern(source);
        let (target_folder, target_glob) = split_pattern(target);
        let source_pattern = join_pattern(source_folder, source_glob)?;
        let target_pattern = join_pattern(target_folder, target_glob)?;
        let rename = RenamePattern::new(source_glob, target_glob)?;

        let current = self.manifest.current_branch;
        if !self.manifest.branch(current)?.tracked.contains(&source_pattern) {
            return Err(StoreError::InvalidPattern(format!(
                "'{}' is not tracked",
                source_pattern
            )));
        }

        let mut renamed = Vec::new();
        if !options.soft {
            let (from_dir, _) = split_pattern(&source_pattern);
            let (to_dir, _) = split_pattern(&target_pattern);
            let actions = self.rename_actions(from_dir, to_dir, &rename)?;
            let sources: BTreeSet<&str> = actions.iter().map(|(s, _)| s.as_str()).collect();
            if !options.force {
                if let Some((_, taken)) = actions
                    .iter()
                    .find(|(_, t)| !sources.contains(t.as_str()) && self.root.join(t).exists())
                {
                    return Err(StoreError::InvalidOperation(format!(
                        "'{}' already exists; use force to overwrite",
                        taken
                    )));
                }
            }

            let target_dir = self.root.join(to_dir);
            fs::create_dir_all(&target_dir)?;
            for (from, to) in reorder_renames(actions)? {
                if from != to {
                    fs::rename(self.root.join(&from), self.root.join(&to))?;
                    debug!(%from, %to, "Renamed file");
                }
                renamed.push((from, to));
            }
        }

        let info = self.manifest.branch_mut(current)?;
        for pattern in info.tracked.iter_mut().filter(|p| **p == source_pattern) {
            *pattern = target_pattern.clone();
        }
        info.tracked.dedup();
        self.save()?;
        info!(
            from = %source_pattern,
            to = %target_pattern,
            files = renamed.len(),
            "Moved files"
        );
        Ok(MoveReport {
            pattern: target_pattern,
            renamed,
        })
    }

    /// (source, target) relative paths for files in `from_dir` the rename
    /// applies to.
    fn rename_actions(
        &self,
        from_dir: &str,
        to_dir: &str,
        rename: &RenamePattern,
    ) -> Result<Vec<(String, String)>> {
        let join = |dir: &str, name: &str| {
            if dir.is_empty() {
                name.to_string()
            } else {
                format!("{}/{}", dir, name)
            }
        };
        let mut names: Vec<String> = Vec::new();
        for entry in fs::read_dir(self.root.join(from_dir))? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .filter(|name| !self.config.is_ignored_file(name))
            .filter_map(|name| {
                let new_name = rename.translate(&name)?;
                Some((join(from_dir, &name), join(to_dir, &new_name)))
            })
            .collect())
    }
}
