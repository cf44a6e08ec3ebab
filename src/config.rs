//! Layered configuration.
//!
//! Values resolve local (stored in the repository manifest) over global
//! (a per-user JSON file) over built-in defaults. A [`Config`] is built once
//! per command invocation and passed down explicitly.

use crate::error::{Result, StoreError};
use crate::glob::{first_match, matches_any};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Keys holding a boolean flag. Only settable globally.
pub const FLAG_KEYS: &[&str] = &["strict", "track", "picky", "compress"];

/// Keys holding a list of glob patterns.
pub const LIST_KEYS: &[&str] = &[
    "texttype",
    "bintype",
    "ignores",
    "ignoreDirs",
    "ignoresWhitelist",
    "ignoreDirsWhitelist",
];

/// Keys holding free text.
pub const TEXT_KEYS: &[&str] = &["defaultbranch"];

const TRUTH_VALUES: &[&str] = &["true", "yes", "on", "1", "enable", "enabled"];
const FALSE_VALUES: &[&str] = &["false", "no", "off", "0", "disable", "disabled"];

/// Extensions treated as text even without a `texttype` entry.
const KNOWN_TEXT_EXTENSIONS: &[&str] = &[
    "txt", "md", "rst", "csv", "tsv", "json", "yaml", "yml", "toml", "ini", "cfg", "xml",
    "html", "htm", "css", "js", "ts", "py", "rs", "c", "h", "cpp", "hpp", "java", "go", "rb",
    "sh", "bat", "sql", "tex", "log",
];

/// A single configuration value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Flag(bool),
    List(Vec<String>),
    Text(String),
}

/// Sparse key/value layer (local or global).
pub type ConfigOverlay = BTreeMap<String, ConfigValue>;

/// Where an effective value came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    Local,
    Global,
    Default,
}

/// Which overlay an edit applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigScope {
    Local,
    Global,
}

/// An edit to a configuration overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigEdit {
    /// Set a key. List values are `;`-separated.
    Set { key: String, value: String },
    /// Remove a key from the overlay.
    Unset { key: String },
    /// Append values (`;`-separated) to a list key.
    Add { key: String, value: String },
    /// Remove one value from a list key; `prune` drops an emptied local list.
    Remove { key: String, value: String, prune: bool },
}

/// Effective configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Always compare file contents instead of trusting modification times.
    pub strict: bool,
    /// New repositories use tracking patterns.
    pub track: bool,
    /// New repositories stage patterns per commit.
    pub picky: bool,
    /// New repositories store compressed blobs.
    pub compress: bool,
    pub texttype: Vec<String>,
    pub bintype: Vec<String>,
    pub ignores: Vec<String>,
    pub ignore_dirs: Vec<String>,
    pub ignores_whitelist: Vec<String>,
    pub ignore_dirs_whitelist: Vec<String>,
    /// Name given to branch 0 when going offline.
    pub default_branch: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict: false,
            track: false,
            picky: false,
            compress: false,
            texttype: strings(&["*.md", "*.txt", "*.rs", "*.py", "*.toml"]),
            bintype: Vec::new(),
            ignores: strings(&[
                "*.bak",
                "*.py[cdo]",
                "*.class",
                ".fslckout",
                "_FOSSIL_",
                "*.sos.zip",
            ]),
            ignore_dirs: strings(&[".*", "__pycache__", "target"]),
            ignores_whitelist: Vec::new(),
            ignore_dirs_whitelist: Vec::new(),
            default_branch: None,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Resolve local over global over defaults.
    pub fn layered(local: &ConfigOverlay, global: &ConfigOverlay) -> Result<Self> {
        let mut config = Self::default();
        config.apply(global)?;
        config.apply(local)?;
        Ok(config)
    }

    fn apply(&mut self, overlay: &ConfigOverlay) -> Result<()> {
        for (key, value) in overlay {
            match (key.as_str(), value) {
                ("strict", ConfigValue::Flag(v)) => self.strict = *v,
                ("track", ConfigValue::Flag(v)) => self.track = *v,
                ("picky", ConfigValue::Flag(v)) => self.picky = *v,
                ("compress", ConfigValue::Flag(v)) => self.compress = *v,
                ("texttype", ConfigValue::List(v)) => self.texttype = v.clone(),
                ("bintype", ConfigValue::List(v)) => self.bintype = v.clone(),
                ("ignores", ConfigValue::List(v)) => self.ignores = v.clone(),
                ("ignoreDirs", ConfigValue::List(v)) => self.ignore_dirs = v.clone(),
                ("ignoresWhitelist", ConfigValue::List(v)) => self.ignores_whitelist = v.clone(),
                ("ignoreDirsWhitelist", ConfigValue::List(v)) => {
                    self.ignore_dirs_whitelist = v.clone()
                }
                ("defaultbranch", ConfigValue::Text(v)) => self.default_branch = Some(v.clone()),
                _ => {
                    return Err(StoreError::InvalidConfig(format!(
                        "unsupported value {:?} for key '{}'",
                        value, key
                    )))
                }
            }
        }
        Ok(())
    }

    /// Effective value of a key.
    pub fn value_of(&self, key: &str) -> Option<ConfigValue> {
        let value = match key {
            "strict" => ConfigValue::Flag(self.strict),
            "track" => ConfigValue::Flag(self.track),
            "picky" => ConfigValue::Flag(self.picky),
            "compress" => ConfigValue::Flag(self.compress),
            "texttype" => ConfigValue::List(self.texttype.clone()),
            "bintype" => ConfigValue::List(self.bintype.clone()),
            "ignores" => ConfigValue::List(self.ignores.clone()),
            "ignoreDirs" => ConfigValue::List(self.ignore_dirs.clone()),
            "ignoresWhitelist" => ConfigValue::List(self.ignores_whitelist.clone()),
            "ignoreDirsWhitelist" => ConfigValue::List(self.ignore_dirs_whitelist.clone()),
            "defaultbranch" => ConfigValue::Text(self.default_branch.clone()?),
            _ => return None,
        };
        Some(value)
    }

    /// True if a file name is excluded from versioning.
    pub fn is_ignored_file(&self, name: &str) -> bool {
        matches_any(&self.ignores, name) && !matches_any(&self.ignores_whitelist, name)
    }

    /// True if a directory name is pruned from the walk.
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        matches_any(&self.ignore_dirs, name) && !matches_any(&self.ignore_dirs_whitelist, name)
    }

    /// First ignore pattern excluding `name`, unless whitelisted.
    pub fn ignoring_pattern(&self, name: &str) -> Option<&str> {
        let pattern = first_match(&self.ignores, name)?;
        if matches_any(&self.ignores_whitelist, name) {
            None
        } else {
            Some(pattern)
        }
    }

    /// True if a file is handled as text for diff and merge.
    pub fn is_text(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        if matches_any(&self.bintype, name) {
            return false;
        }
        if matches_any(&self.texttype, name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => KNOWN_TEXT_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext)),
            _ => false,
        }
    }
}

/// Parse a truth value (`on`, `yes`, `1`, ...).
pub fn parse_flag(value: &str) -> Option<bool> {
    let value = value.trim().to_lowercase();
    if TRUTH_VALUES.contains(&value.as_str()) {
        Some(true)
    } else if FALSE_VALUES.contains(&value.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// Layer that provides `key` in the chain, for display.
pub fn source_of(key: &str, local: &ConfigOverlay, global: &ConfigOverlay) -> ConfigSource {
    if local.contains_key(key) {
        ConfigSource::Local
    } else if global.contains_key(key) {
        ConfigSource::Global
    } else {
        ConfigSource::Default
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply an edit to an overlay.
///
/// `base` is the configuration the overlay falls back to; list additions to
/// a key missing from a local overlay start from the base value.
pub fn edit_overlay(
    overlay: &mut ConfigOverlay,
    edit: &ConfigEdit,
    scope: ConfigScope,
    base: &Config,
) -> Result<()> {
    match edit {
        ConfigEdit::Set { key, value } => {
            let key = key.as_str();
            if FLAG_KEYS.contains(&key) {
                if scope == ConfigScope::Local {
                    return Err(StoreError::InvalidConfig(format!(
                        "flag '{}' can only be set globally",
                        key
                    )));
                }
                let flag = parse_flag(value).ok_or_else(|| {
                    StoreError::InvalidConfig(format!(
                        "cannot set flag to '{}', try on/off instead",
                        value
                    ))
                })?;
                overlay.insert(key.to_string(), ConfigValue::Flag(flag));
            } else if LIST_KEYS.contains(&key) {
                overlay.insert(key.to_string(), ConfigValue::List(split_list(value)));
            } else if TEXT_KEYS.contains(&key) {
                overlay.insert(key.to_string(), ConfigValue::Text(value.trim().to_string()));
            } else {
                return Err(StoreError::InvalidConfig(format!("unsupported key '{}'", key)));
            }
        }
        ConfigEdit::Unset { key } => {
            if overlay.remove(key).is_none() {
                return Err(StoreError::InvalidConfig(format!("unknown key '{}'", key)));
            }
        }
        ConfigEdit::Add { key, value } => {
            if !LIST_KEYS.contains(&key.as_str()) {
                return Err(StoreError::InvalidConfig(format!(
                    "'{}' is not a list key",
                    key
                )));
            }
            let entry = overlay.entry(key.clone()).or_insert_with(|| {
                match (scope, base.value_of(key)) {
                    (ConfigScope::Local, Some(ConfigValue::List(values))) => {
                        ConfigValue::List(values)
                    }
                    _ => ConfigValue::List(Vec::new()),
                }
            });
            let ConfigValue::List(values) = entry else {
                return Err(StoreError::InvalidConfig(format!(
                    "'{}' does not hold a list",
                    key
                )));
            };
            let additions = split_list(value);
            if additions.iter().all(|v| values.contains(v)) {
                return Err(StoreError::InvalidConfig(format!(
                    "'{}' already contains '{}'",
                    key, value
                )));
            }
            for addition in additions {
                if !values.contains(&addition) {
                    values.push(addition);
                }
            }
        }
        ConfigEdit::Remove { key, value, prune } => {
            let Some(ConfigValue::List(values)) = overlay.get_mut(key) else {
                return Err(StoreError::InvalidConfig(format!("unknown key '{}'", key)));
            };
            let Some(position) = values.iter().position(|v| v == value) else {
                return Err(StoreError::InvalidConfig(format!(
                    "unknown value '{}' for '{}'",
                    value, key
                )));
            };
            values.remove(position);
            if *prune && scope == ConfigScope::Local && values.is_empty() {
                overlay.remove(key);
            }
        }
    }
    Ok(())
}

/// The per-user configuration file.
#[derive(Clone, Debug)]
pub struct GlobalConfig {
    path: PathBuf,
    overlay: ConfigOverlay,
}

impl GlobalConfig {
    /// Load from `path`; a missing file is an empty overlay.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let overlay = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            debug!(path = %path.display(), "No global configuration found");
            ConfigOverlay::new()
        };
        Ok(Self { path, overlay })
    }

    /// An empty overlay not backed by a file.
    pub fn empty() -> Self {
        Self {
            path: PathBuf::new(),
            overlay: ConfigOverlay::new(),
        }
    }

    pub fn overlay(&self) -> &ConfigOverlay {
        &self.overlay
    }

    /// Apply an edit and persist the file.
    pub fn edit(&mut self, edit: &ConfigEdit) -> Result<()> {
        edit_overlay(&mut self.overlay, edit, ConfigScope::Global, &Config::default())?;
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(&self.overlay)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}
