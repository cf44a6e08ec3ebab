//! Top-level repository manifest.
//!
//! One JSON document under the store folder holds tags, the current branch,
//! repository flags, the branch list and the local configuration overlay.
//! Older documents are migrated step by step on load and re-saved.

use crate::config::ConfigOverlay;
use crate::error::{Result, StoreError};
use crate::types::{BranchId, BranchInfo, RepositoryMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the store folder under the repository root.
pub const STORE_FOLDER: &str = ".sos";

/// Manifest file name inside the store folder.
pub const MANIFEST_FILE: &str = "manifest";

/// Suffix for backup copies of documents and retired branch folders.
pub const BACKUP_SUFFIX: &str = "_last";

/// Current manifest schema.
pub const SCHEMA_VERSION: u32 = 2;

/// Version string recorded in newly created manifests.
pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Persisted manifest document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: u32,
    pub tags: Vec<String>,
    pub current_branch: BranchId,
    pub mode: RepositoryMode,
    pub strict: bool,
    pub compress: bool,
    /// Version of the tool that created the repository.
    pub created_with: String,
    #[serde(with = "branch_list")]
    pub branches: BTreeMap<BranchId, BranchInfo>,
    #[serde(default)]
    pub config: ConfigOverlay,
}

/// Branches are stored as a list, keyed in memory by id.
mod branch_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        branches: &BTreeMap<BranchId, BranchInfo>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(branches.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<BTreeMap<BranchId, BranchInfo>, D::Error> {
        let list = Vec::<BranchInfo>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|b| (b.number, b)).collect())
    }
}

impl Manifest {
    /// An empty manifest for a new repository.
    pub fn new(mode: RepositoryMode, strict: bool, compress: bool) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            tags: Vec::new(),
            current_branch: BranchId(0),
            mode,
            strict,
            compress,
            created_with: CRATE_VERSION.to_string(),
            branches: BTreeMap::new(),
            config: ConfigOverlay::new(),
        }
    }

    /// Path of the manifest inside a store folder.
    pub fn path(store_dir: &Path) -> PathBuf {
        store_dir.join(MANIFEST_FILE)
    }

    fn backup_path(store_dir: &Path) -> PathBuf {
        store_dir.join(format!("{}{}", MANIFEST_FILE, BACKUP_SUFFIX))
    }

    /// Load the manifest from a store folder.
    ///
    /// Returns `Ok(None)` if no store exists. A store whose manifest cannot be
    /// read is reported loudly and fails; defaults are never substituted for
    /// an existing repository.
    pub fn load(store_dir: &Path) -> Result<Option<Self>> {
        if !store_dir.is_dir() {
            debug!(store = %store_dir.display(), "No repository store found");
            return Ok(None);
        }

        let path = Self::path(store_dir);
        let document = match fs::read(&path)
            .map_err(StoreError::from)
            .and_then(|data| serde_json::from_slice::<Value>(&data).map_err(StoreError::from))
        {
            Ok(document) => document,
            Err(e) => {
                warn!(
                    manifest = %path.display(),
                    error = %e,
                    "Cannot read repository manifest of an existing store"
                );
                return Err(StoreError::Corruption(format!(
                    "unreadable manifest {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let (document, upgrades) = migrate(document)?;
        let manifest: Manifest = serde_json::from_value(document)?;

        if !upgrades.is_empty() {
            for step in &upgrades {
                warn!(step = %step, "Upgraded repository manifest");
            }
            warn!(
                backup = %Self::backup_path(store_dir).display(),
                "To revert the manifest upgrade, restore the manifest from the backup now"
            );
            manifest.save(store_dir)?;
        }

        Ok(Some(manifest))
    }

    /// Write the manifest, keeping a best-effort backup of the previous one.
    pub fn save(&self, store_dir: &Path) -> Result<()> {
        let path = Self::path(store_dir);
        if path.exists() {
            if let Err(e) = fs::copy(&path, Self::backup_path(store_dir)) {
                debug!(error = %e, "Cannot back up manifest");
            }
        }
        let data = serde_json::to_vec_pretty(self)?;
        fs::write(&path, data)?;
        Ok(())
    }

    pub fn current(&self) -> Result<&BranchInfo> {
        self.branch(self.current_branch)
    }

    pub fn branch(&self, id: BranchId) -> Result<&BranchInfo> {
        self.branches
            .get(&id)
            .ok_or_else(|| StoreError::BranchNotFound(id.to_string()))
    }

    pub fn branch_mut(&mut self, id: BranchId) -> Result<&mut BranchInfo> {
        self.branches
            .get_mut(&id)
            .ok_or_else(|| StoreError::BranchNotFound(id.to_string()))
    }

    /// Next unused branch id.
    pub fn next_branch_id(&self) -> BranchId {
        self.branches
            .keys()
            .next_back()
            .map(|id| id.next())
            .unwrap_or(BranchId(0))
    }

    /// Look up a branch by name or number.
    pub fn find_branch(&self, label: &str) -> Option<BranchId> {
        if let Ok(number) = label.parse::<u64>() {
            let id = BranchId(number);
            if self.branches.contains_key(&id) {
                return Some(id);
            }
        }
        self.branches
            .values()
            .find(|b| b.name.as_deref() == Some(label))
            .map(|b| b.number)
    }
}

/// Bring a raw manifest document up to [`SCHEMA_VERSION`].
///
/// Returns the migrated document and a description of each applied step.
fn migrate(mut document: Value) -> Result<(Value, Vec<String>)> {
    let schema = match document.get("schema") {
        None => 0,
        Some(value) => value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| StoreError::InvalidFormat(format!("invalid manifest schema {}", value)))?,
    };

    if schema > SCHEMA_VERSION {
        return Err(StoreError::InvalidFormat(format!(
            "manifest schema {} is newer than supported schema {}",
            schema, SCHEMA_VERSION
        )));
    }

    let steps: [(u32, fn(&mut Value) -> Result<()>, &str); 2] = [
        (0, migrate_v0_untracked, "schema 1: untracked patterns per branch"),
        (1, migrate_v1_parent, "schema 2: fast-branch parent references"),
    ];

    let mut upgrades = Vec::new();
    for (from, step, description) in steps {
        if schema <= from {
            step(&mut document)?;
            upgrades.push(description.to_string());
        }
    }

    if let Some(object) = document.as_object_mut() {
        object.insert("schema".into(), Value::from(SCHEMA_VERSION));
    }
    Ok((document, upgrades))
}

fn branch_records(document: &mut Value) -> Result<&mut Vec<Value>> {
    document
        .get_mut("branches")
        .and_then(Value::as_array_mut)
        .ok_or_else(|| StoreError::InvalidFormat("manifest has no branch list".into()))
}

/// Schema 0 predates untracking patterns and the creator version marker.
fn migrate_v0_untracked(document: &mut Value) -> Result<()> {
    for branch in branch_records(document)? {
        if let Some(record) = branch.as_object_mut() {
            record
                .entry("untracked")
                .or_insert_with(|| Value::Array(Vec::new()));
        }
    }
    if let Some(object) = document.as_object_mut() {
        object
            .entry("created_with")
            .or_insert_with(|| Value::from("0 (pre-schema)"));
    }
    Ok(())
}

/// Schema 1 predates fast branching.
fn migrate_v1_parent(document: &mut Value) -> Result<()> {
    for branch in branch_records(document)? {
        if let Some(record) = branch.as_object_mut() {
            record.entry("parent").or_insert(Value::Null);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchParent, Revision, Timestamp};
    use serde_json::json;
    use tempfile::TempDir;

    fn branch(number: u64, parent: Option<BranchParent>) -> BranchInfo {
        BranchInfo {
            number: BranchId(number),
            created: Timestamp(1000),
            name: Some(format!("branch{}", number)),
            in_sync: true,
            tracked: vec![],
            untracked: vec![],
            parent,
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(STORE_FOLDER);
        fs::create_dir_all(&store).unwrap();

        let mut manifest = Manifest::new(RepositoryMode::Track, true, false);
        manifest.branches.insert(BranchId(0), branch(0, None));
        manifest.branches.insert(
            BranchId(1),
            branch(
                1,
                Some(BranchParent {
                    branch: BranchId(0),
                    cutover: Revision(3),
                }),
            ),
        );
        manifest.tags.push("v1".into());
        manifest.save(&store).unwrap();

        let loaded = Manifest::load(&store).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.next_branch_id(), BranchId(2));
        assert_eq!(loaded.find_branch("branch1"), Some(BranchId(1)));
        assert_eq!(loaded.find_branch("0"), Some(BranchId(0)));
        assert_eq!(loaded.find_branch("7"), None);
    }

    #[test]
    fn test_missing_store_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(Manifest::load(&dir.path().join(STORE_FOLDER))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_unreadable_manifest_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(STORE_FOLDER);
        fs::create_dir_all(&store).unwrap();
        fs::write(Manifest::path(&store), b"{ not json").unwrap();

        assert!(matches!(
            Manifest::load(&store),
            Err(StoreError::Corruption(_))
        ));
    }

    #[test]
    fn test_backup_written_before_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(STORE_FOLDER);
        fs::create_dir_all(&store).unwrap();

        let mut manifest = Manifest::new(RepositoryMode::Simple, false, false);
        manifest.save(&store).unwrap();
        manifest.tags.push("second".into());
        manifest.save(&store).unwrap();

        let backup = fs::read(store.join("manifest_last")).unwrap();
        let previous: Manifest = serde_json::from_slice(&backup).unwrap();
        assert!(previous.tags.is_empty());
    }

    #[test]
    fn test_migrates_schema_zero() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join(STORE_FOLDER);
        fs::create_dir_all(&store).unwrap();

        let old = json!({
            "tags": [],
            "current_branch": 0,
            "mode": "Simple",
            "strict": false,
            "compress": false,
            "branches": [{
                "number": 0,
                "created": 5,
                "name": null,
                "in_sync": true,
                "tracked": []
            }]
        });
        fs::write(Manifest::path(&store), serde_json::to_vec(&old).unwrap()).unwrap();

        let manifest = Manifest::load(&store).unwrap().unwrap();
        assert_eq!(manifest.schema, SCHEMA_VERSION);
        let info = manifest.branch(BranchId(0)).unwrap();
        assert!(info.untracked.is_empty());
        assert!(info.parent.is_none());

        // Re-saved in the new schema, old version kept as backup.
        let saved: Value = serde_json::from_slice(&fs::read(Manifest::path(&store)).unwrap()).unwrap();
        assert_eq!(saved["schema"], json!(SCHEMA_VERSION));
        assert!(store.join("manifest_last").exists());
    }

    #[test]
    fn test_migrates_schema_one() {
        let (document, upgrades) = migrate(json!({
            "schema": 1,
            "branches": [{ "number": 0, "untracked": [] }]
        }))
        .unwrap();
        assert_eq!(upgrades.len(), 1);
        assert_eq!(document["branches"][0]["parent"], Value::Null);
    }

    #[test]
    fn test_rejects_future_schema() {
        assert!(matches!(
            migrate(json!({ "schema": 99, "branches": [] })),
            Err(StoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_range_schema() {
        // 2^32 + 1 must not wrap around to schema 1
        for schema in [json!(4_294_967_297u64), json!(-1), json!("2")] {
            assert!(matches!(
                migrate(json!({ "schema": schema, "branches": [] })),
                Err(StoreError::InvalidFormat(_))
            ));
        }
    }
}
