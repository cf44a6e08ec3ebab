//! Archiving the revision store.

use super::Repository;
use crate::error::Result;
use crate::manifest::{BACKUP_SUFFIX, STORE_FOLDER};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Outcome of a dump.
#[derive(Clone, Debug)]
pub struct DumpReport {
    pub archive: PathBuf,
    /// Number of store files written.
    pub files: usize,
    /// Previous archive, if one was replaced.
    pub backup: Option<PathBuf>,
}

/// Archive path for a user-supplied name: names without an extension get
/// `.sos.zip` appended.
pub(crate) fn archive_path(name: &Path) -> PathBuf {
    let has_extension = name
        .file_name()
        .map(|n| n.to_string_lossy().contains('.'))
        .unwrap_or(false);
    if has_extension {
        name.to_path_buf()
    } else {
        let mut path = name.as_os_str().to_owned();
        path.push(".sos.zip");
        PathBuf::from(path)
    }
}

impl Repository {
    /// Write the whole store, minus backups, into a deflate zip archive.
    ///
    /// An existing archive is kept as `<archive>_last`.
    pub fn dump(&self, name: impl AsRef<Path>) -> Result<DumpReport> {
        let archive = archive_path(name.as_ref());
        let backup = if archive.exists() {
            let mut backup = archive.as_os_str().to_owned();
            backup.push(BACKUP_SUFFIX);
            let backup = PathBuf::from(backup);
            fs::copy(&archive, &backup)?;
            debug!(backup = %backup.display(), "Backed up previous archive");
            Some(backup)
        } else {
            None
        };

        let mut files = Vec::new();
        collect_files(&self.store_dir(), STORE_FOLDER, &mut files)?;

        let mut writer = ZipWriter::new(BufWriter::new(File::create(&archive)?));
        writer.set_comment(format!(
            "sos repository dump of {} ({} mode)",
            self.root.display(),
            self.manifest.mode
        ));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (entry, path) in &files {
            writer.start_file(entry.as_str(), options)?;
            io::copy(&mut File::open(path)?, &mut writer)?;
        }
        writer.finish()?.flush()?;

        info!(archive = %archive.display(), files = files.len(), "Dumped repository store");
        Ok(DumpReport {
            archive,
            files: files.len(),
            backup,
        })
    }
}

/// Store files below `dir` as (archive entry name, path), skipping backups.
fn collect_files(dir: &Path, prefix: &str, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(BACKUP_SUFFIX) {
            continue;
        }
        let entry_name = format!("{}/{}", prefix, name);
        if entry.file_type()?.is_dir() {
            collect_files(&entry.path(), &entry_name, out)?;
        } else {
            out.push((entry_name, entry.path()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::offline_repo;
    use super::super::CommitOptions;
    use super::*;
    use crate::types::RepositoryMode;
    use tempfile::TempDir;

    #[test]
    fn test_archive_path() {
        assert_eq!(archive_path(Path::new("backup")), PathBuf::from("backup.sos.zip"));
        assert_eq!(archive_path(Path::new("dir.d/backup")), PathBuf::from("dir.d/backup.sos.zip"));
        assert_eq!(archive_path(Path::new("x.zip")), PathBuf::from("x.zip"));
    }

    #[test]
    fn test_dump_skips_backups_and_keeps_previous_archive() {
        let (dir, mut repo) = offline_repo(&[("a.txt", "a")], RepositoryMode::Simple);
        fs::write(dir.path().join("b.txt"), "b").unwrap();
        repo.commit(CommitOptions::default()).unwrap();

        let out = TempDir::new().unwrap();
        let report = repo.dump(out.path().join("repo")).unwrap();
        assert_eq!(report.archive, out.path().join("repo.sos.zip"));
        assert!(report.backup.is_none());

        let archive = zip::ZipArchive::new(File::open(&report.archive).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert_eq!(names.len(), report.files);
        assert!(names.iter().all(|n| n.starts_with(".sos/")));
        assert!(names.iter().all(|n| !n.ends_with(BACKUP_SUFFIX)));
        assert!(names.iter().any(|n| n.ends_with("/delta")));

        let again = repo.dump(out.path().join("repo")).unwrap();
        assert_eq!(again.backup, Some(out.path().join("repo.sos.zip_last")));
        assert!(out.path().join("repo.sos.zip_last").exists());
    }
}
