//! Integration tests for offline repositories.

use sos::{
    BranchId, BranchOptions, CommitOptions, DuplicateMode, GlobalConfig, Hash, KeepMine,
    MergeOperation, OfflineOptions, Repository, RepositoryMode, Revision, RevisionRef, Selector,
    StoreError, SwitchOptions, UpdateOptions,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn offline(dir: &TempDir, mode: RepositoryMode) -> Repository {
    Repository::offline(
        dir.path(),
        GlobalConfig::empty(),
        OfflineOptions {
            mode: Some(mode),
            ..Default::default()
        },
    )
    .unwrap()
}

fn reopen(dir: &TempDir) -> Repository {
    Repository::open(dir.path(), GlobalConfig::empty()).unwrap()
}

fn sel(text: &str) -> Selector {
    Selector::parse(text).unwrap()
}

// --- Realistic Workflow Tests ---

#[test]
fn test_commit_and_switch_back_scenario() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "0123456789");
    write(dir.path(), "b.txt", "01234567890123456789");
    let repo = offline(&dir, RepositoryMode::Simple);

    // Revision 0 holds the whole tree
    let r0 = repo.snapshot(RevisionRef::new(BranchId(0), Revision(0))).unwrap();
    assert_eq!(r0.len(), 2);
    assert_eq!(r0["a.txt"].size, Some(10));
    assert_eq!(r0["b.txt"].size, Some(20));
    drop(repo);

    // Modify, add, delete and commit in a fresh invocation
    write(dir.path(), "a.txt", "012345678901234");
    write(dir.path(), "c.txt", "c");
    fs::remove_file(dir.path().join("b.txt")).unwrap();
    let mut repo = reopen(&dir);
    let report = repo.commit(CommitOptions::default()).unwrap();
    assert_eq!(report.revision, RevisionRef::new(BranchId(0), Revision(1)));

    let delta = repo.store().load_delta(BranchId(0), Revision(1)).unwrap();
    assert_eq!(delta.len(), 3);
    assert_eq!(delta["a.txt"].size, Some(15));
    assert!(delta["b.txt"].is_tombstone());
    assert_eq!(delta["c.txt"].size, Some(1));

    // Back to revision 0
    let mut repo = reopen(&dir);
    repo.switch(&sel("/0"), SwitchOptions::default()).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("a.txt")).unwrap(), "0123456789");
    assert_eq!(fs::read(dir.path().join("b.txt")).unwrap().len(), 20);
    assert!(!dir.path().join("c.txt").exists());

    // Nothing differs from revision 0 now
    let changes = repo.changes(&sel("/0"), true).unwrap();
    assert!(changes.is_empty());
}

#[test]
fn test_branch_work_and_update_back() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "notes.txt", "alpha\nbeta\n");
    write(dir.path(), "data/raw.bin", "raw");
    let mut repo = offline(&dir, RepositoryMode::Simple);

    let feature = repo
        .branch(BranchOptions {
            name: Some("feature".into()),
            last: true,
            ..Default::default()
        })
        .unwrap();
    write(dir.path(), "notes.txt", "alpha\nbeta\ngamma\n");
    write(dir.path(), "data/extra.bin", "extra");
    repo.commit(CommitOptions {
        message: Some("feature work".into()),
        ..Default::default()
    })
    .unwrap();

    // The feature branch inherits revision 0 and owns revision 1
    assert_eq!(repo.resolver().resolve_owner(feature, Revision(0)).unwrap(), BranchId(0));
    assert_eq!(repo.resolver().resolve_owner(feature, Revision(1)).unwrap(), feature);

    repo.switch(&sel("0/"), SwitchOptions::default()).unwrap();
    assert!(!dir.path().join("data/extra.bin").exists());
    assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "alpha\nbeta\n");

    let report = repo
        .update(&sel("feature/feature work"), UpdateOptions::default(), &mut KeepMine)
        .unwrap();
    assert_eq!(report.added, vec!["data/extra.bin"]);
    assert_eq!(report.merged, vec!["notes.txt"]);
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "alpha\nbeta\ngamma\n"
    );

    let report = repo.commit(CommitOptions::default()).unwrap();
    assert_eq!(report.revision, RevisionRef::new(BranchId(0), Revision(1)));
    assert_eq!(repo.log().unwrap().len(), 2);
}

#[test]
fn test_update_insert_only_keeps_local_files() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "a");
    let mut repo = offline(&dir, RepositoryMode::Simple);
    repo.branch(BranchOptions {
        last: true,
        ..Default::default()
    })
    .unwrap();
    write(dir.path(), "b.txt", "b");
    repo.commit(CommitOptions::default()).unwrap();
    repo.switch(&sel("0/"), SwitchOptions::default()).unwrap();

    write(dir.path(), "local.txt", "mine");
    let report = repo
        .update(
            &sel("1/"),
            UpdateOptions {
                files: MergeOperation::Insert,
                ..Default::default()
            },
            &mut KeepMine,
        )
        .unwrap();
    assert_eq!(report.added, vec!["b.txt"]);
    assert_eq!(report.skipped_removals, vec!["local.txt"]);
    assert!(dir.path().join("local.txt").exists());

    let report = repo
        .update(
            &sel("1/"),
            UpdateOptions {
                files: MergeOperation::Remove,
                ..Default::default()
            },
            &mut KeepMine,
        )
        .unwrap();
    assert_eq!(report.removed, vec!["local.txt"]);
    assert!(!dir.path().join("local.txt").exists());
}

#[test]
fn test_compressed_repository_workflow() {
    let dir = TempDir::new().unwrap();
    let binary: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    write(dir.path(), "notes.txt", "alpha\nbeta\n");
    fs::write(dir.path().join("data.bin"), &binary).unwrap();
    let mut repo = Repository::offline(
        dir.path(),
        GlobalConfig::empty(),
        OfflineOptions {
            mode: Some(RepositoryMode::Simple),
            compress: Some(true),
            ..Default::default()
        },
    )
    .unwrap();

    let is_gzip = |path: std::path::PathBuf| fs::read(path).unwrap().starts_with(&[0x1f, 0x8b]);
    let blob = |repo: &Repository, branch: u64, name: &str| {
        repo.store()
            .blob_path(BranchId(branch), Revision(0), &Hash::of_path(name))
    };
    assert!(is_gzip(blob(&repo, 0, "notes.txt")));

    // A full duplicate copies the compressed blobs
    let copy = repo
        .branch(BranchOptions {
            last: true,
            duplicate: DuplicateMode::Full,
            ..Default::default()
        })
        .unwrap();
    assert!(is_gzip(blob(&repo, copy.0, "data.bin")));
    write(dir.path(), "notes.txt", "intro\nalpha\nbeta\n");
    repo.commit(CommitOptions::default()).unwrap();

    repo.switch(&sel("0/"), SwitchOptions::default()).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "alpha\nbeta\n");
    write(dir.path(), "notes.txt", "alpha\nbeta\noutro\n");
    repo.commit(CommitOptions::default()).unwrap();

    // Back to revision 0 and forward again
    repo.switch(&sel("/0"), SwitchOptions::default()).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("notes.txt")).unwrap(), "alpha\nbeta\n");
    repo.switch(
        &sel("0/"),
        SwitchOptions {
            force: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "alpha\nbeta\noutro\n"
    );

    // The duplicate's files read back from its own compressed blobs
    repo.switch(
        &sel("1/"),
        SwitchOptions {
            force: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), binary);
    repo.switch(&sel("0/"), SwitchOptions::default()).unwrap();

    let report = repo
        .update(
            &sel("1/"),
            UpdateOptions {
                lines: Some(MergeOperation::Insert),
                strict: true,
                ..Default::default()
            },
            &mut KeepMine,
        )
        .unwrap();
    assert_eq!(report.merged, vec!["notes.txt"]);
    assert_eq!(
        fs::read_to_string(dir.path().join("notes.txt")).unwrap(),
        "intro\nalpha\nbeta\noutro\n"
    );
    assert_eq!(fs::read(dir.path().join("data.bin")).unwrap(), binary);
}

#[test]
fn test_tracking_mode_workflow() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/main.rs", "fn main() {}");
    write(dir.path(), "src/notes.md", "notes");
    write(dir.path(), "README.md", "readme");
    let mut repo = offline(&dir, RepositoryMode::Track);

    // Nothing is tracked yet
    assert!(repo.snapshot(repo.head().unwrap()).unwrap().is_empty());

    repo.add_pattern("src", "*.rs", false).unwrap();
    let report = repo.commit(CommitOptions::default()).unwrap();
    assert_eq!(report.additions, 1);
    let files = repo.snapshot(repo.head().unwrap()).unwrap();
    assert_eq!(files.keys().collect::<Vec<_>>(), vec!["src/main.rs"]);

    // Untracked files never count as changes
    write(dir.path(), "README.md", "changed readme");
    assert!(matches!(
        repo.commit(CommitOptions::default()),
        Err(StoreError::NothingToCommit)
    ));

    // Branches in tracking mode copy the snapshot and the patterns
    let copy = repo.branch(BranchOptions::default()).unwrap();
    assert_eq!(repo.manifest().branch(copy).unwrap().tracked, vec!["src/*.rs"]);
    assert!(repo.manifest().branch(copy).unwrap().parent.is_none());
    assert!(repo.store().revision_dir(copy, Revision(0)).join("delta").exists());
}

#[test]
fn test_online_after_sync() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", "a");
    let mut repo = offline(&dir, RepositoryMode::Simple);
    write(dir.path(), "b.txt", "b");
    repo.commit(CommitOptions::default()).unwrap();

    let repo = reopen(&dir);
    assert!(matches!(
        repo.online(false, false),
        Err(StoreError::UnsyncedBranches(ref b)) if b == &vec![BranchId(0)]
    ));
    reopen(&dir).online(true, false).unwrap();
    assert!(Repository::find_root(dir.path()).is_none());
    assert_eq!(fs::read_to_string(dir.path().join("b.txt")).unwrap(), "b");
}
