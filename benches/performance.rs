//! Performance benchmarks for offline repositories.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use sos::{
    BranchId, BranchInfo, BranchParent, BranchResolver, CommitOptions, GlobalConfig, Hash,
    OfflineOptions, PathInfo, PathSet, Repository, Revision, RevisionStore, Selector, Timestamp,
};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

fn info(path: &str, size: u64) -> PathInfo {
    PathInfo {
        name_hash: Hash::of_path(path),
        size: Some(size),
        mtime: Timestamp(size as i64),
        hash: None,
    }
}

fn branch(number: u64, parent: Option<BranchParent>) -> BranchInfo {
    BranchInfo {
        number: BranchId(number),
        created: Timestamp(0),
        name: None,
        in_sync: false,
        tracked: Vec::new(),
        untracked: Vec::new(),
        parent,
    }
}

/// Benchmark snapshot reconstruction with varying history depths
fn bench_fold_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("fold_depth");

    for depth in [10u64, 100, 500] {
        group.bench_with_input(BenchmarkId::new("revisions", depth), &depth, |b, &depth| {
            let dir = TempDir::new().unwrap();
            let store = RevisionStore::with_cache_size(dir.path(), false, 1024);

            // Half the history lives in the parent of a fast branch
            let cutover = depth / 2;
            let mut branches = BTreeMap::new();
            branches.insert(BranchId(0), branch(0, None));
            branches.insert(
                BranchId(1),
                branch(
                    1,
                    Some(BranchParent {
                        branch: BranchId(0),
                        cutover: Revision(cutover),
                    }),
                ),
            );

            for r in 0..depth {
                let owner = if r <= cutover { BranchId(0) } else { BranchId(1) };
                let mut delta = PathSet::new();
                for i in 0..10 {
                    let path = format!("dir{}/file{}.txt", i, (r * 7 + i) % 50);
                    delta.insert(path.clone(), info(&path, r + i));
                }
                store.save_delta(owner, Revision(r), &delta).unwrap();
            }

            let resolver = BranchResolver::new(&branches, &store);
            b.iter(|| {
                let snapshot = resolver
                    .fold(BranchId(1), Revision(depth - 1))
                    .unwrap();
                black_box(snapshot.len())
            });
        });
    }

    group.finish();
}

/// Benchmark change detection over working trees of varying size
fn bench_change_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_detection");
    group.sample_size(20);

    for files in [100usize, 1000] {
        for strict in [false, true] {
            let id = format!("{}_{}", files, if strict { "strict" } else { "mtime" });
            group.bench_with_input(BenchmarkId::new("files", id), &files, |b, &files| {
                let dir = TempDir::new().unwrap();
                for i in 0..files {
                    let sub = dir.path().join(format!("d{}", i % 10));
                    fs::create_dir_all(&sub).unwrap();
                    fs::write(sub.join(format!("f{}.txt", i)), format!("content {}\n", i).repeat(20))
                        .unwrap();
                }
                let repo = Repository::offline(
                    dir.path(),
                    GlobalConfig::empty(),
                    OfflineOptions {
                        strict: Some(strict),
                        ..Default::default()
                    },
                )
                .unwrap();
                // A few changes so detection has something to report
                for i in (0..files).step_by(50) {
                    let path = dir.path().join(format!("d{}/f{}.txt", i % 10, i));
                    fs::write(path, "changed").unwrap();
                }

                b.iter(|| {
                    let changes = repo.changes(&Selector::current(), strict).unwrap();
                    black_box(changes.len())
                });
            });
        }
    }

    group.finish();
}

/// Benchmark committing a modified tree
fn bench_commit(c: &mut Criterion) {
    c.bench_function("commit_100_files", |b| {
        let dir = TempDir::new().unwrap();
        for i in 0..100 {
            fs::write(dir.path().join(format!("f{}.txt", i)), format!("{}", i)).unwrap();
        }
        let mut repo =
            Repository::offline(dir.path(), GlobalConfig::empty(), OfflineOptions::default())
                .unwrap();
        let mut round = 0u64;
        b.iter(|| {
            round += 1;
            for i in 0..10 {
                fs::write(
                    dir.path().join(format!("f{}.txt", i)),
                    "x".repeat((round % 40 + 1) as usize),
                )
                .unwrap();
            }
            black_box(repo.commit(CommitOptions::default()).ok())
        });
    });
}

criterion_group!(
    benches,
    bench_fold_depth,
    bench_change_detection,
    bench_commit,
);

criterion_main!(benches);
