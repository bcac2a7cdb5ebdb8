//! Diff fetcher tests against throwaway git repositories.

use std::path::Path;
use std::process::Command;

use autolabel::{ChangeSource, FetchError, GitDiffFetcher};
use tempfile::TempDir;

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=autolabel",
            "-c",
            "user.email=autolabel@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write(dir: &Path, relative: &str, contents: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Repository with a `base` branch and a `feature` branch forked from it.
///
/// After forking, `base` gains an unrelated commit so that a plain two-dot
/// diff would wrongly include it.
fn forked_repo() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();

    git(root, &["init", "-q"]);
    write(root, "Mathlib/Algebra/Group.lean", "-- group\n");
    write(root, "Mathlib/Order/Basic.lean", "-- order\n");
    write(root, "README.md", "mathlib\n");
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "initial"]);
    git(root, &["branch", "base"]);
    git(root, &["checkout", "-q", "-b", "feature"]);

    write(root, "Mathlib/Topology/Basic.lean", "-- topology\n");
    write(root, "Mathlib/Algebra/Group.lean", "-- group, edited\n");
    git(root, &["mv", "Mathlib/Order/Basic.lean", "Mathlib/Order/Defs.lean"]);
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "feature work"]);

    git(root, &["checkout", "-q", "base"]);
    write(root, "docs/unrelated.md", "base moved on\n");
    git(root, &["add", "-A"]);
    git(root, &["commit", "-q", "-m", "base work"]);
    git(root, &["checkout", "-q", "feature"]);

    dir
}

#[tokio::test]
async fn test_diff_against_merge_base() {
    let repo = forked_repo();
    let fetcher = GitDiffFetcher::new(repo.path(), "base");

    let changes = fetcher.changed_files(1).await.unwrap();
    assert_eq!(
        changes.iter().collect::<Vec<_>>(),
        vec![
            "Mathlib/Algebra/Group.lean",
            "Mathlib/Order/Basic.lean",
            "Mathlib/Order/Defs.lean",
            "Mathlib/Topology/Basic.lean",
        ]
    );
}

#[tokio::test]
async fn test_explicit_head_reference() {
    let repo = forked_repo();
    git(repo.path(), &["checkout", "-q", "base"]);

    let fetcher = GitDiffFetcher::new(repo.path(), "base").with_head("feature");
    let changes = fetcher.changed_files(1).await.unwrap();
    assert_eq!(changes.len(), 4);
}

#[tokio::test]
async fn test_no_changes_is_empty() {
    let repo = forked_repo();
    let fetcher = GitDiffFetcher::new(repo.path(), "feature");

    let changes = fetcher.changed_files(1).await.unwrap();
    assert!(changes.is_empty());
}

#[tokio::test]
async fn test_unknown_base_reference() {
    let repo = forked_repo();
    let fetcher = GitDiffFetcher::new(repo.path(), "origin/does-not-exist");

    let err = fetcher.changed_files(1).await.unwrap_err();
    assert!(
        matches!(err, FetchError::BaseUnresolvable { ref reference, .. } if reference == "origin/does-not-exist")
    );
}

#[tokio::test]
async fn test_unknown_head_reference() {
    let repo = forked_repo();
    let fetcher = GitDiffFetcher::new(repo.path(), "base").with_head("nope");

    let err = fetcher.changed_files(1).await.unwrap_err();
    assert!(matches!(err, FetchError::HeadUnresolvable { .. }));
}

#[tokio::test]
async fn test_unrelated_histories_have_no_merge_base() {
    let repo = forked_repo();
    let root = repo.path();
    git(root, &["checkout", "-q", "--orphan", "lonely"]);
    git(root, &["rm", "-rq", "--cached", "."]);
    write(root, "orphan.txt", "alone\n");
    git(root, &["add", "orphan.txt"]);
    git(root, &["commit", "-q", "-m", "orphan"]);

    let fetcher = GitDiffFetcher::new(root, "base");
    let err = fetcher.changed_files(1).await.unwrap_err();
    assert!(matches!(err, FetchError::NoMergeBase { .. }));
}
