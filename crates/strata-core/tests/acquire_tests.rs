//! Git acquisition against a repository on the local filesystem.
//!
//! Skipped when no `git` binary is available.

mod common;

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use strata_core::ingest::{GitAcquirer, RepositorySource};
use strata_core::knowledge::{GraphDb, KnowledgeError, RepositoryRef};
use strata_core::{IngestRequest, Ingestor, Stage};
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git").arg("--version").output().map_or(false, |o| o.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(["-c", "user.name=Test", "-c", "user.email=test@example.com", "-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(output.status.success(), "git {:?}: {}", args, String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// An origin repository on branch `main` with one commit.
fn origin() -> TempDir {
    let dir = tempfile::Builder::new().prefix("strata-origin").tempdir().unwrap();
    git(dir.path(), &["init", "--quiet"]);
    git(dir.path(), &["symbolic-ref", "HEAD", "refs/heads/main"]);
    write_file(dir.path(), "a.py", A_PY);
    write_file(dir.path(), "b.py", B_PY);
    commit(dir.path(), "initial");
    dir
}

fn commit(dir: &Path, message: &str) -> String {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
    git(dir, &["rev-parse", "HEAD"])
}

#[tokio::test]
async fn test_clone_then_update() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let origin = origin();
    let url = origin.path().to_string_lossy().to_string();
    let workspace = TempDir::new().unwrap();
    let acquirer = GitAcquirer::new(workspace.path(), Duration::from_secs(60));

    assert_eq!(acquirer.default_branch(&url).await.unwrap(), "main");
    let head = git(origin.path(), &["rev-parse", "HEAD"]);
    assert_eq!(acquirer.remote_head(&url, "main").await.unwrap(), head);

    let repo = RepositoryRef::new(&url, "main");
    let checkout = acquirer.acquire(&repo).await.unwrap();
    assert_eq!(checkout.commit, head);
    assert_eq!(checkout.path, acquirer.checkout_path(&repo));
    assert_eq!(std::fs::read_to_string(checkout.path.join("a.py")).unwrap(), A_PY);

    write_file(origin.path(), "a.py", "def foo():\n    return 0\n");
    let next = commit(origin.path(), "change foo");
    assert_eq!(acquirer.remote_head(&url, "main").await.unwrap(), next);

    let updated = acquirer.acquire(&repo).await.unwrap();
    assert_eq!(updated.commit, next);
    assert_eq!(updated.path, checkout.path);
    assert_eq!(
        std::fs::read_to_string(updated.path.join("a.py")).unwrap(),
        "def foo():\n    return 0\n"
    );
}

#[tokio::test]
async fn test_failed_clone_leaves_no_directory() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let origin = origin();
    let url = origin.path().to_string_lossy().to_string();
    let workspace = TempDir::new().unwrap();
    let acquirer = GitAcquirer::new(workspace.path(), Duration::from_secs(60));

    let err = acquirer.remote_head(&url, "nope").await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Acquisition { .. }));

    let err = acquirer.acquire(&RepositoryRef::new(&url, "nope")).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Acquisition { .. }));
    let leftovers: Vec<_> = std::fs::read_dir(workspace.path())
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "{:?}", leftovers);

    let missing = workspace.path().join("missing").to_string_lossy().to_string();
    let err = acquirer.default_branch(&missing).await.unwrap_err();
    assert!(matches!(err, KnowledgeError::Acquisition { .. }));
}

#[tokio::test]
async fn test_ingest_from_git_skips_until_new_commit() {
    if !git_available() {
        eprintln!("git not found, skipping");
        return;
    }
    let origin = origin();
    let url = origin.path().to_string_lossy().to_string();
    let workspace = TempDir::new().unwrap();
    let config = test_config(DIMS);
    let db = Arc::new(GraphDb::in_memory().await.unwrap());
    let ingestor = Ingestor::new(
        config.ingestion.clone(),
        db.clone(),
        Arc::new(generator(&config, Arc::new(HashEmbedder::new(DIMS)))),
        Arc::new(GitAcquirer::new(workspace.path(), Duration::from_secs(60))),
    );

    let first = ingestor.run(IngestRequest::new(url.clone())).await.unwrap();
    assert_eq!(first.status.stage, Stage::Completed);
    assert_eq!(first.commit.as_deref(), Some(git(origin.path(), &["rev-parse", "HEAD"]).as_str()));
    assert_eq!(first.repository, RepositoryRef::new(&url, "main").key());
    assert_eq!(first.files_discovered, 2);

    let second = ingestor.run(IngestRequest::new(url.clone())).await.unwrap();
    assert!(second.status.skipped);

    write_file(origin.path(), "c.py", "def bar():\n    return 1\n");
    let head = commit(origin.path(), "add c");
    let third = ingestor.run(IngestRequest::new(url.clone()).branch("main")).await.unwrap();
    assert!(!third.status.skipped);
    assert_eq!(third.commit.as_deref(), Some(head.as_str()));
    assert_eq!(third.files_changed, 1);
    assert_eq!(third.files_unchanged, 2);
}
