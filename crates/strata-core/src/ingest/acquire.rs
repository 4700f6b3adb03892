//! Repository acquisition: working trees and commit resolution.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::walker::tree_digest;
use crate::knowledge::{KnowledgeError, RepositoryRef};

/// Branch reported for plain directories.
pub const LOCAL_BRANCH: &str = "local";

/// A working tree at a resolved commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub path: PathBuf,
    pub commit: String,
}

/// Where working trees come from.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Branch to use when a request names none.
    async fn default_branch(&self, url: &str) -> Result<String, KnowledgeError>;

    /// Commit at the tip of `branch` without touching any local copy.
    async fn remote_head(&self, url: &str, branch: &str) -> Result<String, KnowledgeError>;

    /// Produce a working tree for the repository and report its commit.
    async fn acquire(&self, repo: &RepositoryRef) -> Result<Checkout, KnowledgeError>;
}

/// Clones and updates repositories with the `git` command line.
///
/// Working trees live under `workspace` in a directory derived from the
/// repository identity. Fresh clones go to a temporary sibling first and are
/// renamed into place, so a failed clone leaves nothing behind.
pub struct GitAcquirer {
    workspace: PathBuf,
    timeout: Duration,
}

impl GitAcquirer {
    pub fn new(workspace: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            workspace: workspace.into(),
            timeout,
        }
    }

    pub fn checkout_path(&self, repo: &RepositoryRef) -> PathBuf {
        self.workspace.join(repo.workspace_dir_name())
    }

    async fn git(&self, url: &str, cwd: Option<&Path>, args: &[&str]) -> Result<String, KnowledgeError> {
        let mut cmd = Command::new("git");
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let operation = args.first().copied().unwrap_or("git");
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(KnowledgeError::acquisition(url, format!("failed to run git: {}", e)))
            }
            Err(_) => {
                return Err(KnowledgeError::acquisition(
                    url,
                    format!("git {} timed out after {}s", operation, self.timeout.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(operation, stderr = %stderr.trim(), "git failed");
            return Err(KnowledgeError::acquisition(url, classify_git_error(&stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn clone_fresh(&self, repo: &RepositoryRef, target: &Path) -> Result<(), KnowledgeError> {
        tokio::fs::create_dir_all(&self.workspace)
            .await
            .map_err(|e| KnowledgeError::io(&self.workspace, e))?;

        let tmp = self
            .workspace
            .join(format!(".{}.tmp-{}", repo.workspace_dir_name(), Uuid::new_v4().simple()));
        let tmp_str = tmp.to_string_lossy().to_string();
        let cloned = self
            .git(
                &repo.url,
                None,
                &["clone", "--branch", &repo.branch, "--single-branch", "--depth", "1", "--", &repo.url, &tmp_str],
            )
            .await;
        if let Err(e) = cloned {
            remove_quietly(&tmp).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            remove_quietly(&tmp).await;
            if !target.join(".git").exists() {
                return Err(KnowledgeError::io(target, e));
            }
            debug!(path = %target.display(), "Working tree appeared during clone, reusing it");
        }
        Ok(())
    }

    async fn update(&self, repo: &RepositoryRef, target: &Path) -> Result<(), KnowledgeError> {
        self.git(&repo.url, Some(target), &["fetch", "--depth", "1", "origin", &repo.branch])
            .await?;
        self.git(&repo.url, Some(target), &["checkout", "--force", "-B", &repo.branch, "FETCH_HEAD"])
            .await?;
        self.git(&repo.url, Some(target), &["clean", "-ffdx"]).await?;
        Ok(())
    }
}

#[async_trait]
impl RepositorySource for GitAcquirer {
    async fn default_branch(&self, url: &str) -> Result<String, KnowledgeError> {
        let out = self.git(url, None, &["ls-remote", "--symref", url, "HEAD"]).await?;
        parse_symref(&out)
            .ok_or_else(|| KnowledgeError::acquisition(url, "could not resolve the default branch"))
    }

    async fn remote_head(&self, url: &str, branch: &str) -> Result<String, KnowledgeError> {
        let refname = format!("refs/heads/{}", branch);
        let out = self.git(url, None, &["ls-remote", url, &refname]).await?;
        out.lines()
            .filter_map(|line| line.split_once('\t'))
            .find(|(_, name)| *name == refname)
            .map(|(commit, _)| commit.to_string())
            .ok_or_else(|| KnowledgeError::acquisition(url, format!("branch '{}' not found", branch)))
    }

    async fn acquire(&self, repo: &RepositoryRef) -> Result<Checkout, KnowledgeError> {
        let target = self.checkout_path(repo);

        if target.join(".git").exists() {
            info!(repo = %repo, path = %target.display(), "Updating working tree");
            if let Err(e) = self.update(repo, &target).await {
                warn!(repo = %repo, error = %e, "Update failed, cloning again");
                remove_quietly(&target).await;
                self.clone_fresh(repo, &target).await?;
            }
        } else {
            if target.exists() {
                remove_quietly(&target).await;
            }
            info!(repo = %repo, path = %target.display(), "Cloning");
            self.clone_fresh(repo, &target).await?;
        }

        let commit = self.git(&repo.url, Some(&target), &["rev-parse", "HEAD"]).await?;
        Ok(Checkout { path: target, commit })
    }
}

/// Serves plain directories in place. The commit is a digest of the tree.
#[derive(Debug, Clone, Default)]
pub struct LocalSource {
    exclude_dirs: Vec<String>,
}

impl LocalSource {
    pub fn new(exclude_dirs: Vec<String>) -> Self {
        Self { exclude_dirs }
    }

    async fn digest(&self, url: &str) -> Result<String, KnowledgeError> {
        let root = PathBuf::from(url);
        if !root.is_dir() {
            return Err(KnowledgeError::acquisition(url, "not a directory"));
        }
        let exclude = self.exclude_dirs.clone();
        tokio::task::spawn_blocking(move || tree_digest(&root, &exclude))
            .await
            .map_err(|e| KnowledgeError::acquisition(url, format!("digest task failed: {}", e)))?
    }
}

#[async_trait]
impl RepositorySource for LocalSource {
    async fn default_branch(&self, _url: &str) -> Result<String, KnowledgeError> {
        Ok(LOCAL_BRANCH.to_string())
    }

    async fn remote_head(&self, url: &str, _branch: &str) -> Result<String, KnowledgeError> {
        self.digest(url).await
    }

    async fn acquire(&self, repo: &RepositoryRef) -> Result<Checkout, KnowledgeError> {
        let commit = self.digest(&repo.url).await?;
        Ok(Checkout {
            path: PathBuf::from(&repo.url),
            commit,
        })
    }
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove directory");
        }
    }
}

/// Branch named by `ls-remote --symref <url> HEAD` output.
fn parse_symref(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let rest = line.strip_prefix("ref: ")?;
        let (target, name) = rest.split_once('\t')?;
        if name.trim() != "HEAD" {
            return None;
        }
        target.strip_prefix("refs/heads/").map(str::to_string)
    })
}

/// Human-readable cause of a git failure.
fn classify_git_error(stderr: &str) -> String {
    let lower = stderr.to_lowercase();
    let detail = stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|l| !l.is_empty())
        .unwrap_or("git failed")
        .to_string();

    if lower.contains("authentication failed")
        || lower.contains("could not read username")
        || lower.contains("permission denied")
        || lower.contains("terminal prompts disabled")
    {
        format!("authentication failed: {}", detail)
    } else if lower.contains("remote branch") && lower.contains("not found") {
        format!("branch not found: {}", detail)
    } else if lower.contains("could not resolve host")
        || lower.contains("repository not found")
        || lower.contains("does not appear to be a git repository")
        || lower.contains("unable to access")
        || lower.contains("does not exist")
    {
        format!("repository unreachable: {}", detail)
    } else {
        detail
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_symref() {
        let out = "ref: refs/heads/trunk\tHEAD\n3f2a9c0d\tHEAD\n";
        assert_eq!(parse_symref(out).as_deref(), Some("trunk"));
        assert_eq!(parse_symref("3f2a9c0d\tHEAD\n"), None);
    }

    #[test]
    fn test_classify_git_error() {
        assert!(classify_git_error("fatal: Authentication failed for 'https://x'\n").starts_with("authentication failed"));
        assert!(classify_git_error("warning: Could not find remote branch nope to clone.\nfatal: Remote branch nope not found in upstream origin\n")
            .starts_with("branch not found"));
        assert!(classify_git_error("fatal: unable to access 'https://nohost/': Could not resolve host: nohost\n")
            .starts_with("repository unreachable"));
        assert_eq!(classify_git_error("fatal: something odd\n"), "fatal: something odd");
    }

    #[tokio::test]
    async fn test_local_source_commit_follows_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        let url = dir.path().to_string_lossy().to_string();
        let source = LocalSource::default();

        let branch = source.default_branch(&url).await.unwrap();
        assert_eq!(branch, LOCAL_BRANCH);
        let head = source.remote_head(&url, &branch).await.unwrap();
        let checkout = source.acquire(&RepositoryRef::new(&url, &branch)).await.unwrap();
        assert_eq!(checkout.commit, head);

        std::fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();
        assert_ne!(source.remote_head(&url, &branch).await.unwrap(), head);
    }

    #[tokio::test]
    async fn test_local_source_rejects_missing_directory() {
        let source = LocalSource::default();
        let err = source.remote_head("/definitely/not/here", LOCAL_BRANCH).await.unwrap_err();
        assert!(matches!(err, KnowledgeError::Acquisition { .. }));
    }
}
