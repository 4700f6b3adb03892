//! Natural keys for graph entities.
//!
//! Every node is stored under a record id derived from its natural key, so
//! writing the same entity twice merges into one record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A repository at a specific branch: the identity of a Repository node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Normalized clone URL.
    pub url: String,
    /// Branch name.
    pub branch: String,
}

impl RepositoryRef {
    pub fn new(url: &str, branch: &str) -> Self {
        Self {
            url: normalize_url(url),
            branch: branch.trim().to_string(),
        }
    }

    /// Natural key: `<normalized-url>@<branch>`.
    pub fn key(&self) -> String {
        format!("{}@{}", self.url, self.branch)
    }

    /// Last path segment of the URL, used as the default display name.
    pub fn display_name(&self) -> String {
        self.url
            .rsplit(|c| c == '/' || c == ':' || c == '\\')
            .find(|s| !s.is_empty())
            .unwrap_or(&self.url)
            .to_string()
    }

    /// Directory name for this repository's working tree.
    pub fn workspace_dir_name(&self) -> String {
        let slug: String = self
            .display_name()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}-{}", slug, &record_id(&self.key())[..12])
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Normalize a clone URL so equivalent spellings map to one identity.
pub fn normalize_url(raw: &str) -> String {
    let mut url = raw.trim().trim_end_matches('/').to_string();
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.trim_end_matches('/').to_string();
    }

    if let Some((scheme, rest)) = url.split_once("://") {
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let authority = match authority.rsplit_once('@') {
            Some((user, host)) => format!("{}@{}", user, host.to_lowercase()),
            None => authority.to_lowercase(),
        };
        return format!("{}://{}{}", scheme.to_lowercase(), authority, path);
    }

    // scp-style: git@host:owner/repo
    if let Some((user_host, path)) = url.split_once(':') {
        if let Some((user, host)) = user_host.split_once('@') {
            if !host.is_empty() && !path.starts_with('/') && !path.starts_with('\\') {
                return format!("ssh://{}@{}/{}", user, host.to_lowercase(), path);
            }
        }
    }

    url
}

/// Normalize a repository-relative path to forward slashes without a `./` prefix.
pub fn normalize_path(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in replaced.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Stable record id for a natural key.
pub fn record_id(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// SHA-256 of file content, recorded on File nodes.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub fn file_key(repo_key: &str, path: &str) -> String {
    format!("{}|file|{}", repo_key, path)
}

pub fn function_key(repo_key: &str, path: &str, name: &str, start_line: u32) -> String {
    format!("{}|fn|{}|{}|{}", repo_key, path, name, start_line)
}

pub fn class_key(repo_key: &str, path: &str, name: &str) -> String {
    format!("{}|class|{}|{}", repo_key, path, name)
}

/// Protobuf definitions are keyed by package, not file, so copies of the
/// same `.proto` at different paths share one node. `name` is the nested
/// path (`Order.Item`), which keeps same-named nested messages apart.
pub fn proto_class_key(repo_key: &str, package: &str, name: &str) -> String {
    format!("{}|proto|{}.{}", repo_key, package, name)
}

pub fn endpoint_key(owner_key: &str, route: &str, method: &str) -> String {
    format!("{}|endpoint|{}|{}", owner_key, method, route)
}

pub fn data_model_key(class_key: &str) -> String {
    format!("{}|model", class_key)
}

pub fn chunk_key(repo_key: &str, path: &str, owner: &str, index: usize) -> String {
    format!("{}|chunk|{}|{}|{}", repo_key, path, owner, index)
}

pub fn service_key(repo_key: &str, name: &str) -> String {
    format!("{}|service|{}", repo_key, name)
}

pub fn edge_key(src: &str, kind: &str, dst: &str) -> String {
    format!("{}|{}|{}", src, kind, dst)
}
