//! Discovery of target files in a working tree.

use std::fs;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::IngestionConfig;
use crate::knowledge::identity::normalize_path;
use crate::knowledge::KnowledgeError;

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Repository-relative path with forward slashes.
    pub path: String,
    pub absolute: PathBuf,
    pub size: u64,
}

fn walker(root: &Path, exclude_dirs: Vec<String>) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir && exclude_dirs.iter().any(|d| entry.file_name() == d.as_str()))
        })
        .build()
}

fn relative(root: &Path, path: &Path) -> String {
    normalize_path(&path.strip_prefix(root).unwrap_or(path).to_string_lossy())
}

/// Target files under `root`, sorted by path.
///
/// Hidden files, gitignored files, excluded directories, non-target
/// extensions and files over the size limit are skipped.
pub fn discover(root: &Path, config: &IngestionConfig) -> Result<Vec<SourceFile>, KnowledgeError> {
    if !root.is_dir() {
        return Err(KnowledgeError::io(
            root,
            std::io::Error::new(std::io::ErrorKind::NotFound, "working tree is not a directory"),
        ));
    }

    let mut files = Vec::new();
    for entry in walker(root, config.exclude_dirs.clone()) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let path = relative(root, entry.path());
        if !config.is_target(&path) {
            continue;
        }
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!(path = %path, error = %e, "Skipping file without metadata");
                continue;
            }
        };
        if size > config.max_file_size {
            debug!(path = %path, size, "Skipping oversized file");
            continue;
        }
        files.push(SourceFile {
            path,
            absolute: entry.path().to_path_buf(),
            size,
        });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Read a file, replacing invalid UTF-8.
pub fn read_lossy(path: &Path) -> Result<String, KnowledgeError> {
    let bytes = fs::read(path).map_err(|e| KnowledgeError::io(path, e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Digest of every non-hidden file's path and bytes under `root`.
///
/// Stands in for a commit hash when the tree is not a git checkout.
pub fn tree_digest(root: &Path, exclude_dirs: &[String]) -> Result<String, KnowledgeError> {
    let mut entries: Vec<(String, PathBuf)> = walker(root, exclude_dirs.to_vec())
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| (relative(root, e.path()), e.path().to_path_buf()))
        .collect();
    entries.sort();

    let mut hasher = Sha256::new();
    for (path, absolute) in entries {
        let bytes = fs::read(&absolute).map_err(|e| KnowledgeError::io(&absolute, e))?;
        hasher.update(path.as_bytes());
        hasher.update([0]);
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn test_discover_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/b.py", "x = 1\n");
        write(dir.path(), "a.py", "y = 2\n");
        write(dir.path(), "notes.bin", "??");
        write(dir.path(), "node_modules/lib/index.js", "module.exports = 1\n");
        write(dir.path(), ".hidden/c.py", "z = 3\n");

        let config = IngestionConfig::default();
        let files = discover(dir.path(), &config).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "src/b.py"]);
    }

    #[test]
    fn test_discover_honors_gitignore_and_size() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".gitignore", "generated/\n");
        write(dir.path(), "generated/out.py", "x = 1\n");
        write(dir.path(), "big.py", &"#".repeat(64));
        write(dir.path(), "small.py", "x = 1\n");

        let config = IngestionConfig {
            max_file_size: 32,
            ..IngestionConfig::default()
        };
        let files = discover(dir.path(), &config).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "small.py");
        assert_eq!(files[0].size, 6);
    }

    #[test]
    fn test_read_lossy_replaces_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.py");
        fs::write(&path, [b'x', 0xff, b'\n']).unwrap();
        let content = read_lossy(&path).unwrap();
        assert!(content.starts_with('x'));
        assert!(content.contains('\u{fffd}'));
    }

    #[test]
    fn test_tree_digest_tracks_content() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        let first = tree_digest(dir.path(), &[]).unwrap();
        assert_eq!(first, tree_digest(dir.path(), &[]).unwrap());

        write(dir.path(), "a.py", "x = 2\n");
        assert_ne!(first, tree_digest(dir.path(), &[]).unwrap());
    }
}
