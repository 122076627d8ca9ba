//! Content identity of a local directory.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs;

use crate::error::{RegistryError, RegistryResult};

use super::io::list_files;

/// Deterministic digest of a directory tree.
///
/// Relative paths (`/`-separated) are sorted; each path's bytes and then the
/// file's bytes are fed into one running SHA-256.
pub async fn directory_digest(root: &Path) -> RegistryResult<String> {
    let root = fs::canonicalize(root)
        .await
        .map_err(|e| RegistryError::PayloadMissing {
            path: root.to_path_buf(),
            reason: format!("directory not readable: {}", e),
        })?;

    let files = list_files(&root)
        .await
        .map_err(|e| RegistryError::cache("failed to walk directory", e))?;

    let mut entries = Vec::with_capacity(files.len());
    for file in files {
        let rel = file
            .strip_prefix(&root)
            .map_err(|e| RegistryError::cache("failed to relativize path", e))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((rel, file));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (rel, file) in entries {
        let content = fs::read(&file)
            .await
            .map_err(|e| RegistryError::cache("failed to read file for digest", e))?;
        hasher.update(rel.as_bytes());
        hasher.update(&content);
    }

    Ok(format!("sha256:{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_digest_independent_of_creation_order() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        write(a.path(), "cpm.yml", b"name: demo");
        write(a.path(), "faiss/index.faiss", b"INDEX");
        write(b.path(), "faiss/index.faiss", b"INDEX");
        write(b.path(), "cpm.yml", b"name: demo");

        let da = directory_digest(a.path()).await.unwrap();
        let db = directory_digest(b.path()).await.unwrap();
        assert_eq!(da, db);
        assert!(crate::digest::is_sha256_digest(&da));
    }

    #[tokio::test]
    async fn test_digest_changes_with_content_or_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "cpm.yml", b"name: demo");
        let before = directory_digest(dir.path()).await.unwrap();

        write(dir.path(), "cpm.yml", b"name: demo2");
        let edited = directory_digest(dir.path()).await.unwrap();
        assert_ne!(before, edited);

        std::fs::rename(dir.path().join("cpm.yml"), dir.path().join("cpm.yaml")).unwrap();
        let renamed = directory_digest(dir.path()).await.unwrap();
        assert_ne!(edited, renamed);
    }

    #[tokio::test]
    async fn test_missing_directory_is_payload_missing() {
        let dir = TempDir::new().unwrap();
        let err = directory_digest(&dir.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, RegistryError::PayloadMissing { .. }));
    }
}
