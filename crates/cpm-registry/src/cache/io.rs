//! Filesystem helpers: default location, atomic writes, tree walks and copies.

use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use tokio::fs;

use crate::error::{RegistryError, RegistryResult};

pub(crate) fn default_cache_dir() -> RegistryResult<PathBuf> {
    let base = dirs::cache_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| RegistryError::Cache {
            message: "could not determine cache directory".to_string(),
        })?;

    Ok(base.join("cpm").join("cache"))
}

pub(crate) async fn write_atomic(path: &Path, content: &[u8]) -> RegistryResult<()> {
    let temp_path = path.with_extension("tmp");

    fs::write(&temp_path, content)
        .await
        .map_err(|e| RegistryError::cache("failed to write temp file", e))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| RegistryError::cache("failed to rename temp file", e))?;

    Ok(())
}

/// Every regular file under `root`, sorted. Symlinked directories are not followed.
pub(crate) async fn list_files(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                files.push(path);
            } else if file_type.is_symlink() && fs::metadata(&path).await?.is_file() {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

pub(crate) async fn total_size(files: &[PathBuf]) -> io::Result<u64> {
    let mut total = 0u64;
    for file in files {
        total = total.saturating_add(fs::metadata(file).await?.len());
    }
    Ok(total)
}

/// Recursively copy the files of `src` into `dst` (created if missing).
pub(crate) async fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst).await?;
    for file in list_files(src).await? {
        let rel = file
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = dst.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&file, &target).await?;
    }
    Ok(())
}

/// Set the modification time of `path` to now.
pub(crate) fn touch(path: &Path) -> io::Result<()> {
    filetime::set_file_mtime(path, FileTime::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copy_tree_preserves_layout() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("faiss")).unwrap();
        std::fs::write(src.join("cpm.yml"), "name: demo\n").unwrap();
        std::fs::write(src.join("faiss/index.faiss"), b"INDEX").unwrap();

        let dst = tmp.path().join("dst");
        copy_tree(&src, &dst).await.unwrap();

        let files = list_files(&dst).await.unwrap();
        assert_eq!(files, vec![dst.join("cpm.yml"), dst.join("faiss/index.faiss")]);
        assert_eq!(total_size(&files).await.unwrap(), 11 + 5);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("doc.json");
        write_atomic(&path, b"{}").await.unwrap();
        write_atomic(&path, b"{\"a\":1}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\":1}");
        assert!(!path.with_extension("tmp").exists());
    }
}
