//! Cache key and path derivation.

use std::path::{Path, PathBuf};

/// Filesystem-safe key for a digest: ASCII alphanumerics and `-_.` kept,
/// everything else replaced by `_`.
pub fn cache_key_for(digest: &str) -> String {
    digest
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn object_dir(root: &Path, key: &str) -> PathBuf {
    root.join("objects").join(key)
}

pub(crate) fn metadata_path(root: &Path, key: &str) -> PathBuf {
    root.join("metadata").join(format!("{}.json", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_filesystem_safe() {
        let digest = format!("sha256:{}", "a".repeat(64));
        assert_eq!(cache_key_for(&digest), format!("sha256_{}", "a".repeat(64)));
        assert_eq!(cache_key_for("tag:v1.0/../x"), "tag_v1.0_.._x");
        assert_eq!(cache_key_for("a-b_c.d"), "a-b_c.d");
    }

    #[test]
    fn test_paths() {
        let root = Path::new("/cache");
        assert_eq!(object_dir(root, "k"), PathBuf::from("/cache/objects/k"));
        assert_eq!(metadata_path(root, "k"), PathBuf::from("/cache/metadata/k.json"));
    }
}
