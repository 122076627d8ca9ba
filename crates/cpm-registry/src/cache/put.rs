//! Cache write path: object materialization and metadata documents.

use std::path::Path;

use chrono::Utc;
use tokio::fs;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};
use crate::metadata::PacketMetadata;

use super::{evict, io, keys, CachedMetadata, ContentAddressedCache, LocalPacket, STAGING_PREFIX};

fn checked_key(digest: &str) -> RegistryResult<String> {
    let key = keys::cache_key_for(digest.trim());
    if key.is_empty() || key.chars().all(|c| c == '.') {
        return Err(RegistryError::Cache {
            message: format!("digest '{}' does not yield a usable cache key", digest),
        });
    }
    Ok(key)
}

fn hit(target: std::path::PathBuf, key: String) -> RegistryResult<LocalPacket> {
    io::touch(&target).map_err(|e| RegistryError::cache("failed to refresh cache object", e))?;
    Ok(LocalPacket {
        path: target,
        cache_key: key,
        cached: true,
    })
}

pub(crate) async fn materialize_impl(
    cache: &ContentAddressedCache,
    source_dir: &Path,
    digest: &str,
) -> RegistryResult<LocalPacket> {
    let key = checked_key(digest)?;
    let target = keys::object_dir(cache.root(), &key);

    if fs::try_exists(&target).await.unwrap_or(false) {
        debug!(digest, key = %key, "cache hit");
        return hit(target, key);
    }

    let is_dir = fs::metadata(source_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(RegistryError::PayloadMissing {
            path: source_dir.to_path_buf(),
            reason: "source directory not found".to_string(),
        });
    }

    let objects = cache.objects_dir();
    fs::create_dir_all(&objects)
        .await
        .map_err(|e| RegistryError::cache("failed to create objects directory", e))?;

    // Copy beside the target, then publish with one rename.
    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&objects)
        .map_err(|e| RegistryError::cache("failed to create staging directory", e))?;
    let staged = staging.path().join("object");
    io::copy_tree(source_dir, &staged)
        .await
        .map_err(|e| RegistryError::cache("failed to copy packet into cache", e))?;

    match fs::rename(&staged, &target).await {
        Ok(()) => {}
        Err(_) if fs::try_exists(&target).await.unwrap_or(false) => {
            debug!(digest, key = %key, "object published concurrently, using existing copy");
            return hit(target, key);
        }
        Err(e) => return Err(RegistryError::cache("failed to publish cache object", e)),
    }

    io::touch(&target).map_err(|e| RegistryError::cache("failed to stamp cache object", e))?;
    debug!(digest, key = %key, "materialized cache object");

    evict::evict_if_needed_impl(cache).await?;

    Ok(LocalPacket {
        path: target,
        cache_key: key,
        cached: false,
    })
}

pub(crate) async fn write_metadata_impl(
    cache: &ContentAddressedCache,
    digest: &str,
    metadata: &PacketMetadata,
    metadata_digest: Option<&str>,
) -> RegistryResult<()> {
    metadata.validate()?;

    let key = checked_key(digest)?;
    let path = keys::metadata_path(cache.root(), &key);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| RegistryError::cache("failed to create metadata directory", e))?;
    }

    let entry = CachedMetadata {
        digest: digest.to_string(),
        metadata_digest: metadata_digest.map(String::from),
        cached_at: Utc::now(),
        metadata: metadata.clone(),
    };
    let json = serde_json::to_vec(&entry)
        .map_err(|e| RegistryError::cache("failed to serialize cached metadata", e))?;
    io::write_atomic(&path, &json).await?;

    debug!(digest, "cached packet metadata");
    Ok(())
}
