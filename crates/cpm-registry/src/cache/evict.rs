//! Recency-based eviction of cache objects.

use std::io::ErrorKind;
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};

use super::{ContentAddressedCache, STAGING_PREFIX};

/// Remove the least recently modified objects until at most `max_objects` remain.
///
/// Returns the evicted keys, oldest first.
pub(crate) async fn evict_if_needed_impl(cache: &ContentAddressedCache) -> RegistryResult<Vec<String>> {
    let objects_dir = cache.objects_dir();
    let mut entries = match fs::read_dir(&objects_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RegistryError::cache("failed to list cache objects", e)),
    };

    let mut objects: Vec<(SystemTime, String)> = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RegistryError::cache("failed to list cache objects", e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGING_PREFIX) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_dir() {
            continue;
        }
        objects.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), name));
    }

    if objects.len() <= cache.max_objects() {
        return Ok(Vec::new());
    }

    objects.sort();
    let excess = objects.len() - cache.max_objects();

    let mut evicted = Vec::with_capacity(excess);
    for (_, key) in objects.into_iter().take(excess) {
        match fs::remove_dir_all(objects_dir.join(&key)).await {
            Ok(()) => {
                debug!(key = %key, "evicted cache object");
                evicted.push(key);
            }
            Err(e) => warn!(key = %key, error = %e, "failed to evict cache object"),
        }
    }

    Ok(evicted)
}
