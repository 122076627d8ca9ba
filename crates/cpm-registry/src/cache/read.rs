//! Cache read path for metadata documents.

use tokio::fs;
use tracing::{debug, warn};

use super::{keys, CachedMetadata, ContentAddressedCache};

/// Cached metadata for `digest`. Unreadable or invalid entries count as a miss.
pub(crate) async fn read_metadata_impl(
    cache: &ContentAddressedCache,
    digest: &str,
) -> Option<CachedMetadata> {
    let path = keys::metadata_path(cache.root(), &keys::cache_key_for(digest.trim()));

    let content = match fs::read(&path).await {
        Ok(content) => content,
        Err(_) => {
            debug!(digest, "metadata not in cache");
            return None;
        }
    };

    let entry: CachedMetadata = match serde_json::from_slice(&content) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(digest, error = %e, "ignoring unreadable cached metadata");
            return None;
        }
    };

    if let Err(e) = entry.metadata.validate() {
        warn!(digest, error = %e, "ignoring invalid cached metadata");
        return None;
    }

    debug!(digest, "metadata cache hit");
    Some(entry)
}
