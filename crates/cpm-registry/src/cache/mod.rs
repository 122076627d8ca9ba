//! Local content-addressed cache for packets.
//!
//! # Cache Structure
//!
//! ```text
//! <root>/
//!   objects/<key>/           # Materialized packet payload
//!   metadata/<key>.json      # Cached packet metadata document
//! ```
//!
//! `<key>` is the digest made filesystem-safe by [`cache_key_for`]. Objects
//! are evicted least-recently-modified first once there are more than
//! `max_objects`; a cache hit refreshes the object's modification time.
//! Metadata documents are small and never evicted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistryResult;
use crate::metadata::PacketMetadata;

mod evict;
mod integrity;
pub(crate) mod io;
mod keys;
mod put;
mod read;

pub use integrity::directory_digest;
pub use keys::cache_key_for;

/// Default number of materialized objects kept.
pub const DEFAULT_MAX_OBJECTS: usize = 64;

/// Prefix of in-flight copies inside `objects/`; never counted or evicted.
const STAGING_PREFIX: &str = ".staging-";

/// A packet materialized in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPacket {
    /// Object directory.
    pub path: PathBuf,

    /// Sanitized digest.
    pub cache_key: String,

    /// Whether the object was already present.
    pub cached: bool,
}

/// Metadata cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMetadata {
    /// Packet digest the metadata belongs to.
    pub digest: String,

    /// Digest of the metadata blob it was read from, if any.
    #[serde(default)]
    pub metadata_digest: Option<String>,

    pub cached_at: DateTime<Utc>,

    pub metadata: PacketMetadata,
}

/// Digest-keyed local object store.
#[derive(Debug, Clone)]
pub struct ContentAddressedCache {
    root: PathBuf,
    max_objects: usize,
}

impl ContentAddressedCache {
    /// Create a cache in the user cache directory.
    ///
    /// Default: `~/.cache/cpm/cache` (platform equivalent).
    pub fn new() -> RegistryResult<Self> {
        Ok(Self::with_dir(io::default_cache_dir()?))
    }

    /// Create a cache with a custom root directory.
    pub fn with_dir(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_objects: DEFAULT_MAX_OBJECTS,
        }
    }

    /// Cache under `<workspace>/cache`.
    pub fn for_workspace(workspace_root: &Path) -> Self {
        Self::with_dir(workspace_root.join("cache"))
    }

    /// Set the object threshold (at least one).
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = max_objects.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_objects(&self) -> usize {
        self.max_objects
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    /// Where the object for `digest` lives (whether or not it exists).
    pub fn object_path(&self, digest: &str) -> PathBuf {
        keys::object_dir(&self.root, &cache_key_for(digest.trim()))
    }

    /// Copy `source_dir` into the cache under `digest`, or reuse the existing object.
    pub async fn materialize_directory(
        &self,
        source_dir: &Path,
        digest: &str,
    ) -> RegistryResult<LocalPacket> {
        put::materialize_impl(self, source_dir, digest).await
    }

    /// Evict least recently modified objects beyond the threshold.
    pub async fn evict_if_needed(&self) -> RegistryResult<Vec<String>> {
        evict::evict_if_needed_impl(self).await
    }

    /// Cached metadata for a packet digest.
    pub async fn read_metadata(&self, digest: &str) -> Option<CachedMetadata> {
        read::read_metadata_impl(self, digest).await
    }

    /// Store metadata for a packet digest.
    pub async fn write_metadata(
        &self,
        digest: &str,
        metadata: &PacketMetadata,
        metadata_digest: Option<&str>,
    ) -> RegistryResult<()> {
        put::write_metadata_impl(self, digest, metadata, metadata_digest).await
    }
}
