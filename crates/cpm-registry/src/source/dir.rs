//! Directory-backed packet source (`dir://` or a bare path) for local use and tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::debug;

use crate::cache::io::list_files;
use crate::cache::{directory_digest, ContentAddressedCache, LocalPacket};
use crate::digest::sha256_hex_bytes;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{packet_identity, PACKET_MANIFEST_FILE, SOURCE_MANIFEST_FILE};
use crate::metadata::{BuildMetadata, PacketMetadata, PayloadFile};
use crate::reference::{dir_locator_path, has_scheme, DIR_SCHEME};

use super::{PacketReference, PacketSource, UpdateInfo};

/// Treats a local packet directory as its own artifact, identified by [`directory_digest`].
#[derive(Debug, Clone, Default)]
pub struct DirSource;

impl DirSource {
    pub fn new() -> Self {
        Self
    }

    async fn directory(uri: &str) -> RegistryResult<PathBuf> {
        let target = dir_locator_path(uri);
        match fs::canonicalize(&target).await {
            Ok(path) if path.is_dir() => Ok(path),
            _ => Err(RegistryError::locator(
                uri,
                format!("source directory not found: {}", target.display()),
            )),
        }
    }

    /// Metadata for a directory without a staged document.
    async fn build_metadata(dir: &Path) -> RegistryResult<PacketMetadata> {
        let manifest_path = dir.join(SOURCE_MANIFEST_FILE);
        let manifest_bytes = fs::read(&manifest_path)
            .await
            .map_err(|_| RegistryError::PayloadMissing {
                path: manifest_path.clone(),
                reason: "directory has neither a packet metadata document nor a manifest".to_string(),
            })?;
        let source_manifest: Value = serde_json::from_slice(&manifest_bytes).map_err(|e| {
            RegistryError::metadata(format!("{} is not valid JSON: {}", manifest_path.display(), e))
        })?;
        let (name, version) = packet_identity(dir, &source_manifest).await?;

        let files = list_files(dir)
            .await
            .map_err(|e| RegistryError::cache("failed to list packet files", e))?;
        let mut payload_files = Vec::with_capacity(files.len());
        for file in files {
            let Ok(rel) = file.strip_prefix(dir) else {
                continue;
            };
            let content = fs::read(&file)
                .await
                .map_err(|e| RegistryError::cache("failed to read packet file", e))?;
            payload_files.push(PayloadFile {
                name: rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/"),
                digest: Some(sha256_hex_bytes(&content)),
                size: Some(content.len() as u64),
            });
        }

        BuildMetadata {
            name,
            version,
            source_manifest,
            payload_files,
            source_manifest_digest: Some(sha256_hex_bytes(&manifest_bytes)),
            ..BuildMetadata::default()
        }
        .build()
    }
}

#[async_trait]
impl PacketSource for DirSource {
    fn can_handle(&self, uri: &str) -> bool {
        let uri = uri.trim();
        uri.starts_with(DIR_SCHEME) || (!has_scheme(uri) && Path::new(uri).is_dir())
    }

    async fn resolve(&self, uri: &str) -> RegistryResult<PacketReference> {
        let dir = Self::directory(uri).await?;
        let digest = directory_digest(&dir).await?;
        debug!(path = %dir.display(), digest = %digest, "resolved directory packet");

        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from("dir"));

        Ok(PacketReference {
            uri: uri.to_string(),
            resolved_uri: dir.display().to_string(),
            digest,
            metadata,
        })
    }

    async fn fetch(
        &self,
        reference: &PacketReference,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<LocalPacket> {
        cache
            .materialize_directory(Path::new(&reference.resolved_uri), &reference.digest)
            .await
    }

    async fn inspect_metadata(
        &self,
        uri: &str,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<(PacketReference, PacketMetadata)> {
        let reference = self.resolve(uri).await?;
        if let Some(entry) = cache.read_metadata(&reference.digest).await {
            return Ok((reference, entry.metadata));
        }

        let dir = Path::new(&reference.resolved_uri);
        let metadata = match fs::read(dir.join(PACKET_MANIFEST_FILE)).await {
            Ok(bytes) => PacketMetadata::from_slice(&bytes)?,
            Err(_) => Self::build_metadata(dir).await?,
        };

        cache.write_metadata(&reference.digest, &metadata, None).await?;
        Ok((reference, metadata))
    }

    async fn check_updates(&self, reference: &PacketReference) -> RegistryResult<UpdateInfo> {
        let current = directory_digest(Path::new(&reference.resolved_uri)).await?;
        Ok(UpdateInfo {
            has_update: current != reference.digest,
            latest_digest: Some(current),
            detail: None,
        })
    }
}
