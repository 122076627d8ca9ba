//! Registry-backed packet source (`oci://`).

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::cache::{ContentAddressedCache, LocalPacket};
use crate::client::RegistryClient;
use crate::error::{RegistryError, RegistryResult};
use crate::layout::{PACKET_MANIFEST_FILE, PACKET_MANIFEST_MEDIA_TYPE};
use crate::metadata::{payload_root_of, MetadataDocument, PacketMetadata, DEFAULT_PAYLOAD_ROOT};
use crate::reference::{OciRef, OCI_SCHEME};
use crate::security::safe_output_path;
use crate::trust::evaluate_trust_report;
use crate::types::TrustPolicy;

use super::{PacketReference, PacketSource, UpdateInfo};

/// Resolves `oci://` locators through a [`RegistryClient`] and gates them on a [`TrustPolicy`].
#[derive(Debug, Clone)]
pub struct OciSource {
    client: RegistryClient,
    trust: TrustPolicy,
}

impl OciSource {
    pub fn new(client: RegistryClient, trust: TrustPolicy) -> Self {
        Self { client, trust }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn trust_policy(&self) -> &TrustPolicy {
        &self.trust
    }

    /// Normalized registry reference a resolved [`PacketReference`] points at.
    fn registry_ref(reference: &PacketReference) -> RegistryResult<OciRef> {
        if let Some(recorded) = reference.metadata_str("ref") {
            return Ok(OciRef::from_normalized(recorded));
        }
        OciRef::parse(&reference.resolved_uri)
    }

    fn scratch_dir() -> RegistryResult<tempfile::TempDir> {
        tempfile::Builder::new()
            .prefix("cpm-source-oci-")
            .tempdir()
            .map_err(|e| RegistryError::cache("failed to create pull directory", e))
    }

    /// Metadata document via the dedicated manifest layer, if the artifact has one.
    async fn metadata_from_layer(
        &self,
        oci_ref: &OciRef,
    ) -> RegistryResult<Option<(PacketMetadata, String)>> {
        let manifest = self.client.fetch_manifest(oci_ref.as_str()).await?;
        let layer_digest = manifest
            .get("layers")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|layer| {
                layer.get("mediaType").and_then(Value::as_str) == Some(PACKET_MANIFEST_MEDIA_TYPE)
            })
            .and_then(|layer| layer.get("digest").and_then(Value::as_str))
            .map(str::trim)
            .filter(|d| !d.is_empty());

        let Some(layer_digest) = layer_digest else {
            return Ok(None);
        };

        let blob = self.client.fetch_blob(oci_ref.as_str(), layer_digest).await?;
        let metadata = PacketMetadata::from_slice(&blob)?;
        Ok(Some((metadata, layer_digest.to_string())))
    }

    /// Slow path for artifacts published without a metadata layer.
    async fn metadata_from_pull(&self, oci_ref: &OciRef) -> RegistryResult<PacketMetadata> {
        warn!(reference = %oci_ref, "no metadata layer, pulling full artifact");
        let scratch = Self::scratch_dir()?;
        let pull_dir = scratch.path().join("artifact");
        self.client.pull(oci_ref.as_str(), &pull_dir).await?;

        let manifest_path = pull_dir.join(PACKET_MANIFEST_FILE);
        let bytes = fs::read(&manifest_path)
            .await
            .map_err(|_| RegistryError::PayloadMissing {
                path: manifest_path.clone(),
                reason: "artifact carries no packet metadata document".to_string(),
            })?;
        PacketMetadata::from_slice(&bytes)
    }
}

#[async_trait]
impl PacketSource for OciSource {
    fn can_handle(&self, uri: &str) -> bool {
        uri.trim().starts_with(OCI_SCHEME)
    }

    async fn resolve(&self, uri: &str) -> RegistryResult<PacketReference> {
        let oci_ref = OciRef::parse(uri)?;
        let digest = self.client.resolve(oci_ref.as_str()).await?;

        let referrers = self.client.discover_referrers(oci_ref.as_str()).await?;
        let report = evaluate_trust_report(&referrers, &self.trust);
        if !report.strict_failures.is_empty() {
            return Err(RegistryError::locator(
                uri,
                format!("trust policy rejected {}: {}", digest, report.strict_failures.join("; ")),
            ));
        }

        info!(
            reference = %oci_ref,
            digest = %digest,
            trust_score = report.trust_score,
            "resolved packet"
        );

        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from("oci"));
        metadata.insert("ref".into(), Value::from(oci_ref.as_str()));
        metadata.insert(
            "trust".into(),
            serde_json::to_value(&report)
                .map_err(|e| RegistryError::protocol(format!("failed to record trust report: {}", e)))?,
        );

        Ok(PacketReference {
            uri: uri.to_string(),
            resolved_uri: oci_ref.resolved_uri(),
            digest,
            metadata,
        })
    }

    async fn fetch(
        &self,
        reference: &PacketReference,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<LocalPacket> {
        let oci_ref = Self::registry_ref(reference)?;
        let scratch = Self::scratch_dir()?;
        let pull_dir = scratch.path().join("artifact");
        self.client.pull(oci_ref.as_str(), &pull_dir).await?;

        let payload_root = match fs::read(pull_dir.join(PACKET_MANIFEST_FILE)).await {
            Ok(bytes) => {
                let document: Value = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::metadata(format!("packet manifest is not valid JSON: {}", e))
                })?;
                let current = MetadataDocument::detect(document)?.into_current();
                payload_root_of(&current).to_string()
            }
            Err(_) => DEFAULT_PAYLOAD_ROOT.to_string(),
        };

        let payload_dir = safe_output_path(&pull_dir, &payload_root)?;
        let is_dir = fs::metadata(&payload_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(RegistryError::PayloadMissing {
                path: payload_dir,
                reason: format!("payload directory not found in {}", oci_ref),
            });
        }

        cache.materialize_directory(&payload_dir, &reference.digest).await
    }

    async fn inspect_metadata(
        &self,
        uri: &str,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<(PacketReference, PacketMetadata)> {
        let mut reference = self.resolve(uri).await?;
        let oci_ref = Self::registry_ref(&reference)?;

        if let Some(entry) = cache.read_metadata(&reference.digest).await {
            debug!(reference = %oci_ref, "using cached packet metadata");
            if let Some(metadata_digest) = entry.metadata_digest {
                reference
                    .metadata
                    .insert("metadata_digest".into(), Value::from(metadata_digest));
            }
            return Ok((reference, entry.metadata));
        }

        let (metadata, metadata_digest) = match self.metadata_from_layer(&oci_ref).await? {
            Some((metadata, layer_digest)) => (metadata, Some(layer_digest)),
            None => (self.metadata_from_pull(&oci_ref).await?, None),
        };

        cache
            .write_metadata(&reference.digest, &metadata, metadata_digest.as_deref())
            .await?;
        if let Some(metadata_digest) = metadata_digest {
            reference
                .metadata
                .insert("metadata_digest".into(), Value::from(metadata_digest));
        }

        Ok((reference, metadata))
    }

    async fn check_updates(&self, reference: &PacketReference) -> RegistryResult<UpdateInfo> {
        let oci_ref = Self::registry_ref(reference)?;
        let latest = self.client.resolve(oci_ref.as_str()).await?;
        Ok(UpdateInfo {
            has_update: latest != reference.digest,
            latest_digest: Some(latest),
            detail: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistryClientConfig;

    fn reference(metadata: Map<String, Value>) -> PacketReference {
        PacketReference {
            uri: "oci://reg.local/team/demo".into(),
            resolved_uri: "oci://reg.local/team/demo:latest".into(),
            digest: format!("sha256:{}", "a".repeat(64)),
            metadata,
        }
    }

    #[test]
    fn test_registry_ref_prefers_recorded_ref() {
        let mut metadata = Map::new();
        metadata.insert("ref".into(), Value::from("reg.local/team/demo:1.0.0"));
        let oci_ref = OciSource::registry_ref(&reference(metadata)).unwrap();
        assert_eq!(oci_ref.as_str(), "reg.local/team/demo:1.0.0");
    }

    #[test]
    fn test_registry_ref_from_resolved_uri() {
        let oci_ref = OciSource::registry_ref(&reference(Map::new())).unwrap();
        assert_eq!(oci_ref.as_str(), "reg.local/team/demo:latest");
    }

    #[tokio::test]
    async fn test_resolve_rejects_malformed_locator_without_helper() {
        let config = RegistryClientConfig::default().with_helper("/nonexistent/helper");
        let source = OciSource::new(RegistryClient::new(config), TrustPolicy::default());
        let err = source.resolve("oci://").await.unwrap_err();
        assert!(matches!(err, RegistryError::Locator { .. }));
    }
}
