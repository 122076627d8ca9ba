//! Packet sources selected by locator scheme.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{ContentAddressedCache, LocalPacket};
use crate::error::RegistryResult;
use crate::metadata::PacketMetadata;

mod dir;
mod oci;

pub use dir::DirSource;
pub use oci::OciSource;

/// A locator resolved to an exact content identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketReference {
    /// Locator as given by the caller.
    pub uri: String,

    /// Canonical locator (normalized registry reference or absolute path).
    pub resolved_uri: String,

    /// Content digest (`sha256:<hex>`).
    pub digest: String,

    /// Source-specific details (`source`, `ref`, `trust`, `metadata_digest`).
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PacketReference {
    /// Value of a string metadata entry.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

/// Outcome of an update check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub has_update: bool,
    pub latest_digest: Option<String>,
    pub detail: Option<String>,
}

/// Capability interface shared by all packet sources.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Whether this source understands `uri`.
    fn can_handle(&self, uri: &str) -> bool;

    /// Resolve `uri` to a digest-carrying reference.
    async fn resolve(&self, uri: &str) -> RegistryResult<PacketReference>;

    /// Materialize the packet payload into `cache`.
    async fn fetch(
        &self,
        reference: &PacketReference,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<LocalPacket>;

    /// Resolve `uri` and read its metadata document without a full fetch where possible.
    async fn inspect_metadata(
        &self,
        uri: &str,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<(PacketReference, PacketMetadata)>;

    /// Compare `reference` with what the locator points at now.
    async fn check_updates(&self, reference: &PacketReference) -> RegistryResult<UpdateInfo>;
}

/// Closed set of packet sources.
#[derive(Debug, Clone)]
pub enum Source {
    Oci(OciSource),
    Dir(DirSource),
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Oci(_) => "oci",
            Self::Dir(_) => "dir",
        }
    }

    fn inner(&self) -> &dyn PacketSource {
        match self {
            Self::Oci(source) => source,
            Self::Dir(source) => source,
        }
    }
}

#[async_trait]
impl PacketSource for Source {
    fn can_handle(&self, uri: &str) -> bool {
        self.inner().can_handle(uri)
    }

    async fn resolve(&self, uri: &str) -> RegistryResult<PacketReference> {
        self.inner().resolve(uri).await
    }

    async fn fetch(
        &self,
        reference: &PacketReference,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<LocalPacket> {
        self.inner().fetch(reference, cache).await
    }

    async fn inspect_metadata(
        &self,
        uri: &str,
        cache: &ContentAddressedCache,
    ) -> RegistryResult<(PacketReference, PacketMetadata)> {
        self.inner().inspect_metadata(uri, cache).await
    }

    async fn check_updates(&self, reference: &PacketReference) -> RegistryResult<UpdateInfo> {
        self.inner().check_updates(reference).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RegistryClientConfig, TrustPolicy};
    use crate::RegistryClient;

    #[test]
    fn test_variants_claim_their_schemes() {
        let oci = Source::Oci(OciSource::new(
            RegistryClient::new(RegistryClientConfig::default()),
            TrustPolicy::default(),
        ));
        let dir = Source::Dir(DirSource::new());

        assert!(oci.can_handle("oci://reg.local/team/demo"));
        assert!(!oci.can_handle("dir:///tmp/demo"));
        assert!(dir.can_handle("dir:///tmp/demo"));
        assert!(!dir.can_handle("oci://reg.local/team/demo"));
        assert!(!dir.can_handle("https://hub.example/demo"));
        assert_eq!(oci.name(), "oci");
        assert_eq!(dir.name(), "dir");
    }

    #[test]
    fn test_metadata_str() {
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from("oci"));
        metadata.insert("trust".into(), serde_json::json!({"trust_score": 0.5}));
        let reference = PacketReference {
            uri: "oci://reg.local/demo".into(),
            resolved_uri: "oci://reg.local/demo:latest".into(),
            digest: format!("sha256:{}", "a".repeat(64)),
            metadata,
        };
        assert_eq!(reference.metadata_str("source"), Some("oci"));
        assert_eq!(reference.metadata_str("trust"), None);
        assert_eq!(reference.metadata_str("ref"), None);
    }
}
