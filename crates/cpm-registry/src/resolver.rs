//! Packet resolution.
//!
//! Dispatches a locator to the first source that claims its scheme:
//! 1. Registry (`oci://`)
//! 2. Local directory (`dir://` or an existing path), when enabled
//!
//! Anything else is rejected before any registry traffic.

use std::path::Path;

use tracing::{debug, info};

use crate::cache::{ContentAddressedCache, LocalPacket};
use crate::client::RegistryClient;
use crate::config::WorkspaceConfig;
use crate::error::{RegistryError, RegistryResult};
use crate::metadata::PacketMetadata;
use crate::source::{DirSource, OciSource, PacketReference, PacketSource, Source, UpdateInfo};
use crate::types::{RegistryClientConfig, TrustPolicy};

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Registry client configuration.
    pub client: RegistryClientConfig,

    /// Trust requirements for registry packets.
    pub trust: TrustPolicy,

    /// Object threshold applied to the cache; `None` keeps the cache's own.
    pub cache_max_objects: Option<usize>,

    /// Accept `dir://` locators and bare paths.
    pub enable_dir_source: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            client: RegistryClientConfig::default(),
            trust: TrustPolicy::default(),
            cache_max_objects: None,
            enable_dir_source: false,
        }
    }
}

impl From<WorkspaceConfig> for ResolverConfig {
    fn from(workspace: WorkspaceConfig) -> Self {
        Self {
            client: workspace.client,
            trust: workspace.trust,
            ..Self::default()
        }
    }
}

impl ResolverConfig {
    /// Configuration from `<workspace_root>/config/config.toml`.
    pub fn for_workspace(workspace_root: &Path) -> RegistryResult<Self> {
        WorkspaceConfig::load(workspace_root).map(Self::from)
    }

    /// Enable the directory source.
    pub fn with_dir_source(mut self) -> Self {
        self.enable_dir_source = true;
        self
    }

    /// Set the trust policy.
    pub fn with_trust(mut self, trust: TrustPolicy) -> Self {
        self.trust = trust;
        self
    }

    /// Set the cache object threshold.
    pub fn with_cache_max_objects(mut self, max_objects: usize) -> Self {
        self.cache_max_objects = Some(max_objects);
        self
    }
}

/// Single entry point for resolving, fetching and inspecting packets.
pub struct SourceResolver {
    sources: Vec<Source>,
    cache: ContentAddressedCache,
    config: ResolverConfig,
}

impl SourceResolver {
    /// Build a resolver; a configured object threshold overrides the cache's.
    pub fn new(config: ResolverConfig, cache: ContentAddressedCache) -> Self {
        let client = RegistryClient::new(config.client.clone());
        let mut sources = vec![Source::Oci(OciSource::new(client, config.trust))];
        if config.enable_dir_source {
            sources.push(Source::Dir(DirSource::new()));
        }

        Self {
            sources,
            cache: match config.cache_max_objects {
                Some(max_objects) => cache.with_max_objects(max_objects),
                None => cache,
            },
            config,
        }
    }

    /// Resolver for a workspace: its configuration file and `<workspace>/cache`.
    pub fn for_workspace(workspace_root: &Path) -> RegistryResult<Self> {
        let config = ResolverConfig::for_workspace(workspace_root)?;
        Ok(Self::new(config, ContentAddressedCache::for_workspace(workspace_root)))
    }

    pub fn cache(&self) -> &ContentAddressedCache {
        &self.cache
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn select(&self, uri: &str) -> RegistryResult<&Source> {
        self.sources
            .iter()
            .find(|s| s.can_handle(uri))
            .ok_or_else(|| RegistryError::locator(uri, "unsupported source locator"))
    }

    /// Source that produced `reference`.
    fn source_of(&self, reference: &PacketReference) -> RegistryResult<&Source> {
        match reference.metadata_str("source") {
            Some(name) => self
                .sources
                .iter()
                .find(|s| s.name() == name)
                .ok_or_else(|| {
                    RegistryError::locator(&reference.uri, format!("source '{}' is not enabled", name))
                }),
            None => self.select(&reference.resolved_uri),
        }
    }

    /// Resolve a locator to a digest-carrying reference.
    pub async fn resolve(&self, uri: &str) -> RegistryResult<PacketReference> {
        let source = self.select(uri)?;
        debug!(uri, source = source.name(), "resolving locator");
        source.resolve(uri).await
    }

    /// Materialize a resolved packet into the cache.
    pub async fn fetch(&self, reference: &PacketReference) -> RegistryResult<LocalPacket> {
        self.source_of(reference)?.fetch(reference, &self.cache).await
    }

    /// Resolve and materialize in one call.
    pub async fn resolve_and_fetch(&self, uri: &str) -> RegistryResult<(PacketReference, LocalPacket)> {
        let source = self.select(uri)?;
        let reference = source.resolve(uri).await?;
        let packet = source.fetch(&reference, &self.cache).await?;
        info!(
            uri,
            digest = %reference.digest,
            path = %packet.path.display(),
            cached = packet.cached,
            "packet ready"
        );
        Ok((reference, packet))
    }

    /// Resolve and read packet metadata without a full fetch where possible.
    pub async fn inspect_metadata(&self, uri: &str) -> RegistryResult<(PacketReference, PacketMetadata)> {
        self.select(uri)?.inspect_metadata(uri, &self.cache).await
    }

    /// Metadata lookup used by query tooling; same path as [`Self::inspect_metadata`].
    pub async fn lookup_metadata(&self, uri: &str) -> RegistryResult<(PacketReference, PacketMetadata)> {
        self.inspect_metadata(uri).await
    }

    /// Whether the locator behind `reference` now points at different content.
    pub async fn check_updates(&self, reference: &PacketReference) -> RegistryResult<UpdateInfo> {
        self.source_of(reference)?.check_updates(reference).await
    }
}
