//! Packet distribution over OCI registries.
//!
//! This crate resolves, verifies and caches knowledge packets published as
//! OCI artifacts, providing:
//!
//! - Registry protocol client driving an external helper (`oras`) with
//!   timeouts, retries and host allow-listing
//! - Referrer discovery and trust scoring (signature, SBOM, provenance, SLSA)
//! - Packet metadata documents with legacy-format normalization
//! - Push-ready artifact layouts for locally built packets
//! - Content-addressed local cache with recency-based eviction
//! - Locator resolution (`oci://`, optionally `dir://`)
//!
//! # Quick Start
//!
//! ```no_run
//! use cpm_registry::{ContentAddressedCache, ResolverConfig, SourceResolver};
//!
//! # async fn example() -> cpm_registry::RegistryResult<()> {
//! let resolver = SourceResolver::new(ResolverConfig::default(), ContentAddressedCache::new()?);
//!
//! let (reference, packet) = resolver
//!     .resolve_and_fetch("oci://registry.local/team/demo:1.0.0")
//!     .await?;
//! println!("{} -> {}", reference.digest, packet.path.display());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Workspaces configure the registry in `config/config.toml` (see
//! [`config`]). Standalone clients can read the environment instead:
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `CPM_OCI_HELPER` | Helper executable (default: `oras`) |
//! | `CPM_OCI_TIMEOUT` | Per-attempt timeout in seconds (default: 30) |
//! | `CPM_OCI_MAX_RETRIES` | Attempts per helper call (default: 2) |
//! | `CPM_OCI_INSECURE` | Allow plain-HTTP registries |
//! | `CPM_OCI_ALLOWLIST` | Comma-separated allowed registry hosts |
//! | `CPM_OCI_USERNAME` / `CPM_OCI_PASSWORD` / `CPM_OCI_TOKEN` | Credentials |

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
mod digest;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod reference;
pub mod resolver;
pub mod security;
pub mod source;
pub mod trust;
pub mod types;

// Re-export main types
pub use auth::Credentials;
pub use cache::{
    cache_key_for, directory_digest, CachedMetadata, ContentAddressedCache, LocalPacket,
    DEFAULT_MAX_OBJECTS,
};
pub use client::{BlobFetchConvention, RegistryClient};
pub use config::WorkspaceConfig;
pub use digest::is_sha256_digest;
pub use error::{RegistryError, RegistryResult};
pub use layout::{
    build_layout, ArtifactLayout, LayoutOptions, PACKET_LOCK_MEDIA_TYPE,
    PACKET_MANIFEST_MEDIA_TYPE,
};
pub use metadata::{
    validate_document, BuildMetadata, BuildOptions, MetadataDocument, PacketMetadata, PayloadFile,
};
pub use reference::{digest_ref_for, package_ref_for, OciRef};
pub use resolver::{ResolverConfig, SourceResolver};
pub use source::{DirSource, OciSource, PacketReference, PacketSource, Source, UpdateInfo};
pub use trust::{evaluate_trust_report, trust_score};
pub use types::{
    ArtifactSpec, PullResult, PushResult, Referrer, ReferrerSource, RegistryClientConfig,
    TrustPolicy, TrustVerificationReport,
};
