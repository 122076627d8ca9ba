//! Client configuration and registry wire types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::auth::Credentials;

/// Upper bound for the linear retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound for a single helper attempt.
const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Registry protocol client configuration.
///
/// Immutable once handed to a [`crate::RegistryClient`]; build a new client
/// to change settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryClientConfig {
    /// Helper executable (name on `PATH` or explicit path).
    #[serde(default = "default_helper")]
    pub helper: PathBuf,

    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout", alias = "timeout_seconds")]
    pub timeout_secs: f64,

    /// Attempts per helper invocation.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Linear backoff base in seconds.
    #[serde(default = "default_backoff", alias = "backoff_seconds")]
    pub backoff_secs: f64,

    /// Talk to the registry over plain HTTP / unverified TLS.
    #[serde(default)]
    pub insecure: bool,

    /// Allowed registry hosts (subdomains included). Empty allows all.
    #[serde(default)]
    pub allowlist_domains: Vec<String>,

    /// Cap on the total size of a pulled artifact.
    #[serde(default)]
    pub max_artifact_size_bytes: Option<u64>,

    /// Registry credentials.
    #[serde(default)]
    pub credentials: Credentials,
}

fn default_helper() -> PathBuf {
    PathBuf::from("oras")
}

fn default_timeout() -> f64 {
    30.0
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff() -> f64 {
    0.2
}

impl Default for RegistryClientConfig {
    fn default() -> Self {
        Self {
            helper: default_helper(),
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            backoff_secs: default_backoff(),
            insecure: false,
            allowlist_domains: Vec::new(),
            max_artifact_size_bytes: None,
            credentials: Credentials::None,
        }
    }
}

impl RegistryClientConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `CPM_OCI_HELPER` | Helper executable (default: `oras`) |
    /// | `CPM_OCI_TIMEOUT` | Per-attempt timeout in seconds (default: 30) |
    /// | `CPM_OCI_MAX_RETRIES` | Attempts per invocation (default: 2) |
    /// | `CPM_OCI_INSECURE` | Allow insecure registries |
    /// | `CPM_OCI_ALLOWLIST` | Comma-separated allowed hosts |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            helper: std::env::var("CPM_OCI_HELPER")
                .map(PathBuf::from)
                .unwrap_or(defaults.helper),
            timeout_secs: std::env::var("CPM_OCI_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("CPM_OCI_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            insecure: std::env::var("CPM_OCI_INSECURE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            allowlist_domains: std::env::var("CPM_OCI_ALLOWLIST")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            credentials: Credentials::from_env(),
            ..defaults
        }
    }

    /// Set the helper executable.
    pub fn with_helper(mut self, helper: impl Into<PathBuf>) -> Self {
        self.helper = helper.into();
        self
    }

    /// Set the allow-listed registry hosts.
    pub fn with_allowlist<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowlist_domains = domains.into_iter().map(Into::into).collect();
        self
    }

    /// Set credentials.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the pulled artifact size cap.
    pub fn with_max_artifact_size(mut self, bytes: u64) -> Self {
        self.max_artifact_size_bytes = Some(bytes);
        self
    }

    /// Set the retry policy.
    pub fn with_retries(mut self, max_retries: u32, backoff_secs: f64) -> Self {
        self.max_retries = max_retries;
        self.backoff_secs = backoff_secs;
        self
    }

    /// Per-attempt timeout, between one second and one day.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.max(1.0))
            .unwrap_or(MAX_TIMEOUT)
            .min(MAX_TIMEOUT)
    }

    /// Total attempts per helper invocation, never below one.
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Sleep before the attempt following `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let base = Duration::try_from_secs_f64(self.backoff_secs.max(0.0)).unwrap_or(MAX_BACKOFF);
        base.saturating_mul(attempt).min(MAX_BACKOFF)
    }
}

/// Trust requirements applied to every registry resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustPolicy {
    /// Abort resolution when a required signal is missing.
    #[serde(default = "default_true")]
    pub strict_verify: bool,

    #[serde(default = "default_true")]
    pub require_signature: bool,

    #[serde(default = "default_true")]
    pub require_sbom: bool,

    #[serde(default = "default_true")]
    pub require_provenance: bool,
}

fn default_true() -> bool {
    true
}

impl Default for TrustPolicy {
    fn default() -> Self {
        Self {
            strict_verify: true,
            require_signature: true,
            require_sbom: true,
            require_provenance: true,
        }
    }
}

impl TrustPolicy {
    /// Report-only policy: nothing is required, nothing aborts.
    pub fn permissive() -> Self {
        Self {
            strict_verify: false,
            require_signature: false,
            require_sbom: false,
            require_provenance: false,
        }
    }
}

/// How a referrer was discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferrerSource {
    /// Registry referrers API (`discover`).
    #[default]
    #[serde(rename = "referrers-api")]
    ReferrersApi,

    /// Classified from a repository tag name.
    #[serde(rename = "referrers-tag")]
    ReferrersTag,
}

impl fmt::Display for ReferrerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReferrersApi => f.write_str("referrers-api"),
            Self::ReferrersTag => f.write_str("referrers-tag"),
        }
    }
}

/// A secondary artifact attached to a packet digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referrer {
    /// Referrer digest (or `tag:<name>` for tag-derived evidence).
    pub digest: String,

    /// Artifact media type.
    pub artifact_type: String,

    /// Annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    /// Discovery mechanism.
    #[serde(default)]
    pub source: ReferrerSource,
}

/// Supply-chain evidence found for a digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustVerificationReport {
    pub signature_valid: bool,
    pub sbom_present: bool,
    pub provenance_present: bool,

    /// Highest SLSA level advertised, clamped to 0..=4.
    pub slsa_level: Option<u8>,

    /// Weighted summary in [0, 1], four decimals.
    pub trust_score: f64,

    /// Missing required signals; always empty outside strict mode.
    #[serde(default)]
    pub strict_failures: Vec<String>,

    /// Raw evidence.
    #[serde(default)]
    pub referrers: Vec<Referrer>,
}

/// Files to push with their declared media types.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSpec {
    /// Files, in push order.
    pub files: Vec<PathBuf>,

    /// Media type by file name or full path.
    pub media_types: BTreeMap<String, String>,
}

impl ArtifactSpec {
    pub fn new(files: Vec<PathBuf>, media_types: BTreeMap<String, String>) -> Self {
        Self { files, media_types }
    }

    /// Declared media type for `path`, looked up by file name first.
    pub fn media_type_for(&self, path: &Path) -> Option<&str> {
        path.file_name()
            .and_then(|n| self.media_types.get(n.to_string_lossy().as_ref()))
            .or_else(|| self.media_types.get(path.to_string_lossy().as_ref()))
            .map(String::as_str)
    }
}

/// Result of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    pub reference: String,
    pub digest: String,
}

/// Result of a pull.
#[derive(Debug, Clone)]
pub struct PullResult {
    pub reference: String,

    /// Digest reported by the helper, when it printed one.
    pub digest: Option<String>,

    /// Materialized files.
    pub files: Vec<PathBuf>,
}
