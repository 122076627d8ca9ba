//! Registry client for resolving, fetching and publishing packets.
//!
//! Public API: no process knowledge. All spawning, timeout and retry
//! handling lives in process.rs.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cache::io::{list_files, total_size};
use crate::error::{RegistryError, RegistryResult};
use crate::reference::repository_for_tags;
use crate::security::assert_allowlisted;
use crate::types::{ArtifactSpec, PullResult, PushResult, Referrer, RegistryClientConfig};

mod blob;
mod helpers;
mod process;

pub use blob::BlobFetchConvention;

use helpers::{classify_tag, common_root, parse_referrers_payload, parse_tags, relative_posix};
use process::{HelperBackend, HelperError};

/// Registry client backed by an external helper executable.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    helper: HelperBackend,
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

impl RegistryClient {
    pub fn new(config: RegistryClientConfig) -> Self {
        Self {
            helper: HelperBackend { config },
        }
    }

    pub fn from_env() -> Self {
        Self::new(RegistryClientConfig::from_env())
    }

    pub fn config(&self) -> &RegistryClientConfig {
        &self.helper.config
    }

    fn check_host(&self, reference: &str) -> RegistryResult<()> {
        assert_allowlisted(reference, &self.helper.config.allowlist_domains)
    }

    /// Resolve a reference to its manifest digest.
    pub async fn resolve(&self, reference: &str) -> RegistryResult<String> {
        self.check_host(reference)?;
        debug!(reference, "resolving reference");

        let output = self.helper.run(&args(["resolve", reference]), None).await?;
        output.digest().ok_or_else(|| {
            RegistryError::protocol(format!("unable to resolve digest for ref '{}'", reference))
        })
    }

    /// Fetch the registry manifest of a reference.
    pub async fn fetch_manifest(&self, reference: &str) -> RegistryResult<Value> {
        self.check_host(reference)?;
        debug!(reference, "fetching manifest");

        let output = self
            .helper
            .run(&args(["manifest", "fetch", reference]), None)
            .await?;

        match serde_json::from_str::<Value>(output.stdout_text().trim()) {
            Ok(manifest @ Value::Object(_)) => Ok(manifest),
            Ok(_) => Err(RegistryError::protocol("unable to parse OCI manifest payload")),
            Err(e) => Err(RegistryError::protocol(format!(
                "invalid JSON payload from manifest fetch: {}",
                e
            ))),
        }
    }

    /// Fetch one blob, walking [`BlobFetchConvention::ORDER`].
    pub async fn fetch_blob(&self, reference: &str, digest: &str) -> RegistryResult<Vec<u8>> {
        self.check_host(reference)?;
        if digest.trim().is_empty() {
            return Err(RegistryError::protocol("missing blob digest"));
        }

        let scratch = tempfile::Builder::new()
            .prefix("cpm-oci-blob-")
            .tempdir()
            .map_err(|e| RegistryError::cache("failed to create blob scratch directory", e))?;
        let output_path = scratch.path().join("blob.bin");

        let mut last_failure = String::new();
        for convention in BlobFetchConvention::ORDER {
            let argv = convention.args(reference, digest, &output_path);
            match self.helper.run(&argv, None).await {
                Ok(_) if convention.writes_file() => {
                    return tokio::fs::read(&output_path).await.map_err(|e| {
                        RegistryError::protocol(format!(
                            "blob fetch reported success but wrote no readable file: {}",
                            e
                        ))
                    });
                }
                Ok(output) => {
                    debug!(digest, convention = convention.name(), "fetched blob");
                    return Ok(output.stdout);
                }
                Err(e @ HelperError::NotInstalled { .. }) => return Err(e.into()),
                Err(HelperError::Failed { message }) => {
                    debug!(
                        digest,
                        convention = convention.name(),
                        error = %message,
                        "blob fetch convention failed"
                    );
                    last_failure = message;
                }
            }
        }

        Err(RegistryError::protocol(format!(
            "unable to fetch blob {} from {}: {}",
            digest, reference, last_failure
        )))
    }

    /// Discover referrers attached to a reference.
    ///
    /// Falls back to classifying repository tags when the referrers API
    /// fails or returns nothing usable.
    pub async fn discover_referrers(&self, reference: &str) -> RegistryResult<Vec<Referrer>> {
        self.check_host(reference)?;

        match self
            .helper
            .run(&args(["discover", reference, "--output", "json"]), None)
            .await
        {
            Ok(output) => {
                let parsed = parse_referrers_payload(&output.stdout_text());
                if !parsed.is_empty() {
                    debug!(reference, count = parsed.len(), "discovered referrers");
                    return Ok(parsed);
                }
                debug!(reference, "referrers API returned nothing, falling back to tags");
            }
            Err(e @ HelperError::NotInstalled { .. }) => return Err(e.into()),
            Err(HelperError::Failed { message }) => {
                debug!(reference, error = %message, "referrers API unavailable, falling back to tags");
            }
        }

        Ok(self.referrers_from_tags(reference).await)
    }

    async fn referrers_from_tags(&self, reference: &str) -> Vec<Referrer> {
        let repository = repository_for_tags(reference);
        match self.list_tags(repository).await {
            Ok(tags) => tags.iter().filter_map(|t| classify_tag(t)).collect(),
            Err(e) => {
                warn!(repository, error = %e, "tag listing failed, no referrer evidence found");
                Vec::new()
            }
        }
    }

    /// List the tags of a repository.
    pub async fn list_tags(&self, repository: &str) -> RegistryResult<Vec<String>> {
        self.check_host(repository)?;
        let output = self
            .helper
            .run(&args(["repo", "tags", repository]), None)
            .await?;
        parse_tags(&output.stdout_text())
    }

    /// Pull an artifact into `output_dir`, enforcing the size cap.
    pub async fn pull(&self, reference: &str, output_dir: &Path) -> RegistryResult<PullResult> {
        self.check_host(reference)?;
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| RegistryError::cache("failed to create pull directory", e))?;

        let dir = output_dir.to_string_lossy();
        let output = self
            .helper
            .run(&args(["pull", reference, "-o", &*dir]), None)
            .await?;

        let files = list_files(output_dir)
            .await
            .map_err(|e| RegistryError::cache("failed to list pulled files", e))?;
        self.enforce_size_limit(&files).await?;

        debug!(reference, files = files.len(), "pulled artifact");
        Ok(PullResult {
            reference: reference.to_string(),
            digest: output.digest(),
            files,
        })
    }

    async fn enforce_size_limit(&self, files: &[PathBuf]) -> RegistryResult<()> {
        let Some(limit) = self.helper.config.max_artifact_size_bytes else {
            return Ok(());
        };

        let total = total_size(files)
            .await
            .map_err(|e| RegistryError::cache("failed to size pulled files", e))?;
        if total > limit {
            return Err(RegistryError::protocol(format!(
                "artifact size {} exceeds configured limit {} bytes",
                total, limit
            )));
        }
        Ok(())
    }

    /// Push files as one artifact.
    ///
    /// Files are passed relative to their common root directory. When the
    /// helper prints no digest, the reference is resolved afterwards.
    pub async fn push(&self, reference: &str, artifact: &ArtifactSpec) -> RegistryResult<PushResult> {
        self.check_host(reference)?;
        if artifact.files.is_empty() {
            return Err(RegistryError::protocol("artifact spec has no files to publish"));
        }

        let mut files = Vec::with_capacity(artifact.files.len());
        for path in &artifact.files {
            let resolved = tokio::fs::canonicalize(path)
                .await
                .map_err(|e| RegistryError::PayloadMissing {
                    path: path.clone(),
                    reason: format!("artifact file not readable: {}", e),
                })?;
            files.push((path, resolved));
        }

        let resolved: Vec<PathBuf> = files.iter().map(|(_, r)| r.clone()).collect();
        let root = common_root(&resolved)
            .ok_or_else(|| RegistryError::protocol("artifact files share no common root"))?;

        let mut argv = args(["push", reference]);
        for (original, path) in &files {
            let rel = relative_posix(path, &root).ok_or_else(|| {
                RegistryError::protocol(format!("{} is outside {}", path.display(), root.display()))
            })?;
            match artifact
                .media_type_for(path)
                .or_else(|| artifact.media_type_for(original))
            {
                Some(media) => argv.push(format!("{}:{}", rel, media)),
                None => argv.push(rel),
            }
        }

        let output = self.helper.run(&argv, Some(&root)).await?;
        let digest = match output.digest() {
            Some(digest) => digest,
            None => {
                debug!(reference, "push printed no digest, resolving");
                self.resolve(reference).await?
            }
        };

        info!(reference, digest = %digest, "pushed artifact");
        Ok(PushResult {
            reference: reference.to_string(),
            digest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_allowlist() -> RegistryClient {
        RegistryClient::new(
            RegistryClientConfig::default()
                .with_helper("/nonexistent/cpm-registry-helper")
                .with_allowlist(["good.com"]),
        )
    }

    #[tokio::test]
    async fn test_allowlist_checked_before_any_helper_call() {
        let client = client_with_allowlist();

        let err = client.resolve("evil.com/team/demo:1.0.0").await.unwrap_err();
        assert!(matches!(err, RegistryError::Security { .. }));

        let err = client
            .fetch_blob("evil.com/team/demo:1.0.0", "sha256:abc")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Security { .. }));

        let err = client
            .push("evil.com/team/demo:1.0.0", &ArtifactSpec::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Security { .. }));
    }

    #[tokio::test]
    async fn test_missing_helper_is_protocol_error() {
        let client = client_with_allowlist();
        let err = client.resolve("good.com/team/demo:1.0.0").await.unwrap_err();
        assert!(matches!(err, RegistryError::Protocol { .. }));
        assert!(err.to_string().contains("Install ORAS"));
    }

    #[tokio::test]
    async fn test_push_without_files_is_rejected() {
        let client = client_with_allowlist();
        let err = client
            .push("good.com/team/demo:1.0.0", &ArtifactSpec::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no files"));
    }

    #[tokio::test]
    async fn test_empty_blob_digest_is_rejected() {
        let client = client_with_allowlist();
        let err = client.fetch_blob("good.com/team/demo:1.0.0", " ").await.unwrap_err();
        assert!(err.to_string().contains("missing blob digest"));
    }
}
