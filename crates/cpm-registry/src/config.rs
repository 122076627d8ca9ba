//! Workspace configuration (`<workspace>/config/config.toml`, `[oci]` table).
//!
//! ```toml
//! [oci]
//! timeout_seconds = 30
//! max_retries = 2
//! backoff_seconds = 0.2
//! insecure = false
//! allowlist_domains = ["registry.local"]
//! max_artifact_size_bytes = 1073741824
//! username = "ci"
//! password = "..."
//! strict_verify = true
//! require_signature = true
//! require_sbom = true
//! require_provenance = true
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::auth::Credentials;
use crate::error::{RegistryError, RegistryResult};
use crate::types::{RegistryClientConfig, TrustPolicy};

/// Location of the configuration file relative to the workspace root.
pub const CONFIG_FILE: &str = "config/config.toml";

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    oci: OciSection,
}

#[derive(Debug, Default, Deserialize)]
struct OciSection {
    helper: Option<PathBuf>,
    timeout_seconds: Option<f64>,
    max_retries: Option<u32>,
    backoff_seconds: Option<f64>,
    insecure: Option<bool>,
    #[serde(default)]
    allowlist_domains: Vec<String>,
    max_artifact_size_bytes: Option<u64>,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    strict_verify: Option<bool>,
    require_signature: Option<bool>,
    require_sbom: Option<bool>,
    require_provenance: Option<bool>,
}

/// Registry settings read from a workspace.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceConfig {
    pub client: RegistryClientConfig,
    pub trust: TrustPolicy,
}

impl WorkspaceConfig {
    /// Load `<workspace_root>/config/config.toml`; a missing file yields defaults.
    pub fn load(workspace_root: &Path) -> RegistryResult<Self> {
        let path = workspace_root.join(CONFIG_FILE);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no workspace config, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(RegistryError::Config {
                    message: format!("failed to read {}: {}", path.display(), e),
                })
            }
        };
        Self::from_toml(&text).map_err(|e| match e {
            RegistryError::Config { message } => RegistryError::Config {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    /// Parse configuration text.
    pub fn from_toml(text: &str) -> RegistryResult<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| RegistryError::Config {
            message: e.to_string(),
        })?;
        let oci = file.oci;
        finite_seconds("timeout_seconds", oci.timeout_seconds)?;
        finite_seconds("backoff_seconds", oci.backoff_seconds)?;

        let defaults = RegistryClientConfig::default();
        let client = RegistryClientConfig {
            helper: oci.helper.unwrap_or(defaults.helper),
            timeout_secs: oci.timeout_seconds.unwrap_or(defaults.timeout_secs),
            max_retries: oci.max_retries.unwrap_or(defaults.max_retries),
            backoff_secs: oci.backoff_seconds.unwrap_or(defaults.backoff_secs),
            insecure: oci.insecure.unwrap_or(defaults.insecure),
            allowlist_domains: oci
                .allowlist_domains
                .into_iter()
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect(),
            max_artifact_size_bytes: oci.max_artifact_size_bytes,
            credentials: Credentials::from_parts(oci.username, oci.password, oci.token),
        };

        let secure = TrustPolicy::default();
        let trust = TrustPolicy {
            strict_verify: oci.strict_verify.unwrap_or(secure.strict_verify),
            require_signature: oci.require_signature.unwrap_or(secure.require_signature),
            require_sbom: oci.require_sbom.unwrap_or(secure.require_sbom),
            require_provenance: oci.require_provenance.unwrap_or(secure.require_provenance),
        };

        Ok(Self { client, trust })
    }
}

fn finite_seconds(key: &str, value: Option<f64>) -> RegistryResult<()> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(RegistryError::Config {
            message: format!("oci.{} must be a non-negative number of seconds", key),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = WorkspaceConfig::load(tmp.path()).unwrap();
        assert_eq!(config.client.max_retries, 2);
        assert_eq!(config.trust, TrustPolicy::default());
    }

    #[test]
    fn test_oci_section_is_read() {
        let config = WorkspaceConfig::from_toml(
            r#"
            [oci]
            timeout_seconds = 5
            max_retries = 4
            allowlist_domains = ["registry.local", " "]
            max_artifact_size_bytes = 1024
            token = "tok"
            strict_verify = false
            require_sbom = false
            "#,
        )
        .unwrap();

        assert_eq!(config.client.timeout_secs, 5.0);
        assert_eq!(config.client.max_retries, 4);
        assert_eq!(config.client.allowlist_domains, vec!["registry.local".to_string()]);
        assert_eq!(config.client.max_artifact_size_bytes, Some(1024));
        assert_eq!(
            config.client.credentials,
            Credentials::Bearer {
                token: "tok".to_string()
            }
        );
        assert!(!config.trust.strict_verify);
        assert!(!config.trust.require_sbom);
        assert!(config.trust.require_signature);
    }

    #[test]
    fn test_non_finite_durations_are_rejected() {
        for text in [
            "[oci]\ntimeout_seconds = inf\n",
            "[oci]\nbackoff_seconds = nan\n",
            "[oci]\nbackoff_seconds = -1.0\n",
        ] {
            let err = WorkspaceConfig::from_toml(text).unwrap_err();
            assert!(matches!(err, RegistryError::Config { .. }), "{text}");
        }

        let config = WorkspaceConfig::from_toml("[oci]\ntimeout_seconds = 1e300\n").unwrap();
        assert!(config.client.timeout() <= std::time::Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_other_tables_are_ignored() {
        let config = WorkspaceConfig::from_toml("[embeddings]\nmodel = \"x\"\n").unwrap();
        assert_eq!(config.client.helper, PathBuf::from("oras"));
    }

    #[test]
    fn test_unparsable_file_is_config_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("config")).unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "[oci\nbroken").unwrap();

        let err = WorkspaceConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, RegistryError::Config { .. }));
        assert!(err.to_string().contains("config.toml"));
    }
}
