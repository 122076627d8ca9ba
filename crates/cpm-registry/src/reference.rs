//! Packet locator parsing.
//!
//! Supported locator formats:
//! - `oci://reg.local/team/demo` → `reg.local/team/demo:latest`
//! - `oci://reg.local/team/demo:1.0.0` → unchanged
//! - `oci://reg.local/team/demo@1.0.0` → `reg.local/team/demo:1.0.0`
//! - `oci://reg.local/team/demo@sha256:<64 hex>` → unchanged (pinned)
//! - `dir:///path/to/packet` or an existing directory path → directory source

use std::path::PathBuf;

use crate::digest::is_sha256_digest;
use crate::error::{RegistryError, RegistryResult};

/// Registry locator scheme.
pub const OCI_SCHEME: &str = "oci://";

/// Directory locator scheme.
pub const DIR_SCHEME: &str = "dir://";

const DEFAULT_TAG: &str = "latest";

/// A normalized registry reference (`host/repo/name:tag` or `host/repo/name@sha256:...`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciRef(String);

impl OciRef {
    /// Parse an `oci://` locator into a normalized reference.
    ///
    /// # Examples
    ///
    /// ```
    /// use cpm_registry::OciRef;
    ///
    /// let latest = OciRef::parse("oci://reg.local/team/demo").unwrap();
    /// assert_eq!(latest.as_str(), "reg.local/team/demo:latest");
    ///
    /// let tagged = OciRef::parse("oci://reg.local/team/demo@1.0.0").unwrap();
    /// assert_eq!(tagged.resolved_uri(), "oci://reg.local/team/demo:1.0.0");
    /// ```
    pub fn parse(locator: &str) -> RegistryResult<Self> {
        let trimmed = locator.trim();
        let raw = trimmed.strip_prefix(OCI_SCHEME).ok_or_else(|| {
            RegistryError::locator(locator, format!("expected {} locator", OCI_SCHEME))
        })?;
        let raw = raw.trim_matches('/');

        if raw.is_empty() {
            return Err(RegistryError::locator(locator, "empty registry reference"));
        }

        if let Some(at_pos) = raw.find("@sha256:") {
            let digest = &raw[at_pos + 1..];
            if !is_sha256_digest(digest) {
                return Err(RegistryError::locator(
                    locator,
                    "pinned digest must be sha256 followed by 64 lowercase hex characters",
                ));
            }
            if at_pos == 0 {
                return Err(RegistryError::locator(locator, "missing repository name"));
            }
            return Ok(Self(raw.to_string()));
        }

        if let Some((name, tag)) = raw.split_once('@') {
            if name.is_empty() {
                return Err(RegistryError::locator(locator, "missing repository name"));
            }
            if tag.is_empty() {
                return Err(RegistryError::locator(locator, "missing version after '@'"));
            }
            return Ok(Self(format!("{}:{}", name, tag)));
        }

        let last_segment = raw.rsplit('/').next().unwrap_or(raw);
        if last_segment.contains(':') {
            Ok(Self(raw.to_string()))
        } else {
            Ok(Self(format!("{}:{}", raw, DEFAULT_TAG)))
        }
    }

    /// Wrap an already-normalized reference (as recorded in a [`crate::PacketReference`]).
    pub(crate) fn from_normalized(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical locator for this reference.
    pub fn resolved_uri(&self) -> String {
        format!("{}{}", OCI_SCHEME, self.0)
    }

    /// Whether this reference pins a digest.
    pub fn is_pinned(&self) -> bool {
        self.0.contains("@sha256:")
    }
}

impl std::fmt::Display for OciRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for OciRef {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Directory named by a `dir://` locator or a bare path.
pub(crate) fn dir_locator_path(locator: &str) -> PathBuf {
    let trimmed = locator.trim();
    PathBuf::from(trimmed.strip_prefix(DIR_SCHEME).unwrap_or(trimmed))
}

/// Whether `locator` carries an explicit `scheme://` prefix.
pub(crate) fn has_scheme(locator: &str) -> bool {
    locator
        .split_once("://")
        .map(|(scheme, _)| {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        })
        .unwrap_or(false)
}

/// `repository/name:version` reference used when publishing.
pub fn package_ref_for(name: &str, version: &str, repository: &str) -> String {
    format!("{}/{}:{}", repository.trim_end_matches('/'), name, version)
}

/// `repository/name@digest` reference pinned to a published digest.
pub fn digest_ref_for(repository: &str, name: &str, digest: &str) -> String {
    format!("{}/{}@{}", repository.trim_end_matches('/'), name, digest)
}

/// Repository part of a reference: digest or trailing tag removed.
pub(crate) fn repository_for_tags(reference: &str) -> &str {
    let value = reference.trim();
    if let Some((repository, _)) = value.split_once('@') {
        return repository;
    }

    match (value.rfind('/'), value.rfind(':')) {
        (Some(slash), Some(colon)) if colon > slash => &value[..colon],
        (None, Some(colon)) => &value[..colon],
        _ => value,
    }
}
