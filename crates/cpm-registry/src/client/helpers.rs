//! Pure helpers: helper output parsing, tag classification, push paths (no process spawning).

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;

use crate::error::{RegistryError, RegistryResult};
use crate::types::{Referrer, ReferrerSource};

pub(crate) const SIMULATED_SIGNATURE_TYPE: &str = "application/vnd.dev.cosign.simulated.v1+json";
pub(crate) const SIMULATED_SBOM_TYPE: &str = "application/vnd.cpm.sbom.simulated.v1+json";
pub(crate) const SIMULATED_PROVENANCE_TYPE: &str =
    "application/vnd.cpm.provenance.simulated.v1+json";

/// Parse `discover --output json` output.
///
/// Accepts `{"manifests": [...]}`, `{"referrers": [...]}` or a bare list.
/// Entries without a digest or an artifact type are skipped; anything
/// unparsable yields an empty list.
pub(crate) fn parse_referrers_payload(payload: &str) -> Vec<Referrer> {
    let text = payload.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let document: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let entries = match &document {
        Value::Object(map) => map
            .get("manifests")
            .and_then(Value::as_array)
            .or_else(|| map.get("referrers").and_then(Value::as_array)),
        Value::Array(items) => Some(items),
        _ => None,
    };

    entries
        .into_iter()
        .flatten()
        .filter_map(referrer_from_entry)
        .collect()
}

fn referrer_from_entry(entry: &Value) -> Option<Referrer> {
    let entry = entry.as_object()?;
    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    let digest = text("digest")?;
    let artifact_type = text("artifactType").or_else(|| text("mediaType"))?;
    let annotations = entry
        .get("annotations")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), value_to_string(v)))
                .collect()
        })
        .unwrap_or_default();

    Some(Referrer {
        digest: digest.to_string(),
        artifact_type: artifact_type.to_string(),
        annotations,
        source: ReferrerSource::ReferrersApi,
    })
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse `repo tags` output: JSON (`{"tags": [...]}` or `[...]`) or one tag per line.
pub(crate) fn parse_tags(output: &str) -> RegistryResult<Vec<String>> {
    let text = output.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let document: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return Ok(text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect());
        }
    };

    let tags = match &document {
        Value::Object(map) => map.get("tags").and_then(Value::as_array),
        Value::Array(items) => Some(items),
        _ => None,
    };

    tags.map(|items| items.iter().map(value_to_string).collect())
        .ok_or_else(|| RegistryError::protocol("unable to parse tags output"))
}

/// Classify a repository tag as supply-chain evidence, if it looks like any.
pub(crate) fn classify_tag(tag: &str) -> Option<Referrer> {
    let lowered = tag.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lowered.contains(n));

    let artifact_type = if lowered.ends_with(".sig") || has(&["cosign"]) {
        SIMULATED_SIGNATURE_TYPE
    } else if lowered.ends_with(".sbom") || has(&["sbom", "spdx", "cyclonedx"]) {
        SIMULATED_SBOM_TYPE
    } else if lowered.ends_with(".prov") || has(&["provenance", "slsa"]) {
        SIMULATED_PROVENANCE_TYPE
    } else {
        return None;
    };

    let mut annotations = BTreeMap::new();
    annotations.insert("tag".to_string(), tag.to_string());

    Some(Referrer {
        digest: format!("tag:{}", tag),
        artifact_type: artifact_type.to_string(),
        annotations,
        source: ReferrerSource::ReferrersTag,
    })
}

/// Deepest directory containing every file's parent directory.
pub(crate) fn common_root(files: &[PathBuf]) -> Option<PathBuf> {
    let mut parents = files.iter().map(|f| f.parent().unwrap_or(Path::new("")));
    let first: Vec<Component<'_>> = parents.next()?.components().collect();

    let shared = parents.fold(first.len(), |len, parent| {
        first
            .iter()
            .zip(parent.components())
            .take(len)
            .take_while(|(a, b)| *a == b)
            .count()
    });

    Some(first[..shared].iter().collect())
}

/// `path` relative to `root`, joined with `/`.
pub(crate) fn relative_posix(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}
