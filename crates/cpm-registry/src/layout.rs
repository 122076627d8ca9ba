//! Push-ready staging layout for a locally built packet.
//!
//! ```text
//! <staging>/
//!   packet.manifest.json     # metadata document (first file, own media type)
//!   payload/                 # selected packet files
//!   packet.lock.json         # optional lock file (own media type)
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::digest::sha256_hex_bytes;
use crate::error::{RegistryError, RegistryResult};
use crate::metadata::{BuildMetadata, BuildOptions, PacketMetadata, PayloadFile, DEFAULT_PAYLOAD_ROOT};
use crate::types::ArtifactSpec;

pub const PACKET_MANIFEST_FILE: &str = "packet.manifest.json";
pub const PACKET_LOCK_FILE: &str = "packet.lock.json";
pub const PACKET_MANIFEST_MEDIA_TYPE: &str = "application/vnd.cpm.packet.manifest.v1+json";
pub const PACKET_LOCK_MEDIA_TYPE: &str = "application/vnd.cpm.packet.lock.v1+json";

/// Producing system's manifest inside a packet directory.
pub const SOURCE_MANIFEST_FILE: &str = "manifest.json";
const DESCRIPTOR_FILE: &str = "cpm.yml";

const BASE_FILES: &[&str] = &[DESCRIPTOR_FILE, SOURCE_MANIFEST_FILE];
const DOC_FILES: &[&str] = &["docs.jsonl"];
const EMBEDDING_FILES: &[&str] = &["vectors.f16.bin", "faiss/index.faiss"];

/// Which parts of a packet go into the artifact.
#[derive(Debug, Clone)]
pub struct LayoutOptions {
    pub include_embeddings: bool,
    pub include_docs: bool,
    /// Forces both optional categories off.
    pub minimal: bool,
    /// Embed the full producing manifest in the metadata document.
    pub include_source_manifest: bool,
    /// Reference of the full artifact, recorded in the metadata document.
    pub payload_full_ref: Option<String>,
}

impl Default for LayoutOptions {
    fn default() -> Self {
        Self {
            include_embeddings: true,
            include_docs: true,
            minimal: false,
            include_source_manifest: false,
            payload_full_ref: None,
        }
    }
}

impl LayoutOptions {
    fn effective(&self) -> BuildOptions {
        BuildOptions {
            include_embeddings: self.include_embeddings && !self.minimal,
            include_docs: self.include_docs && !self.minimal,
            minimal: self.minimal,
        }
    }
}

/// A staged artifact ready for [`crate::RegistryClient::push`].
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub packet_name: String,
    pub packet_version: String,
    pub staging_dir: PathBuf,
    /// Metadata document first, then payload files, then the lock file.
    pub files: Vec<PathBuf>,
    pub media_types: BTreeMap<String, String>,
    pub metadata: PacketMetadata,
}

impl ArtifactLayout {
    pub fn artifact_spec(&self) -> ArtifactSpec {
        ArtifactSpec::new(self.files.clone(), self.media_types.clone())
    }
}

/// Stage `packet_dir` into `staging_dir` (cleared first).
pub async fn build_layout(
    packet_dir: &Path,
    staging_dir: &Path,
    options: &LayoutOptions,
) -> RegistryResult<ArtifactLayout> {
    let packet_dir = fs::canonicalize(packet_dir)
        .await
        .map_err(|_| RegistryError::PayloadMissing {
            path: packet_dir.to_path_buf(),
            reason: "packet directory not found".to_string(),
        })?;

    let manifest_path = packet_dir.join(SOURCE_MANIFEST_FILE);
    let manifest_bytes = fs::read(&manifest_path)
        .await
        .map_err(|e| RegistryError::PayloadMissing {
            path: manifest_path.clone(),
            reason: format!("packet manifest not readable: {}", e),
        })?;
    let source_manifest: Value = serde_json::from_slice(&manifest_bytes).map_err(|e| {
        RegistryError::metadata(format!("{} is not valid JSON: {}", manifest_path.display(), e))
    })?;

    let (packet_name, packet_version) = packet_identity(&packet_dir, &source_manifest).await?;

    reset_staging(staging_dir, &packet_dir).await?;
    let staging_dir = fs::canonicalize(staging_dir)
        .await
        .map_err(|e| RegistryError::cache("failed to resolve staging directory", e))?;

    let build = options.effective();
    let mut selected: Vec<&str> = BASE_FILES.to_vec();
    if build.include_docs {
        selected.extend_from_slice(DOC_FILES);
    }
    if build.include_embeddings {
        selected.extend_from_slice(EMBEDDING_FILES);
    }

    let payload_dir = staging_dir.join(DEFAULT_PAYLOAD_ROOT);
    let mut payload_paths = Vec::new();
    let mut payload_files = Vec::new();
    for rel in selected {
        let src = packet_dir.join(rel);
        let content = match fs::read(&src).await {
            Ok(content) => content,
            Err(_) => continue,
        };
        let dst = payload_dir.join(rel);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::cache("failed to create payload directory", e))?;
        }
        fs::write(&dst, &content)
            .await
            .map_err(|e| RegistryError::cache("failed to stage payload file", e))?;

        payload_files.push(PayloadFile {
            name: rel.to_string(),
            digest: Some(sha256_hex_bytes(&content)),
            size: Some(content.len() as u64),
        });
        payload_paths.push(dst);
    }

    let metadata = BuildMetadata {
        name: packet_name.clone(),
        version: packet_version.clone(),
        source_manifest,
        payload_files,
        payload_full_ref: options.payload_full_ref.clone(),
        source_manifest_digest: Some(sha256_hex_bytes(&manifest_bytes)),
        build_options: Some(build),
        include_source_manifest: options.include_source_manifest,
    }
    .build()?;

    let mut media_types = BTreeMap::new();
    let mut files = Vec::with_capacity(payload_paths.len() + 2);

    let metadata_path = staging_dir.join(PACKET_MANIFEST_FILE);
    fs::write(&metadata_path, metadata.to_canonical_bytes()?)
        .await
        .map_err(|e| RegistryError::cache("failed to write metadata document", e))?;
    media_types.insert(PACKET_MANIFEST_FILE.to_string(), PACKET_MANIFEST_MEDIA_TYPE.to_string());
    files.push(metadata_path);
    files.extend(payload_paths);

    let lock_src = packet_dir.join(PACKET_LOCK_FILE);
    if fs::try_exists(&lock_src).await.unwrap_or(false) {
        let lock_dst = staging_dir.join(PACKET_LOCK_FILE);
        fs::copy(&lock_src, &lock_dst)
            .await
            .map_err(|e| RegistryError::cache("failed to stage lock file", e))?;
        media_types.insert(PACKET_LOCK_FILE.to_string(), PACKET_LOCK_MEDIA_TYPE.to_string());
        files.push(lock_dst);
    }

    debug!(
        name = %packet_name,
        version = %packet_version,
        files = files.len(),
        "staged packet layout"
    );

    Ok(ArtifactLayout {
        packet_name,
        packet_version,
        staging_dir,
        files,
        media_types,
        metadata,
    })
}

async fn reset_staging(staging_dir: &Path, packet_dir: &Path) -> RegistryResult<()> {
    if let Ok(existing) = fs::canonicalize(staging_dir).await {
        if packet_dir.starts_with(&existing) {
            return Err(RegistryError::Cache {
                message: format!(
                    "staging directory {} contains the packet being staged",
                    existing.display()
                ),
            });
        }
        fs::remove_dir_all(&existing)
            .await
            .map_err(|e| RegistryError::cache("failed to clear staging directory", e))?;
    }
    fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| RegistryError::cache("failed to create staging directory", e))
}

/// Packet name and version from the manifest, the descriptor, or the directory names.
pub(crate) async fn packet_identity(packet_dir: &Path, manifest: &Value) -> RegistryResult<(String, String)> {
    let descriptor: Value = match fs::read_to_string(packet_dir.join(DESCRIPTOR_FILE)).await {
        Ok(text) => serde_yaml::from_str(&text).unwrap_or(Value::Null),
        Err(_) => Value::Null,
    };
    let cpm = manifest.get("cpm");

    let dir_name = |p: Option<&Path>| {
        p.and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned())
    };

    let name = [
        cpm.and_then(|c| c.get("name")),
        manifest.get("packet_id"),
        descriptor.get("name"),
    ]
    .into_iter()
    .find_map(scalar_text)
    .or_else(|| dir_name(packet_dir.parent()));

    let version = [cpm.and_then(|c| c.get("version")), descriptor.get("version")]
        .into_iter()
        .find_map(scalar_text)
        .or_else(|| dir_name(Some(packet_dir)));

    match (name, version) {
        (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => Ok((name, version)),
        _ => Err(RegistryError::locator(
            packet_dir.display().to_string(),
            "packet name/version are required to build an artifact layout",
        )),
    }
}

fn scalar_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}
