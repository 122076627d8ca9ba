//! Packet metadata document embedded in every published artifact.
//!
//! # Shapes
//!
//! | Schema tag | Handling |
//! |------------|----------|
//! | `cpm.packet.metadata` / `1.0` | current, validated as-is |
//! | `cpm-oci/v1` | legacy, normalized into the current shape on read |
//!
//! Normalization happens once, in [`PacketMetadata::from_value`]. Everything
//! downstream sees only [`PacketMetadata`].
//!
//! Only identity and the payload file list are validated. Descriptive and
//! compatibility fields are carried verbatim, whatever their JSON shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{RegistryError, RegistryResult};

pub const PACKET_METADATA_SCHEMA: &str = "cpm.packet.metadata";
pub const PACKET_METADATA_SCHEMA_VERSION: &str = "1.0";

/// Schema tag of documents written by older publishers.
pub const LEGACY_OCI_SCHEMA: &str = "cpm-oci/v1";

/// Payload directory inside a pulled artifact unless a document says otherwise.
pub const DEFAULT_PAYLOAD_ROOT: &str = "payload";

/// Current-schema packet metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub schema: String,
    pub schema_version: String,
    pub packet: PacketInfo,
    pub payload: PayloadInfo,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub compat: Option<Compat>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub source: Option<SourceInfo>,

    /// Full producing manifest, when the publisher chose to embed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_manifest: Option<Value>,
}

/// Packet identity and descriptive fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketInfo {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<Value>,

    /// Usually a list of strings; publishers also write a single string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<Value>,

    /// Plain names, structured objects, or a comma-separated string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoints: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadInfo {
    pub files: Vec<PayloadFile>,

    /// Reference of the full artifact, when metadata is published separately.
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub full_ref: Option<String>,

    /// Payload directory inside the artifact, when not [`DEFAULT_PAYLOAD_ROOT`].
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub root: Option<String>,
}

/// One payload file, relative to the payload root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadFile {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "lenient")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "cpm_min_version")]
    pub min_version: Option<Value>,
}

impl Compat {
    fn is_empty(&self) -> bool {
        self.os.is_none() && self.arch.is_none() && self.min_version.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_digest: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildOptions>,
}

/// Typed optional field that reads as `None` when the stored shape differs.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Which optional payload categories a build included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default)]
    pub include_embeddings: bool,
    #[serde(default)]
    pub include_docs: bool,
    #[serde(default)]
    pub minimal: bool,
}

/// Validate a raw document against the current schema.
///
/// Checks run in a fixed order and the first violation is reported.
pub fn validate_document(document: &Value) -> RegistryResult<()> {
    let non_empty = |v: Option<&Value>| v.and_then(Value::as_str).is_some_and(|s| !s.trim().is_empty());

    if document.get("schema").and_then(Value::as_str) != Some(PACKET_METADATA_SCHEMA) {
        return Err(RegistryError::metadata("invalid metadata schema"));
    }
    if document.get("schema_version").and_then(Value::as_str) != Some(PACKET_METADATA_SCHEMA_VERSION) {
        return Err(RegistryError::metadata("unsupported metadata schema_version"));
    }

    let packet = document
        .get("packet")
        .and_then(Value::as_object)
        .ok_or_else(|| RegistryError::metadata("metadata.packet must be an object"))?;
    if !non_empty(packet.get("name")) {
        return Err(RegistryError::metadata("metadata.packet.name is required"));
    }
    if !non_empty(packet.get("version")) {
        return Err(RegistryError::metadata("metadata.packet.version is required"));
    }

    let payload = document
        .get("payload")
        .and_then(Value::as_object)
        .ok_or_else(|| RegistryError::metadata("metadata.payload must be an object"))?;
    let files = payload
        .get("files")
        .and_then(Value::as_array)
        .ok_or_else(|| RegistryError::metadata("metadata.payload.files must be a list"))?;

    for entry in files {
        let entry = entry
            .as_object()
            .ok_or_else(|| RegistryError::metadata("metadata.payload.files entries must be objects"))?;
        if !non_empty(entry.get("name")) {
            return Err(RegistryError::metadata("metadata.payload.files[].name is required"));
        }
    }

    Ok(())
}

/// A metadata document as found in a registry, tagged by shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataDocument {
    /// Current schema (or unknown; validation decides).
    Current(Value),

    /// `cpm-oci/v1` document.
    LegacyOciV1(LegacyOciManifest),
}

/// Legacy `cpm-oci/v1` document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyOciManifest {
    #[serde(default)]
    pub packet: LegacyPacket,

    #[serde(default)]
    pub source_manifest: Option<Value>,

    #[serde(default)]
    pub payload_root: Option<String>,

    #[serde(default)]
    pub payload: Option<Value>,

    #[serde(default)]
    pub options: Option<LegacyOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyPacket {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LegacyOptions {
    #[serde(default)]
    pub include_embeddings: Option<bool>,
}

impl MetadataDocument {
    /// Tag a raw document by its schema id.
    pub fn detect(document: Value) -> RegistryResult<Self> {
        if document.get("schema").and_then(Value::as_str) == Some(LEGACY_OCI_SCHEMA) {
            let legacy = serde_json::from_value(document).map_err(|e| {
                RegistryError::metadata(format!("malformed {} document: {}", LEGACY_OCI_SCHEMA, e))
            })?;
            return Ok(Self::LegacyOciV1(legacy));
        }
        Ok(Self::Current(document))
    }

    /// Map into the current schema. Name and version are carried over;
    /// payload files default to an empty list when none are recoverable.
    pub fn into_current(self) -> Value {
        match self {
            Self::Current(value) => value,
            Self::LegacyOciV1(legacy) => normalize_legacy(legacy),
        }
    }
}

fn normalize_legacy(legacy: LegacyOciManifest) -> Value {
    let empty = Value::Object(Map::new());
    let source_manifest = legacy.source_manifest.as_ref().unwrap_or(&empty);

    let files: Vec<PayloadFile> = legacy
        .payload
        .as_ref()
        .and_then(|p| p.get("files"))
        .and_then(|f| serde_json::from_value(f.clone()).ok())
        .unwrap_or_default();

    let build = legacy
        .options
        .as_ref()
        .and_then(|o| o.include_embeddings)
        .map(|include_embeddings| BuildOptions {
            include_embeddings,
            include_docs: true,
            minimal: false,
        });

    let metadata = PacketMetadata {
        schema: PACKET_METADATA_SCHEMA.to_string(),
        schema_version: PACKET_METADATA_SCHEMA_VERSION.to_string(),
        packet: PacketInfo {
            name: legacy.packet.name.unwrap_or_default(),
            version: legacy.packet.version.unwrap_or_default(),
            ..descriptive_fields(source_manifest)
        },
        payload: PayloadInfo {
            files,
            full_ref: None,
            root: legacy
                .payload_root
                .as_deref()
                .map(str::trim)
                .filter(|root| !root.is_empty() && *root != DEFAULT_PAYLOAD_ROOT)
                .map(str::to_string),
        },
        compat: compat_fields(source_manifest),
        source: build.map(|b| SourceInfo {
            manifest_digest: None,
            build: Some(b),
        }),
        source_manifest: legacy.source_manifest,
    };

    serde_json::to_value(metadata).unwrap_or(Value::Null)
}

/// `cpm` section of a producing manifest.
fn cpm_section(source_manifest: &Value) -> Option<&Map<String, Value>> {
    source_manifest.get("cpm").and_then(Value::as_object)
}

/// Non-null value under `key`, copied as-is.
fn present(section: &Map<String, Value>, key: &str) -> Option<Value> {
    section.get(key).filter(|v| !v.is_null()).cloned()
}

/// Optional descriptive fields present in the producing manifest.
fn descriptive_fields(source_manifest: &Value) -> PacketInfo {
    let Some(cpm) = cpm_section(source_manifest) else {
        return PacketInfo::default();
    };
    PacketInfo {
        name: String::new(),
        version: String::new(),
        description: present(cpm, "description"),
        tags: present(cpm, "tags"),
        kind: present(cpm, "kind"),
        entrypoints: present(cpm, "entrypoints"),
        capabilities: present(cpm, "capabilities"),
    }
}

fn compat_fields(source_manifest: &Value) -> Option<Compat> {
    let compat = cpm_section(source_manifest)?
        .get("compat")
        .and_then(Value::as_object)?;
    let fields = Compat {
        os: present(compat, "os"),
        arch: present(compat, "arch"),
        min_version: present(compat, "min_version").or_else(|| present(compat, "cpm_min_version")),
    };
    (!fields.is_empty()).then_some(fields)
}

/// Inputs for composing a metadata document at publish time.
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata {
    pub name: String,
    pub version: String,
    pub source_manifest: Value,
    pub payload_files: Vec<PayloadFile>,
    pub payload_full_ref: Option<String>,
    pub source_manifest_digest: Option<String>,
    pub build_options: Option<BuildOptions>,
    pub include_source_manifest: bool,
}

impl BuildMetadata {
    /// Compose and validate the document.
    pub fn build(self) -> RegistryResult<PacketMetadata> {
        let source = (self.source_manifest_digest.is_some() || self.build_options.is_some()).then(|| {
            SourceInfo {
                manifest_digest: self.source_manifest_digest.clone(),
                build: self.build_options,
            }
        });

        let metadata = PacketMetadata {
            schema: PACKET_METADATA_SCHEMA.to_string(),
            schema_version: PACKET_METADATA_SCHEMA_VERSION.to_string(),
            packet: PacketInfo {
                name: self.name.clone(),
                version: self.version.clone(),
                ..descriptive_fields(&self.source_manifest)
            },
            payload: PayloadInfo {
                files: self.payload_files,
                full_ref: self.payload_full_ref,
                root: None,
            },
            compat: compat_fields(&self.source_manifest),
            source,
            source_manifest: self.include_source_manifest.then_some(self.source_manifest),
        };

        metadata.validate()?;
        Ok(metadata)
    }
}

impl PacketMetadata {
    /// Normalize, validate and type a raw document.
    pub fn from_value(document: Value) -> RegistryResult<Self> {
        let current = MetadataDocument::detect(document)?.into_current();
        validate_document(&current)?;
        serde_json::from_value(current)
            .map_err(|e| RegistryError::metadata(format!("malformed metadata document: {}", e)))
    }

    /// Parse from bytes (a fetched blob or a staged file).
    pub fn from_slice(bytes: &[u8]) -> RegistryResult<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| RegistryError::metadata(format!("metadata is not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> RegistryResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| RegistryError::metadata(format!("failed to serialize metadata: {}", e)))
    }

    /// Validate against the current schema.
    pub fn validate(&self) -> RegistryResult<()> {
        validate_document(&self.to_value()?)
    }

    /// Canonical (RFC 8785, sorted-key, compact) serialization.
    pub fn to_canonical_bytes(&self) -> RegistryResult<Vec<u8>> {
        self.validate()?;
        serde_jcs::to_vec(self)
            .map_err(|e| RegistryError::metadata(format!("failed to canonicalize metadata: {}", e)))
    }

    pub fn name(&self) -> &str {
        &self.packet.name
    }

    pub fn version(&self) -> &str {
        &self.packet.version
    }
}

/// Payload directory named by a normalized document (`payload.root`), else the default.
pub fn payload_root_of(document: &Value) -> &str {
    document
        .pointer("/payload/root")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_PAYLOAD_ROOT)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn valid() -> Value {
        json!({
            "schema": PACKET_METADATA_SCHEMA,
            "schema_version": PACKET_METADATA_SCHEMA_VERSION,
            "packet": {"name": "demo", "version": "1.0.0"},
            "payload": {"files": [{"name": "manifest.json"}]},
        })
    }

    fn expect_violation(document: Value, message: &str) {
        let err = validate_document(&document).unwrap_err();
        assert!(matches!(err, RegistryError::MetadataValidation { .. }));
        assert!(err.to_string().contains(message), "{} not in {}", message, err);
    }

    #[test]
    fn test_valid_document_passes() {
        validate_document(&valid()).unwrap();
    }

    #[test]
    fn test_validation_order() {
        let mut doc = valid();
        doc["schema"] = json!("other");
        doc["packet"] = json!(null);
        expect_violation(doc, "invalid metadata schema");

        let mut doc = valid();
        doc["schema_version"] = json!("2.0");
        expect_violation(doc, "schema_version");

        let mut doc = valid();
        doc["packet"] = json!([]);
        expect_violation(doc, "metadata.packet must be an object");

        let mut doc = valid();
        doc["packet"]["name"] = json!("  ");
        doc["packet"]["version"] = json!("");
        expect_violation(doc, "metadata.packet.name is required");

        let mut doc = valid();
        doc["packet"]["version"] = json!("");
        expect_violation(doc, "metadata.packet.version is required");

        let mut doc = valid();
        doc["payload"] = json!("files");
        expect_violation(doc, "metadata.payload must be an object");

        let mut doc = valid();
        doc["payload"]["files"] = json!({});
        expect_violation(doc, "metadata.payload.files must be a list");

        let mut doc = valid();
        doc["payload"]["files"] = json!(["manifest.json"]);
        expect_violation(doc, "entries must be objects");

        let mut doc = valid();
        doc["payload"]["files"] = json!([{"name": ""}]);
        expect_violation(doc, "metadata.payload.files[].name is required");
    }

    #[test]
    fn test_build_copies_present_descriptive_fields_only() {
        let manifest = json!({
            "packet_id": "demo",
            "cpm": {
                "name": "demo",
                "version": "1.0.0",
                "description": "Demo packet",
                "entrypoints": ["query"],
                "kind": null,
                "compat": {"os": ["linux"], "cpm_min_version": "0.9"}
            }
        });
        let metadata = BuildMetadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            source_manifest: manifest,
            payload_files: vec![PayloadFile {
                name: "cpm.yml".to_string(),
                digest: Some(format!("sha256:{}", "c".repeat(64))),
                size: Some(12),
            }],
            source_manifest_digest: Some(format!("sha256:{}", "d".repeat(64))),
            build_options: Some(BuildOptions {
                include_embeddings: true,
                include_docs: true,
                minimal: false,
            }),
            ..Default::default()
        }
        .build()
        .unwrap();

        assert_eq!(metadata.packet.description, Some(json!("Demo packet")));
        assert_eq!(metadata.packet.kind, None);
        assert_eq!(metadata.packet.entrypoints, Some(json!(["query"])));
        let compat = metadata.compat.as_ref().unwrap();
        assert_eq!(compat.min_version, Some(json!("0.9")));
        assert_eq!(compat.arch, None);
        assert!(metadata.source_manifest.is_none());

        let value = metadata.to_value().unwrap();
        assert!(value["packet"].get("kind").is_none());
        assert_eq!(value["source"]["build"]["include_docs"], json!(true));
    }

    #[test]
    fn test_build_then_validate_roundtrip() {
        let metadata = BuildMetadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            source_manifest: json!({"cpm": {"name": "demo", "version": "1.0.0"}}),
            include_source_manifest: true,
            ..Default::default()
        }
        .build()
        .unwrap();

        let bytes = metadata.to_canonical_bytes().unwrap();
        let reparsed = PacketMetadata::from_slice(&bytes).unwrap();
        assert_eq!(reparsed, metadata);
        assert!(reparsed.source_manifest.is_some());
    }

    #[test]
    fn test_build_rejects_missing_identity() {
        let err = BuildMetadata {
            name: "demo".to_string(),
            ..Default::default()
        }
        .build()
        .unwrap_err();
        assert!(err.to_string().contains("metadata.packet.version is required"));
    }

    #[test]
    fn test_canonical_bytes_are_sorted_and_compact() {
        let metadata = PacketMetadata::from_value(valid()).unwrap();
        let text = String::from_utf8(metadata.to_canonical_bytes().unwrap()).unwrap();
        assert!(text.starts_with(r#"{"packet":{"name":"demo","version":"1.0.0"},"payload""#));
        assert!(!text.contains(' '));
    }

    #[test]
    fn test_legacy_document_is_normalized() {
        let legacy = json!({
            "schema": LEGACY_OCI_SCHEMA,
            "packet": {"name": "demo", "version": "1.0.0"},
            "source_manifest": {"cpm": {"name": "demo", "version": "1.0.0", "tags": ["kb"]}},
            "payload_root": "payload",
            "options": {"include_embeddings": false}
        });

        let metadata = PacketMetadata::from_value(legacy).unwrap();
        assert_eq!(metadata.schema, PACKET_METADATA_SCHEMA);
        assert_eq!(metadata.name(), "demo");
        assert_eq!(metadata.version(), "1.0.0");
        assert!(metadata.payload.files.is_empty());
        assert_eq!(metadata.packet.tags, Some(json!(["kb"])));
        assert_eq!(metadata.payload.root, None);
        assert_eq!(
            metadata.source.and_then(|s| s.build).map(|b| b.include_embeddings),
            Some(false)
        );
    }

    #[test]
    fn test_legacy_without_name_fails_validation() {
        let legacy = json!({"schema": LEGACY_OCI_SCHEMA, "packet": {"version": "1.0.0"}});
        let err = PacketMetadata::from_value(legacy).unwrap_err();
        assert!(err.to_string().contains("metadata.packet.name is required"));
    }

    #[test]
    fn test_payload_root_of() {
        assert_eq!(payload_root_of(&json!({"payload": {"root": "data"}})), "data");
        assert_eq!(payload_root_of(&json!({"payload": {"root": " "}})), DEFAULT_PAYLOAD_ROOT);
        assert_eq!(payload_root_of(&json!({"payload_root": "data"})), DEFAULT_PAYLOAD_ROOT);
        assert_eq!(payload_root_of(&valid()), DEFAULT_PAYLOAD_ROOT);
    }

    #[test]
    fn test_legacy_payload_root_moves_into_payload() {
        let legacy = json!({
            "schema": LEGACY_OCI_SCHEMA,
            "packet": {"name": "demo", "version": "1.0.0"},
            "payload_root": "content"
        });

        let current = MetadataDocument::detect(legacy).unwrap().into_current();
        assert!(current.get("payload_root").is_none());
        assert_eq!(payload_root_of(&current), "content");

        let metadata = PacketMetadata::from_value(current).unwrap();
        assert_eq!(metadata.payload.root.as_deref(), Some("content"));
    }

    #[test]
    fn test_free_form_fields_survive_read_and_build() {
        let mut doc = valid();
        doc["packet"]["tags"] = json!("kb");
        doc["packet"]["entrypoints"] = json!("query,search");
        doc["compat"] = json!({"os": "linux"});
        doc["payload"]["files"] = json!([{"name": "docs.jsonl", "size": "12", "digest": 7}]);
        validate_document(&doc).unwrap();

        let metadata = PacketMetadata::from_value(doc).unwrap();
        assert_eq!(metadata.packet.tags, Some(json!("kb")));
        assert_eq!(metadata.packet.entrypoints, Some(json!("query,search")));
        assert_eq!(metadata.compat.as_ref().and_then(|c| c.os.clone()), Some(json!("linux")));
        assert_eq!(metadata.payload.files[0].name, "docs.jsonl");
        assert_eq!(metadata.payload.files[0].size, None);

        let built = BuildMetadata {
            name: "demo".to_string(),
            version: "1.0.0".to_string(),
            source_manifest: json!({
                "cpm": {"tags": "kb", "entrypoints": "query,search", "compat": {"os": "linux"}}
            }),
            ..Default::default()
        }
        .build()
        .unwrap();
        assert_eq!(built.packet.tags, Some(json!("kb")));
        assert_eq!(built.packet.entrypoints, Some(json!("query,search")));
        assert_eq!(built.compat.and_then(|c| c.os), Some(json!("linux")));
    }
}
