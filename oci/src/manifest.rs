//! OCI object graph: descriptors, image manifests and image indexes.
//!
//! Objects are serialised once with [`Manifest::encode`] / [`Index::encode`];
//! the digest is computed over exactly the bytes that are pushed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tape_core::error::{Result, Stage, TapeError};

use crate::digest::sha256_digest;
use crate::media_type::{MediaType, OCI_INDEX_MEDIA_TYPE, OCI_MANIFEST_MEDIA_TYPE};

/// Annotations are kept sorted so that encoding is stable.
pub type Annotations = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// A content-addressable descriptor used in both manifests and indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,

    pub digest: String,

    pub size: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl Descriptor {
    /// Create a descriptor for a blob.
    pub fn new(media_type: impl Into<String>, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.into(),
            digest: digest.into(),
            size,
            artifact_type: None,
            annotations: None,
            platform: None,
        }
    }

    /// Media type of the described blob.
    pub fn blob_media_type(&self) -> MediaType {
        MediaType::from(self.media_type.as_str())
    }

    /// Artifact type of the described manifest, if any.
    pub fn artifact_media_type(&self) -> Option<MediaType> {
        self.artifact_type.as_deref().map(MediaType::from)
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Target platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl Platform {
    /// The `unknown/unknown` platform used for non-runnable artefacts.
    pub fn unknown() -> Self {
        Self {
            architecture: "unknown".to_string(),
            os: "unknown".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Image Manifest
// ---------------------------------------------------------------------------

/// An OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    pub config: Descriptor,

    #[serde(default)]
    pub layers: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Manifest {
    /// Start building an OCI manifest around a config descriptor.
    pub fn builder(config: Descriptor) -> ManifestBuilder {
        ManifestBuilder {
            config,
            artifact_type: None,
            layers: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TapeError::wrap(Stage::Fetch, "parsing image manifest failed", e))
    }

    /// Serialise the manifest and compute its digest.
    pub fn encode(&self) -> Result<Encoded> {
        Encoded::new(self, OCI_MANIFEST_MEDIA_TYPE)
    }

    /// Artifact type, falling back to the config media type.
    pub fn effective_artifact_type(&self) -> MediaType {
        match self.artifact_type {
            Some(ref t) => MediaType::from(t.as_str()),
            None => self.config.blob_media_type(),
        }
    }

    pub fn annotations(&self) -> Annotations {
        self.annotations.clone().unwrap_or_default()
    }
}

/// Builder for a single-purpose artefact manifest.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    config: Descriptor,
    artifact_type: Option<String>,
    layers: Vec<Descriptor>,
    annotations: Annotations,
}

impl ManifestBuilder {
    pub fn artifact_type(mut self, media_type: &MediaType) -> Self {
        self.artifact_type = Some(media_type.as_str().to_string());
        self
    }

    pub fn layer(mut self, layer: Descriptor) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn annotations(mut self, annotations: Annotations) -> Self {
        self.annotations.extend(annotations);
        self
    }

    pub fn annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Manifest {
        Manifest {
            schema_version: 2,
            media_type: Some(OCI_MANIFEST_MEDIA_TYPE.to_string()),
            artifact_type: self.artifact_type,
            config: self.config,
            layers: self.layers,
            annotations: non_empty(self.annotations),
        }
    }
}

// ---------------------------------------------------------------------------
// Image Index
// ---------------------------------------------------------------------------

/// An OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub schema_version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

impl Index {
    pub fn builder() -> IndexBuilder {
        IndexBuilder::default()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| TapeError::wrap(Stage::Fetch, "parsing image index failed", e))
    }

    /// Serialise the index and compute its digest.
    pub fn encode(&self) -> Result<Encoded> {
        Encoded::new(self, OCI_INDEX_MEDIA_TYPE)
    }
}

/// Builder for an artefact index.
///
/// Each manifest is added together with its encoded form so the index
/// descriptor points at the exact bytes that get pushed.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    manifests: Vec<Descriptor>,
    annotations: Annotations,
}

impl IndexBuilder {
    pub fn annotations(mut self, annotations: Annotations) -> Self {
        self.annotations.extend(annotations);
        self
    }

    /// Add a manifest entry with the `unknown/unknown` platform.
    pub fn manifest(mut self, manifest: &Manifest, encoded: &Encoded) -> Self {
        let mut descriptor = encoded.descriptor();
        descriptor.artifact_type = manifest.artifact_type.clone();
        descriptor.platform = Some(Platform::unknown());
        self.manifests.push(descriptor);
        self
    }

    pub fn build(self) -> Index {
        Index {
            schema_version: 2,
            media_type: Some(OCI_INDEX_MEDIA_TYPE.to_string()),
            manifests: self.manifests,
            annotations: non_empty(self.annotations),
        }
    }
}

fn non_empty(annotations: Annotations) -> Option<Annotations> {
    if annotations.is_empty() {
        None
    } else {
        Some(annotations)
    }
}

// ---------------------------------------------------------------------------
// Encoded form
// ---------------------------------------------------------------------------

/// Serialised manifest or index with its digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub digest: String,
    pub media_type: &'static str,
}

impl Encoded {
    fn new<T: Serialize>(value: &T, media_type: &'static str) -> Result<Self> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| TapeError::wrap(Stage::Digest, format!("encoding {} failed", media_type), e))?;
        let digest = sha256_digest(&bytes);
        Ok(Self {
            bytes,
            digest,
            media_type,
        })
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Descriptor pointing at these bytes.
    pub fn descriptor(&self) -> Descriptor {
        Descriptor::new(self.media_type, self.digest.clone(), self.size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media_type::{CONTENT_MEDIA_TYPE, CREATED_ANNOTATION};

    fn content_manifest() -> Manifest {
        Manifest::builder(Descriptor::new(CONTENT_MEDIA_TYPE, sha256_digest(b"{}"), 2))
            .artifact_type(&MediaType::Content)
            .layer(Descriptor::new(CONTENT_MEDIA_TYPE, "sha256:aa", 10))
            .annotation(CREATED_ANNOTATION, "2024-06-01T12:00:00Z")
            .build()
    }

    #[test]
    fn test_manifest_wire_form() {
        let value = serde_json::to_value(content_manifest()).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], OCI_MANIFEST_MEDIA_TYPE);
        assert_eq!(value["artifactType"], CONTENT_MEDIA_TYPE);
        assert_eq!(value["config"]["mediaType"], CONTENT_MEDIA_TYPE);
        assert_eq!(value["layers"][0]["digest"], "sha256:aa");
        assert_eq!(value["annotations"][CREATED_ANNOTATION], "2024-06-01T12:00:00Z");
        assert!(value["config"].get("platform").is_none());
    }

    #[test]
    fn test_encode_digest_matches_bytes() {
        let encoded = content_manifest().encode().unwrap();
        assert_eq!(encoded.digest, sha256_digest(&encoded.bytes));
        assert_eq!(Manifest::from_slice(&encoded.bytes).unwrap(), content_manifest());
        assert_eq!(encoded, content_manifest().encode().unwrap());
    }

    #[test]
    fn test_index_entries_carry_platform_and_artifact_type() {
        let manifest = content_manifest();
        let encoded = manifest.encode().unwrap();
        let index = Index::builder().manifest(&manifest, &encoded).build();

        assert_eq!(index.manifests.len(), 1);
        let entry = &index.manifests[0];
        assert_eq!(entry.digest, encoded.digest);
        assert_eq!(entry.size, encoded.size());
        assert_eq!(entry.media_type, OCI_MANIFEST_MEDIA_TYPE);
        assert_eq!(entry.artifact_media_type(), Some(MediaType::Content));
        assert_eq!(entry.platform, Some(Platform::unknown()));
        assert!(index.annotations.is_none());
    }

    #[test]
    fn test_effective_artifact_type_falls_back_to_config() {
        let raw = br#"{
            "schemaVersion": 2,
            "config": {"mediaType": "application/vnd.docker.tape.content.v1alpha1.tar+gzip", "digest": "sha256:00", "size": 2},
            "layers": []
        }"#;
        let manifest = Manifest::from_slice(raw).unwrap();
        assert_eq!(manifest.effective_artifact_type(), MediaType::Content);
        assert!(manifest.annotations().is_empty());
    }
}
