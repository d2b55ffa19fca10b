//! Media types and annotation keys of tape artefacts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Vendor prefix shared by every tape media type and annotation.
pub const MEDIA_TYPE_PREFIX: &str = "application/vnd.docker.tape";

pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.tape.config.v1alpha1+json";
pub const CONTENT_MEDIA_TYPE: &str = "application/vnd.docker.tape.content.v1alpha1.tar+gzip";
pub const ATTEST_MEDIA_TYPE: &str = "application/vnd.docker.tape.attest.v1alpha1.jsonl+gzip";

/// Annotation telling consumers how to apply the unpacked content.
pub const CONTENT_INTERPRETER_ANNOTATION: &str =
    "application/vnd.docker.tape.content-interpreter.v1alpha1";

/// Content interpreter value: apply the manifests as they are.
pub const CONTENT_INTERPRETER_KUBECTL_APPLY: &str =
    "application/vnd.docker.tape.kubectl-apply.v1alpha1.tar+gzip";

/// Annotation holding a compact summary of attached statements.
pub const ATTESTATIONS_SUMMARY_ANNOTATION: &str =
    "application/vnd.docker.tape.attestations-summary.v1alpha1";

/// Standard OCI creation timestamp annotation.
pub const CREATED_ANNOTATION: &str = "org.opencontainers.image.created";

pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
pub const DOCKER_MANIFEST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// Media type of a layer or artefact.
///
/// The tape vocabulary is closed; anything else read from a registry is kept
/// verbatim in `Other` so it can be reported rather than rejected on parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaType {
    Config,
    Content,
    Attest,
    Other(String),
}

impl MediaType {
    pub fn as_str(&self) -> &str {
        match self {
            MediaType::Config => CONFIG_MEDIA_TYPE,
            MediaType::Content => CONTENT_MEDIA_TYPE,
            MediaType::Attest => ATTEST_MEDIA_TYPE,
            MediaType::Other(s) => s,
        }
    }

    /// Whether this is one of the tape media types.
    pub fn is_tape(&self) -> bool {
        !matches!(self, MediaType::Other(_))
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        match s {
            CONFIG_MEDIA_TYPE => MediaType::Config,
            CONTENT_MEDIA_TYPE => MediaType::Content,
            ATTEST_MEDIA_TYPE => MediaType::Attest,
            other => MediaType::Other(other.to_string()),
        }
    }
}

impl FromStr for MediaType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(MediaType::from(s))
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(MediaType::from(s.as_str()))
    }
}

/// Returns `true` when `media_type` is an image index / manifest list.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type == OCI_INDEX_MEDIA_TYPE || media_type == DOCKER_MANIFEST_LIST_MEDIA_TYPE
}

/// Returns `true` when `media_type` is a single image manifest.
pub fn is_manifest_media_type(media_type: &str) -> bool {
    media_type == OCI_MANIFEST_MEDIA_TYPE || media_type == DOCKER_MANIFEST_MEDIA_TYPE
}
