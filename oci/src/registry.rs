//! Registry capability used by the packaging client.
//!
//! [`Registry`] is the narrow set of distribution operations the client
//! needs. [`OciDistributionRegistry`] implements it on top of the
//! `oci-distribution` crate; manifests are pushed as raw bytes so the digest
//! the client computed is the digest the registry stores.

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use tape_core::error::{Result, TapeError};

use crate::manifest::{Descriptor, Encoded};
use crate::media_type::{
    is_index_media_type, DOCKER_MANIFEST_MEDIA_TYPE, OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
};
use crate::reference::ImageReference;

/// Environment variable holding the registry username.
pub const REGISTRY_USERNAME_ENV: &str = "TAPE_REGISTRY_USERNAME";
/// Environment variable holding the registry password or token.
pub const REGISTRY_PASSWORD_ENV: &str = "TAPE_REGISTRY_PASSWORD";

/// Manifest media types accepted on pull.
pub const ACCEPTED_MANIFEST_TYPES: &[&str] = &[
    OCI_INDEX_MEDIA_TYPE,
    OCI_MANIFEST_MEDIA_TYPE,
    crate::media_type::DOCKER_MANIFEST_LIST_MEDIA_TYPE,
    DOCKER_MANIFEST_MEDIA_TYPE,
];

/// A manifest or index as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulledManifest {
    pub bytes: Vec<u8>,
    pub media_type: String,
    pub digest: String,
}

impl PulledManifest {
    pub fn is_index(&self) -> bool {
        is_index_media_type(&self.media_type)
    }
}

/// Distribution operations needed to push and fetch artefacts.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Upload a blob into the repository of `repository`.
    async fn push_blob(&self, repository: &ImageReference, digest: &str, data: &[u8]) -> Result<()>;

    /// Store a manifest or index under the tag or digest of `reference`.
    async fn push_manifest(&self, reference: &ImageReference, manifest: &Encoded) -> Result<()>;

    /// Point an additional tag at an already pushed manifest.
    async fn tag_manifest(&self, tag: &ImageReference, manifest: &Encoded) -> Result<()> {
        self.push_manifest(tag, manifest).await
    }

    /// Retrieve a manifest or index by tag or digest.
    async fn pull_manifest(&self, reference: &ImageReference) -> Result<PulledManifest>;

    /// Retrieve a blob described by `descriptor` from the repository of
    /// `repository`.
    async fn pull_blob(&self, repository: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>>;
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from `TAPE_REGISTRY_USERNAME` and
    /// `TAPE_REGISTRY_PASSWORD`, falling back to anonymous.
    pub fn from_env() -> Self {
        let username = std::env::var(REGISTRY_USERNAME_ENV).ok();
        let password = std::env::var(REGISTRY_PASSWORD_ENV).ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Network registry backed by `oci-distribution`.
pub struct OciDistributionRegistry {
    client: Client,
    auth: RegistryAuth,
}

impl OciDistributionRegistry {
    /// Create a registry client speaking HTTPS to every registry except the
    /// listed insecure ones.
    pub fn new(auth: RegistryAuth, insecure_registries: &[String]) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries.to_vec())
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    async fn authenticate(
        &self,
        oci_ref: &Reference,
        registry: &str,
        operation: RegistryOperation,
    ) -> Result<()> {
        self.client
            .auth(oci_ref, &self.auth.to_oci_auth(), operation)
            .await
            .map(|_| ())
            .map_err(|e| registry_error(registry, format!("Authentication failed: {}", e)))
    }
}

#[async_trait]
impl Registry for OciDistributionRegistry {
    async fn push_blob(&self, repository: &ImageReference, digest: &str, data: &[u8]) -> Result<()> {
        let oci_ref = to_oci_reference(repository)?;
        self.authenticate(&oci_ref, &repository.registry, RegistryOperation::Push)
            .await?;

        tracing::debug!(digest = %digest, size = data.len(), "Pushing blob");
        self.client
            .push_blob(&oci_ref, data, digest)
            .await
            .map(|_| ())
            .map_err(|e| {
                registry_error(
                    &repository.registry,
                    format!("Failed to push blob {}: {}", digest, e),
                )
            })
    }

    async fn push_manifest(&self, reference: &ImageReference, manifest: &Encoded) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        self.authenticate(&oci_ref, &reference.registry, RegistryOperation::Push)
            .await?;

        let content_type = manifest.media_type.parse().map_err(|_| {
            registry_error(
                &reference.registry,
                format!("Invalid content type '{}'", manifest.media_type),
            )
        })?;

        tracing::debug!(reference = %reference, digest = %manifest.digest, "Pushing manifest");
        self.client
            .push_manifest_raw(&oci_ref, manifest.bytes.clone(), content_type)
            .await
            .map(|_| ())
            .map_err(|e| {
                registry_error(
                    &reference.registry,
                    format!("Failed to push manifest to {}: {}", reference, e),
                )
            })
    }

    async fn pull_manifest(&self, reference: &ImageReference) -> Result<PulledManifest> {
        let oci_ref = to_oci_reference(reference)?;

        let (bytes, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.auth.to_oci_auth(), ACCEPTED_MANIFEST_TYPES)
            .await
            .map_err(|e| {
                registry_error(
                    &reference.registry,
                    format!("Failed to pull manifest {}: {}", reference, e),
                )
            })?;

        let media_type = sniff_media_type(&bytes);
        Ok(PulledManifest {
            bytes,
            media_type,
            digest,
        })
    }

    async fn pull_blob(&self, repository: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let oci_ref = to_oci_reference(repository)?;
        self.authenticate(&oci_ref, &repository.registry, RegistryOperation::Pull)
            .await?;

        let layer = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.clone(),
            size: descriptor.size as i64,
            ..Default::default()
        };
        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &layer, &mut data)
            .await
            .map_err(|e| {
                registry_error(
                    &repository.registry,
                    format!("Failed to pull blob {}: {}", descriptor.digest, e),
                )
            })?;
        Ok(data)
    }
}

fn registry_error(registry: &str, message: String) -> TapeError {
    TapeError::Registry {
        registry: registry.to_string(),
        message,
    }
}

/// Media type of a raw manifest, read from its `mediaType` field or inferred
/// from its shape when the field is absent.
pub fn sniff_media_type(bytes: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Probe {
        media_type: Option<String>,
        manifests: Option<serde_json::Value>,
    }

    match serde_json::from_slice::<Probe>(bytes) {
        Ok(Probe {
            media_type: Some(media_type),
            ..
        }) => media_type,
        Ok(Probe {
            manifests: Some(_), ..
        }) => OCI_INDEX_MEDIA_TYPE.to_string(),
        _ => OCI_MANIFEST_MEDIA_TYPE.to_string(),
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
///
/// Blob operations only need the repository; a bare repository is given the
/// `latest` tag to satisfy the reference grammar.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = if let Some(ref digest) = reference.digest {
        format!("{}@{}", reference.repository_name(), digest)
    } else if let Some(ref tag) = reference.tag {
        format!("{}:{}", reference.repository_name(), tag)
    } else {
        format!("{}:latest", reference.repository_name())
    };

    ref_str.parse::<Reference>().map_err(|e| TapeError::InvalidReference {
        reference: ref_str.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_auth_anonymous() {
        let auth = RegistryAuth::anonymous();
        assert!(auth.is_anonymous());
        assert!(matches!(auth.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_registry_auth_basic() {
        let auth = RegistryAuth::basic("user", "pass");
        assert!(!auth.is_anonymous());
        match auth.to_oci_auth() {
            OciRegistryAuth::Basic(u, p) => {
                assert_eq!(u, "user");
                assert_eq!(p, "pass");
            }
            _ => panic!("Expected Basic auth"),
        }
    }

    #[test]
    fn test_to_oci_reference() {
        let repo = ImageReference::parse_repository("ghcr.io/org/manifests").unwrap();
        let r = to_oci_reference(&repo).unwrap();
        assert_eq!(r.registry(), "ghcr.io");
        assert_eq!(r.repository(), "org/manifests");
        assert_eq!(r.tag(), Some("latest"));

        let tagged = repo.with_tag("config.abc").unwrap();
        assert_eq!(to_oci_reference(&tagged).unwrap().tag(), Some("config.abc"));

        let digest = format!("sha256:{}", "a".repeat(64));
        let pinned = repo.with_digest(digest.clone());
        assert_eq!(
            to_oci_reference(&pinned).unwrap().digest(),
            Some(digest.as_str())
        );
    }

    #[test]
    fn test_sniff_media_type() {
        assert_eq!(
            sniff_media_type(br#"{"schemaVersion":2,"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#),
            DOCKER_MANIFEST_MEDIA_TYPE
        );
        assert_eq!(
            sniff_media_type(br#"{"schemaVersion":2,"manifests":[]}"#),
            OCI_INDEX_MEDIA_TYPE
        );
        assert_eq!(
            sniff_media_type(br#"{"schemaVersion":2,"layers":[]}"#),
            OCI_MANIFEST_MEDIA_TYPE
        );
    }

    #[test]
    fn test_pulled_manifest_is_index() {
        let pulled = PulledManifest {
            bytes: Vec::new(),
            media_type: OCI_INDEX_MEDIA_TYPE.to_string(),
            digest: "sha256:00".to_string(),
        };
        assert!(pulled.is_index());
    }
}
