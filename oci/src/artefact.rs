//! Fetched artefact layers.
//!
//! An [`ArtefactInfo`] describes one layer selected from a fetched index or
//! image. Its bytes stay in the registry until they are asked for; every
//! retrieval is checked against the layer digest.

use std::fmt;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use flate2::read::GzDecoder;
use tape_core::attest::Statement;
use tape_core::error::{Result, Stage, TapeError};
use tar::Archive;

use crate::attestation::decode_attestations;
use crate::digest;
use crate::manifest::{Annotations, Descriptor};
use crate::media_type::MediaType;
use crate::reference::ImageReference;
use crate::registry::Registry;

/// One layer of a fetched artefact.
#[derive(Clone)]
pub struct ArtefactInfo {
    media_type: MediaType,
    annotations: Annotations,
    descriptor: Descriptor,
    repository: ImageReference,
    registry: Arc<dyn Registry>,
}

impl ArtefactInfo {
    pub(crate) fn new(
        registry: Arc<dyn Registry>,
        repository: ImageReference,
        descriptor: Descriptor,
        annotations: Annotations,
    ) -> Self {
        Self {
            media_type: descriptor.blob_media_type(),
            annotations,
            descriptor,
            repository,
            registry,
        }
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Annotations of the manifest the layer belongs to.
    pub fn annotations(&self) -> &Annotations {
        &self.annotations
    }

    pub fn digest(&self) -> &str {
        &self.descriptor.digest
    }

    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Retrieve the layer and verify its digest.
    pub async fn bytes(&self) -> Result<Vec<u8>> {
        let data = self
            .registry
            .pull_blob(&self.repository, &self.descriptor)
            .await
            .map_err(|e| {
                TapeError::wrap(
                    Stage::Fetch,
                    format!("fetching layer {} failed", self.descriptor.digest),
                    e,
                )
            })?;
        digest::verify(&self.descriptor.digest, &data)?;
        tracing::debug!(digest = %self.descriptor.digest, size = data.len(), "Fetched layer");
        Ok(data)
    }

    /// Retrieve the layer and return a reader over its bytes.
    pub async fn open(&self) -> Result<impl Read + Send + 'static> {
        Ok(Cursor::new(self.bytes().await?))
    }

    /// Extract a content layer into `target_dir`.
    pub async fn unpack(&self, target_dir: &Path) -> Result<()> {
        self.expect_media_type(MediaType::Content)?;
        unpack_content(self.open().await?, target_dir)
    }

    /// Decode an attestation layer into statements.
    pub async fn statements(&self) -> Result<Vec<Statement>> {
        self.expect_media_type(MediaType::Attest)?;
        decode_attestations(self.open().await?)
    }

    fn expect_media_type(&self, expected: MediaType) -> Result<()> {
        if self.media_type != expected {
            return Err(TapeError::MediaTypeMismatch {
                manifest: expected.to_string(),
                layer: self.media_type.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ArtefactInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtefactInfo")
            .field("media_type", &self.media_type)
            .field("annotations", &self.annotations)
            .field("digest", &self.descriptor.digest)
            .field("repository", &self.repository.repository_name())
            .finish_non_exhaustive()
    }
}

/// Extract a tar+gzip content stream into `target_dir`, creating it if
/// needed.
pub fn unpack_content<R: Read>(reader: R, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir).map_err(|e| {
        TapeError::wrap(
            Stage::Fetch,
            format!("creating target directory {}", target_dir.display()),
            e,
        )
    })?;

    let mut archive = Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(true);
    archive.unpack(target_dir).map_err(|e| {
        TapeError::wrap(
            Stage::Fetch,
            format!("extracting content to {}", target_dir.display()),
            e,
        )
    })?;

    tracing::debug!(target = %target_dir.display(), "Extracted content layer");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::build_artefact;
    use crate::memory::MemoryRegistry;
    use std::fs;
    use tempfile::TempDir;

    fn repo() -> ImageReference {
        ImageReference::parse_repository("localhost:5000/manifests").unwrap()
    }

    fn stored_layer(registry: &Arc<MemoryRegistry>, data: &[u8], media_type: &MediaType) -> ArtefactInfo {
        let digest = digest::sha256_digest(data);
        registry.put_blob(&repo(), &digest, data.to_vec());
        ArtefactInfo::new(
            registry.clone(),
            repo(),
            Descriptor::new(media_type.as_str(), digest, data.len() as u64),
            Annotations::new(),
        )
    }

    #[tokio::test]
    async fn test_bytes_verifies_digest() {
        let registry = Arc::new(MemoryRegistry::new());
        let layer = stored_layer(&registry, b"payload", &MediaType::Content);
        assert_eq!(layer.bytes().await.unwrap(), b"payload");

        registry.put_blob(&repo(), layer.digest(), b"tampered".to_vec());
        let err = layer.bytes().await.unwrap_err();
        assert!(matches!(err, TapeError::DigestMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unpack_content_layer() {
        let source = TempDir::new().unwrap();
        fs::create_dir(source.path().join("app")).unwrap();
        fs::write(source.path().join("app/deployment.yaml"), "kind: Deployment\n").unwrap();
        let blob = build_artefact(source.path(), Vec::new()).unwrap();

        let registry = Arc::new(MemoryRegistry::new());
        let layer = stored_layer(&registry, &blob, &MediaType::Content);

        let target = TempDir::new().unwrap();
        let out = target.path().join("out");
        layer.unpack(&out).await.unwrap();
        assert_eq!(
            fs::read_to_string(out.join("app/deployment.yaml")).unwrap(),
            "kind: Deployment\n"
        );
    }

    #[tokio::test]
    async fn test_statements_rejects_content_layer() {
        let registry = Arc::new(MemoryRegistry::new());
        let layer = stored_layer(&registry, b"payload", &MediaType::Content);
        let err = layer.statements().await.unwrap_err();
        assert!(matches!(err, TapeError::MediaTypeMismatch { .. }));
    }

    #[test]
    fn test_unpack_content_rejects_garbage() {
        let target = TempDir::new().unwrap();
        let err = unpack_content(&b"not a gzip stream"[..], target.path()).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Fetch));
    }
}
