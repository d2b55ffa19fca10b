//! Artefact client: packages a manifest directory into an OCI index and
//! pushes it, and fetches artefact layers back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tape_core::attest::{Statement, Statements};
use tape_core::config::ClientConfig;
use tape_core::error::{Result, Stage, TapeError};
use tape_core::package::PackageRefs;

use crate::archive::{write_artefact_file, ArchivedContent};
use crate::artefact::ArtefactInfo;
use crate::attestation::{build_attestations, AttestationLayer};
use crate::digest::{self, sha256_digest};
use crate::manifest::{Annotations, Descriptor, Encoded, Index, Manifest};
use crate::media_type::{
    is_manifest_media_type, MediaType, ATTESTATIONS_SUMMARY_ANNOTATION,
    CONTENT_INTERPRETER_ANNOTATION, CONTENT_INTERPRETER_KUBECTL_APPLY, CREATED_ANNOTATION,
};
use crate::reference::ImageReference;
use crate::registry::{OciDistributionRegistry, Registry, RegistryAuth};
use crate::tags::{semver_tags_from_attestations, ContentTags};

/// File name of the content blob inside the per-push temp dir.
const CONTENT_FILE_NAME: &str = "artefact.tgz";

/// Config blob shared by every manifest.
const EMPTY_CONFIG: &[u8] = b"{}";

/// A manifest reference resolved to either an index or a single image.
#[derive(Debug, Clone)]
pub enum IndexOrImage {
    Index {
        reference: ImageReference,
        digest: String,
        index: Index,
    },
    Image {
        reference: ImageReference,
        digest: String,
        manifest: Manifest,
    },
}

impl IndexOrImage {
    pub fn reference(&self) -> &ImageReference {
        match self {
            IndexOrImage::Index { reference, .. } | IndexOrImage::Image { reference, .. } => {
                reference
            }
        }
    }

    pub fn digest(&self) -> &str {
        match self {
            IndexOrImage::Index { digest, .. } | IndexOrImage::Image { digest, .. } => digest,
        }
    }
}

/// Blobs and manifests making up one artefact, ready to push.
struct Composition {
    content: ArchivedContent,
    attestations: Option<AttestationLayer>,
    config: Descriptor,
    manifests: Vec<Encoded>,
    index: Encoded,
}

/// Packaging and fetching client.
///
/// Holds no per-operation state; a single client can serve concurrent calls.
#[derive(Clone)]
pub struct Client {
    registry: Arc<dyn Registry>,
    config: ClientConfig,
}

impl Client {
    /// Create a client over any registry implementation.
    pub fn new(registry: Arc<dyn Registry>, config: ClientConfig) -> Self {
        Self { registry, config }
    }

    /// Create a client talking to network registries.
    pub fn with_auth(auth: RegistryAuth, config: ClientConfig) -> Self {
        let registry = OciDistributionRegistry::new(auth, &config.insecure_registries);
        Self::new(Arc::new(registry), config)
    }

    /// Package `source_dir` and push it to the `destination` repository.
    ///
    /// The index is pushed under the digest-derived primary tag; semver tags
    /// derived from `statements` and the short tag are added afterwards as
    /// aliases. When aliases fail the index is already in place and the
    /// returned [`TapeError::AliasTagging`] carries the computed refs.
    pub async fn push_artefact(
        &self,
        destination: &str,
        source_dir: &Path,
        timestamp: Option<DateTime<Utc>>,
        statements: &[Statement],
    ) -> Result<PackageRefs> {
        let repository = ImageReference::parse_repository(destination)?;

        tracing::info!(
            destination = %repository,
            source = %source_dir.display(),
            statements = statements.len(),
            "Packaging manifest directory"
        );

        // Removed on drop, whichever way this function exits.
        let tmp_dir = tempfile::Builder::new()
            .prefix(&self.config.temp_dir_prefix)
            .tempdir()
            .map_err(|e| TapeError::wrap(Stage::TempFile, "creating temp dir failed", e))?;
        let content_path = tmp_dir.path().join(CONTENT_FILE_NAME);
        let content = archive_in_background(source_dir.to_path_buf(), content_path.clone()).await?;

        let attestations = build_attestations(statements)?;

        let tags = ContentTags::new(&repository, &self.config.tag_prefix, &content.hash)?;
        let semver_tags = semver_tags_from_attestations(&repository, statements);

        let created = timestamp
            .unwrap_or_else(Utc::now)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let composition = compose(content, attestations, statements, created)?;

        self.push_composition(&repository, &content_path, &composition)
            .await?;

        self.registry
            .push_manifest(&tags.primary, &composition.index)
            .await
            .map_err(|e| TapeError::wrap(Stage::Push, "pushing index failed", e))?;

        let digest = composition.index.digest.clone();
        tracing::info!(reference = %tags.primary, digest = %digest, "Pushed artefact index");

        let refs = PackageRefs {
            digest: digest.clone(),
            primary: tags.primary.full_reference(),
            short: tags.short.full_reference(),
            semver: semver_tags
                .iter()
                .map(|t| format!("{}@{}", t.full_reference(), digest))
                .collect(),
        };

        let mut failed = Vec::new();
        let mut first_error = None;
        for alias in semver_tags.iter().chain(std::iter::once(&tags.short)) {
            match self.registry.tag_manifest(alias, &composition.index).await {
                Ok(()) => tracing::debug!(tag = %alias, "Added alias tag"),
                Err(e) => {
                    tracing::warn!(tag = %alias, error = %e, "Adding alias tag failed");
                    failed.push(alias.full_reference());
                    first_error.get_or_insert(e);
                }
            }
        }

        drop(tmp_dir);

        match first_error {
            Some(source) => Err(TapeError::AliasTagging {
                refs: Box::new(refs),
                failed,
                source: Box::new(source),
            }),
            None => {
                tracing::info!(refs = %refs, semver = refs.semver.len(), "Artefact pushed");
                Ok(refs)
            }
        }
    }

    async fn push_composition(
        &self,
        repository: &ImageReference,
        content_path: &Path,
        composition: &Composition,
    ) -> Result<()> {
        self.registry
            .push_blob(repository, &composition.config.digest, EMPTY_CONFIG)
            .await
            .map_err(push_failed("config blob"))?;

        let content = tokio::fs::read(content_path)
            .await
            .map_err(|e| TapeError::wrap(Stage::TempFile, "reading content blob failed", e))?;
        self.registry
            .push_blob(repository, &composition.content.digest(), &content)
            .await
            .map_err(push_failed("content blob"))?;

        if let Some(ref layer) = composition.attestations {
            self.registry
                .push_blob(repository, layer.digest(), layer.bytes())
                .await
                .map_err(push_failed("attestation blob"))?;
        }

        for manifest in &composition.manifests {
            let by_digest = repository.with_digest(manifest.digest.clone());
            self.registry
                .push_manifest(&by_digest, manifest)
                .await
                .map_err(push_failed("manifest"))?;
            tracing::debug!(digest = %manifest.digest, "Pushed manifest");
        }
        Ok(())
    }

    /// Pull the manifest at `reference` and classify it.
    pub async fn get_index_or_image(&self, reference: &ImageReference) -> Result<IndexOrImage> {
        if reference.manifest_reference().is_none() {
            return Err(TapeError::InvalidReference {
                reference: reference.full_reference(),
                message: "a tag or digest is required".to_string(),
            });
        }

        let pulled = self
            .registry
            .pull_manifest(reference)
            .await
            .map_err(|e| TapeError::wrap(Stage::Fetch, format!("pulling {} failed", reference), e))?;
        if let Some(ref expected) = reference.digest {
            digest::verify(expected, &pulled.bytes)?;
        }

        let repository = ImageReference {
            tag: None,
            digest: None,
            ..reference.clone()
        };
        if pulled.is_index() {
            Ok(IndexOrImage::Index {
                reference: repository,
                digest: pulled.digest,
                index: Index::from_slice(&pulled.bytes)?,
            })
        } else if is_manifest_media_type(&pulled.media_type) {
            Ok(IndexOrImage::Image {
                reference: repository,
                digest: pulled.digest,
                manifest: Manifest::from_slice(&pulled.bytes)?,
            })
        } else {
            Err(TapeError::UnsupportedManifest {
                reference: reference.full_reference(),
                media_type: pulled.media_type,
            })
        }
    }

    /// Select layers from a resolved index or image.
    ///
    /// An empty `media_types` selects everything. For an index, manifests
    /// are selected by artifact type and each of their layers must carry that
    /// same media type. For an image, layers are selected directly. Returns
    /// the selected layers and the manifests that were read, by digest.
    pub async fn fetch_from_index_or_image(
        &self,
        resolved: &IndexOrImage,
        media_types: &[MediaType],
    ) -> Result<(Vec<ArtefactInfo>, HashMap<String, Manifest>)> {
        let skip = |media_type: &MediaType| !media_types.is_empty() && !media_types.contains(media_type);

        let mut artefacts = Vec::new();
        let mut manifests = HashMap::new();

        match resolved {
            IndexOrImage::Image {
                reference,
                digest,
                manifest,
            } => {
                for layer in &manifest.layers {
                    if skip(&layer.blob_media_type()) {
                        continue;
                    }
                    artefacts.push(self.artefact(reference, layer, manifest));
                }
                manifests.insert(digest.clone(), manifest.clone());
            }
            IndexOrImage::Index {
                reference, index, ..
            } => {
                for entry in &index.manifests {
                    let declared = entry.artifact_media_type();
                    if matches!(declared, Some(ref t) if skip(t)) {
                        continue;
                    }

                    let manifest = self.pull_manifest_by_digest(reference, &entry.digest).await?;
                    let artifact_type =
                        declared.unwrap_or_else(|| manifest.effective_artifact_type());
                    if skip(&artifact_type) {
                        continue;
                    }

                    for layer in &manifest.layers {
                        let layer_type = layer.blob_media_type();
                        if layer_type != artifact_type {
                            return Err(TapeError::MediaTypeMismatch {
                                manifest: artifact_type.to_string(),
                                layer: layer_type.to_string(),
                            });
                        }
                        artefacts.push(self.artefact(reference, layer, &manifest));
                    }
                    manifests.insert(entry.digest.clone(), manifest);
                }
            }
        }

        tracing::debug!(
            reference = %resolved.reference(),
            layers = artefacts.len(),
            manifests = manifests.len(),
            "Selected artefact layers"
        );
        Ok((artefacts, manifests))
    }

    /// Resolve `reference` and select layers of the given media types.
    pub async fn fetch(
        &self,
        reference: &ImageReference,
        media_types: &[MediaType],
    ) -> Result<Vec<ArtefactInfo>> {
        let resolved = self.get_index_or_image(reference).await?;
        let (artefacts, _) = self.fetch_from_index_or_image(&resolved, media_types).await?;
        Ok(artefacts)
    }

    /// The only layer of a single-manifest artefact.
    pub async fn get_single_artefact(&self, reference: &ImageReference) -> Result<ArtefactInfo> {
        let name = reference.full_reference();
        let resolved = self.get_index_or_image(reference).await?;

        let (repository, manifest) = match resolved {
            IndexOrImage::Index {
                reference, index, ..
            } => {
                let [entry] = index.manifests.as_slice() else {
                    return Err(TapeError::MultipleManifests(name));
                };
                let manifest = self.pull_manifest_by_digest(&reference, &entry.digest).await?;
                (reference, manifest)
            }
            IndexOrImage::Image {
                reference, manifest, ..
            } => (reference, manifest),
        };

        match manifest.layers.as_slice() {
            [] => Err(TapeError::NoLayers(name)),
            [layer] => Ok(self.artefact(&repository, layer, &manifest)),
            _ => Err(TapeError::MultipleLayers(name)),
        }
    }

    async fn pull_manifest_by_digest(
        &self,
        repository: &ImageReference,
        digest: &str,
    ) -> Result<Manifest> {
        let reference = repository.with_digest(digest);
        let pulled = self.registry.pull_manifest(&reference).await.map_err(|e| {
            TapeError::wrap(Stage::Fetch, format!("failed to get manifest for {}", digest), e)
        })?;
        digest::verify(digest, &pulled.bytes)?;
        Manifest::from_slice(&pulled.bytes)
    }

    fn artefact(
        &self,
        repository: &ImageReference,
        layer: &Descriptor,
        manifest: &Manifest,
    ) -> ArtefactInfo {
        ArtefactInfo::new(
            Arc::clone(&self.registry),
            repository.clone(),
            layer.clone(),
            manifest.annotations(),
        )
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn push_failed(what: &'static str) -> impl FnOnce(TapeError) -> TapeError {
    move |e| TapeError::wrap(Stage::Push, format!("pushing {} failed", what), e)
}

/// Run the archiver off the async executor.
async fn archive_in_background(source_dir: PathBuf, content_path: PathBuf) -> Result<ArchivedContent> {
    tokio::task::spawn_blocking(move || write_artefact_file(&source_dir, &content_path))
        .await
        .map_err(|e| TapeError::wrap(Stage::Archive, "archiver task failed", e))?
}

/// Build the content manifest, the optional attestation manifest and the
/// index that references them.
fn compose(
    content: ArchivedContent,
    attestations: Option<AttestationLayer>,
    statements: &[Statement],
    created: String,
) -> Result<Composition> {
    let mut index_annotations = Annotations::new();
    index_annotations.insert(CREATED_ANNOTATION.to_string(), created);

    let config = Descriptor::new(
        MediaType::Content.as_str(),
        sha256_digest(EMPTY_CONFIG),
        EMPTY_CONFIG.len() as u64,
    );

    let mut content_manifest = Manifest::builder(config.clone())
        .artifact_type(&MediaType::Content)
        .annotations(index_annotations.clone())
        .layer(Descriptor::new(
            MediaType::Content.as_str(),
            content.digest(),
            content.size,
        ));
    if attestations.is_some() {
        content_manifest = content_manifest.annotation(
            CONTENT_INTERPRETER_ANNOTATION,
            CONTENT_INTERPRETER_KUBECTL_APPLY,
        );
    }
    let content_manifest = content_manifest.build();
    let content_encoded = content_manifest.encode()?;

    let mut index = Index::builder()
        .annotations(index_annotations.clone())
        .manifest(&content_manifest, &content_encoded);
    let mut manifests = vec![content_encoded];

    if let Some(ref layer) = attestations {
        let summary = Statements(statements).marshal_summary_annotation()?;
        let attest_manifest = Manifest::builder(Descriptor::new(
            MediaType::Attest.as_str(),
            config.digest.clone(),
            config.size,
        ))
        .artifact_type(&MediaType::Attest)
        .annotations(index_annotations)
        .annotation(ATTESTATIONS_SUMMARY_ANNOTATION, summary)
        .layer(Descriptor::new(
            layer.media_type().as_str(),
            layer.digest(),
            layer.size(),
        ))
        .build();
        let attest_encoded = attest_manifest.encode()?;
        index = index.manifest(&attest_manifest, &attest_encoded);
        manifests.push(attest_encoded);
    }

    let index = index.build().encode()?;

    Ok(Composition {
        content,
        attestations,
        config,
        manifests,
        index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::attest::{Predicate, Subject};

    fn content() -> ArchivedContent {
        ArchivedContent {
            hash: "ab".repeat(32),
            size: 42,
        }
    }

    fn statement() -> Statement {
        Statement {
            subject: vec![Subject::sha256("deployment.yaml", "00")],
            predicate: Predicate::Other {
                predicate_type: "example.com/Test/v1".to_string(),
                body: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn test_compose_without_attestations() {
        let composition = compose(content(), None, &[], "2024-06-01T12:00:00Z".to_string()).unwrap();
        assert_eq!(composition.manifests.len(), 1);

        let index = Index::from_slice(&composition.index.bytes).unwrap();
        assert_eq!(index.manifests.len(), 1);
        assert_eq!(
            index.annotations.as_ref().unwrap()[CREATED_ANNOTATION],
            "2024-06-01T12:00:00Z"
        );

        let manifest = Manifest::from_slice(&composition.manifests[0].bytes).unwrap();
        assert_eq!(manifest.effective_artifact_type(), MediaType::Content);
        assert_eq!(manifest.config.blob_media_type(), MediaType::Content);
        assert_eq!(manifest.layers[0].digest, content().digest());
        assert!(!manifest.annotations().contains_key(CONTENT_INTERPRETER_ANNOTATION));
    }

    #[test]
    fn test_compose_with_attestations() {
        let statements = vec![statement()];
        let layer = build_attestations(&statements).unwrap();
        let composition = compose(
            content(),
            layer,
            &statements,
            "2024-06-01T12:00:00Z".to_string(),
        )
        .unwrap();
        assert_eq!(composition.manifests.len(), 2);

        let index = Index::from_slice(&composition.index.bytes).unwrap();
        let types: Vec<Option<MediaType>> = index
            .manifests
            .iter()
            .map(|d| d.artifact_media_type())
            .collect();
        assert_eq!(types, vec![Some(MediaType::Content), Some(MediaType::Attest)]);

        let content_manifest = Manifest::from_slice(&composition.manifests[0].bytes).unwrap();
        assert_eq!(
            content_manifest.annotations()[CONTENT_INTERPRETER_ANNOTATION],
            CONTENT_INTERPRETER_KUBECTL_APPLY
        );

        let attest_manifest = Manifest::from_slice(&composition.manifests[1].bytes).unwrap();
        assert_eq!(attest_manifest.layers[0].blob_media_type(), MediaType::Attest);
        assert!(attest_manifest.annotations()[ATTESTATIONS_SUMMARY_ANNOTATION]
            .contains("\"numStatements\":1"));
        assert_eq!(
            attest_manifest.annotations()[CREATED_ANNOTATION],
            "2024-06-01T12:00:00Z"
        );
    }

    #[test]
    fn test_compose_is_deterministic() {
        let a = compose(content(), None, &[], "2024-06-01T12:00:00Z".to_string()).unwrap();
        let b = compose(content(), None, &[], "2024-06-01T12:00:00Z".to_string()).unwrap();
        assert_eq!(a.index.digest, b.index.digest);
    }
}
