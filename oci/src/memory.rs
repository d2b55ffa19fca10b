//! In-process registry.
//!
//! Keeps blobs and manifests in memory, keyed by repository. Used by tests
//! and by callers that want to stage an artefact without a network registry.
//! Individual tags can be made to fail to exercise partial alias tagging.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tape_core::error::{Result, TapeError};

use crate::digest::sha256_digest;
use crate::manifest::{Descriptor, Encoded};
use crate::reference::ImageReference;
use crate::registry::{PulledManifest, Registry};

#[derive(Debug, Clone)]
struct StoredManifest {
    bytes: Vec<u8>,
    media_type: String,
    digest: String,
}

#[derive(Debug, Default)]
struct State {
    /// repository name -> digest -> bytes
    blobs: HashMap<String, HashMap<String, Vec<u8>>>,
    /// repository name -> tag or digest -> manifest
    manifests: HashMap<String, HashMap<String, StoredManifest>>,
    failing_tags: HashSet<String>,
    /// Every successful manifest write, as the full reference written.
    manifest_log: Vec<String>,
}

/// Registry that lives entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every manifest write to `tag` fail.
    pub fn fail_tag(&self, tag: impl Into<String>) {
        self.lock().failing_tags.insert(tag.into());
    }

    /// Tags present in the repository of `repository`, sorted.
    pub fn tags(&self, repository: &ImageReference) -> Vec<String> {
        let state = self.lock();
        let mut tags: Vec<String> = state
            .manifests
            .get(&repository.repository_name())
            .map(|m| {
                m.keys()
                    .filter(|k| !k.contains(':'))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tags.sort();
        tags
    }

    /// Digest of the manifest a tag points at.
    pub fn resolve(&self, tag: &ImageReference) -> Option<String> {
        let key = tag.manifest_reference()?;
        self.lock()
            .manifests
            .get(&tag.repository_name())
            .and_then(|m| m.get(key))
            .map(|m| m.digest.clone())
    }

    /// Whether a blob is stored in the repository of `repository`.
    pub fn has_blob(&self, repository: &ImageReference, digest: &str) -> bool {
        self.lock()
            .blobs
            .get(&repository.repository_name())
            .map(|b| b.contains_key(digest))
            .unwrap_or(false)
    }

    /// Manifest writes in the order they happened.
    pub fn manifest_log(&self) -> Vec<String> {
        self.lock().manifest_log.clone()
    }

    /// Store raw manifest bytes under a tag or digest, as a foreign client
    /// would.
    pub fn put_manifest(&self, reference: &ImageReference, bytes: Vec<u8>, media_type: &str) {
        let Some(key) = reference.manifest_reference() else {
            return;
        };
        let stored = StoredManifest {
            digest: sha256_digest(&bytes),
            bytes,
            media_type: media_type.to_string(),
        };
        self.lock()
            .manifests
            .entry(reference.repository_name())
            .or_default()
            .insert(key.to_string(), stored);
    }

    /// Overwrite a stored blob without checking its digest.
    pub fn put_blob(&self, repository: &ImageReference, digest: &str, data: Vec<u8>) {
        self.lock()
            .blobs
            .entry(repository.repository_name())
            .or_default()
            .insert(digest.to_string(), data);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(reference: &ImageReference, what: &str) -> TapeError {
    TapeError::Registry {
        registry: reference.registry.clone(),
        message: format!("{} not found in {}", what, reference.repository_name()),
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn push_blob(&self, repository: &ImageReference, digest: &str, data: &[u8]) -> Result<()> {
        let actual = sha256_digest(data);
        if actual != digest {
            return Err(TapeError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        self.put_blob(repository, digest, data.to_vec());
        Ok(())
    }

    async fn push_manifest(&self, reference: &ImageReference, manifest: &Encoded) -> Result<()> {
        let key = reference
            .manifest_reference()
            .ok_or_else(|| not_found(reference, "tag or digest"))?
            .to_string();

        let mut state = self.lock();
        if state.failing_tags.contains(&key) {
            return Err(TapeError::Registry {
                registry: reference.registry.clone(),
                message: format!("writing {} rejected", reference),
            });
        }

        let stored = StoredManifest {
            bytes: manifest.bytes.clone(),
            media_type: manifest.media_type.to_string(),
            digest: manifest.digest.clone(),
        };
        let repository = state.manifests.entry(reference.repository_name()).or_default();
        repository.insert(manifest.digest.clone(), stored.clone());
        repository.insert(key, stored);
        state.manifest_log.push(reference.full_reference());
        Ok(())
    }

    async fn pull_manifest(&self, reference: &ImageReference) -> Result<PulledManifest> {
        let key = reference
            .manifest_reference()
            .ok_or_else(|| not_found(reference, "tag or digest"))?;
        let state = self.lock();
        let stored = state
            .manifests
            .get(&reference.repository_name())
            .and_then(|m| m.get(key))
            .ok_or_else(|| not_found(reference, &format!("manifest {}", key)))?;

        Ok(PulledManifest {
            bytes: stored.bytes.clone(),
            media_type: stored.media_type.clone(),
            digest: stored.digest.clone(),
        })
    }

    async fn pull_blob(&self, repository: &ImageReference, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.lock()
            .blobs
            .get(&repository.repository_name())
            .and_then(|b| b.get(&descriptor.digest))
            .cloned()
            .ok_or_else(|| not_found(repository, &format!("blob {}", descriptor.digest)))
    }
}
