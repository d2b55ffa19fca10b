//! Tape OCI - manifest directory artefacts
//!
//! Packages a directory of Kubernetes manifests as an OCI index holding a
//! content manifest and, when provenance statements are supplied, an
//! attestation manifest. Pushes it under a content-derived tag plus alias
//! tags, and fetches artefact layers back by media type.

pub mod archive;
pub mod artefact;
pub mod attestation;
pub mod client;
pub mod digest;
pub mod manifest;
pub mod media_type;
pub mod memory;
pub mod reference;
pub mod registry;
pub mod tags;

pub use archive::{build_artefact, write_artefact_file, ArchivedContent};
pub use artefact::{unpack_content, ArtefactInfo};
pub use attestation::{build_attestations, decode_attestations, AttestationLayer};
pub use client::{Client, IndexOrImage};
pub use manifest::{Annotations, Descriptor, Index, Manifest, Platform};
pub use media_type::MediaType;
pub use memory::MemoryRegistry;
pub use reference::ImageReference;
pub use registry::{OciDistributionRegistry, PulledManifest, Registry, RegistryAuth};
pub use tags::{is_valid_semver, semver_tags_from_attestations, ContentTags};
