use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::package::PackageRefs;

/// Boxed underlying cause carried by staged errors.
pub type Cause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Stage of a packaging or fetch operation that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Creating the temporary directory or file holding the content blob
    TempFile,
    /// Building the tar+gzip content blob
    Archive,
    /// Serialising attestation statements
    Attestations,
    /// Parsing the destination or source reference
    Reference,
    /// Serialising manifests and computing their digests
    Digest,
    /// Pushing blobs, manifests or the index
    Push,
    /// Pushing alias tags
    Tag,
    /// Resolving or pulling an artefact
    Fetch,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::TempFile => "temp file",
            Stage::Archive => "archive",
            Stage::Attestations => "attestations",
            Stage::Reference => "reference",
            Stage::Digest => "digest",
            Stage::Push => "push",
            Stage::Tag => "tag",
            Stage::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

/// Tape error types
#[derive(Error, Debug)]
pub enum TapeError {
    /// Source directory does not exist
    #[error("invalid source dir path: {}", .0.display())]
    InvalidSourcePath(PathBuf),

    /// Malformed registry reference
    #[error("invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Failure in a specific stage, with an optional underlying cause
    #[error("{stage}: {message}")]
    Stage {
        stage: Stage,
        message: String,
        #[source]
        source: Option<Cause>,
    },

    /// A layer does not carry the media type its manifest declares
    #[error("media type mismatch between manifest and layer: {manifest} != {layer}")]
    MediaTypeMismatch { manifest: String, layer: String },

    /// Blob content does not hash to the digest it was addressed by
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    /// An index holds more than one manifest where exactly one was expected
    #[error("multiple manifests found in image {0:?}")]
    MultipleManifests(String),

    /// A manifest holds more than one layer where exactly one was expected
    #[error("multiple layers found in image {0:?}")]
    MultipleLayers(String),

    /// A manifest holds no layers
    #[error("no layers found in image {0:?}")]
    NoLayers(String),

    /// The pulled manifest is neither an image manifest nor an index
    #[error("unsupported manifest media type '{media_type}' for {reference}")]
    UnsupportedManifest {
        reference: String,
        media_type: String,
    },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    Registry { registry: String, message: String },

    /// The index was pushed but one or more alias tags could not be added
    #[error("adding alias tagging failed for {}: {source}", .failed.join(", "))]
    AliasTagging {
        refs: Box<PackageRefs>,
        failed: Vec<String>,
        #[source]
        source: Box<TapeError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TapeError {
    /// Staged error without an underlying cause.
    pub fn at(stage: Stage, message: impl Into<String>) -> Self {
        TapeError::Stage {
            stage,
            message: message.into(),
            source: None,
        }
    }

    /// Staged error wrapping an underlying cause.
    pub fn wrap<E>(stage: Stage, message: impl Into<String>, source: E) -> Self
    where
        E: Into<Cause>,
    {
        TapeError::Stage {
            stage,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// The stage this error is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TapeError::InvalidSourcePath(_) => Some(Stage::Archive),
            TapeError::InvalidReference { .. } => Some(Stage::Reference),
            TapeError::Stage { stage, .. } => Some(*stage),
            TapeError::AliasTagging { .. } => Some(Stage::Tag),
            TapeError::MediaTypeMismatch { .. }
            | TapeError::DigestMismatch { .. }
            | TapeError::MultipleManifests(_)
            | TapeError::MultipleLayers(_)
            | TapeError::NoLayers(_)
            | TapeError::UnsupportedManifest { .. } => Some(Stage::Fetch),
            TapeError::Registry { .. }
            | TapeError::Io(_)
            | TapeError::Serialization(_)
            | TapeError::Config(_) => None,
        }
    }
}

impl From<serde_json::Error> for TapeError {
    fn from(err: serde_json::Error) -> Self {
        TapeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for TapeError {
    fn from(err: serde_yaml::Error) -> Self {
        TapeError::Serialization(err.to_string())
    }
}

/// Result type alias for tape operations
pub type Result<T> = std::result::Result<T, TapeError>;
