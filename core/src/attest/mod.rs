//! Attestation model consumed by the packaging engine.
//!
//! Statements are produced by collaborators (the VCS detector, image
//! scanners) and handed to the engine pre-built. The engine only filters them
//! by predicate type, serialises them, summarises them into an annotation,
//! and reads the git tags out of manifest directory predicates.

mod statement;
pub mod vcs;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

pub use statement::{
    filter_by_predicate_type, DirContents, Predicate, Statement, Statements, Subject,
    SummaryAnnotation, MANIFEST_DIR_PREDICATE_TYPE, STATEMENT_TYPE,
};
pub use vcs::{
    EntryGroup, GitInfo, GitReference, GitRemote, GitSummary, GitTag, PathSummary, VcsEntries,
    GIT_PROVIDER_NAME,
};

use crate::error::{Result, TapeError};

/// Source of attestation statements for a scanned directory.
pub trait AttestationProducer: Send + Sync {
    /// Statements to attach to the packaged artefact.
    fn statements(&self) -> Vec<Statement>;

    /// Summary of the scanned base directory, if one was recorded.
    fn base_dir_summary(&self) -> Option<&PathSummary>;
}

/// Detects whether a directory is under version control.
///
/// Returns `None` when no VCS was found; otherwise a producer of statements
/// describing the directory's origin.
pub trait VcsDetector {
    fn detect(&self, dir: &Path) -> Result<Option<Box<dyn AttestationProducer>>>;
}

/// Statements loaded from a JSON-lines file.
#[derive(Debug, Clone)]
pub struct StatementFile {
    path: PathBuf,
    statements: Vec<Statement>,
}

impl StatementFile {
    /// Load statements from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            TapeError::Config(format!(
                "Failed to open attestations file {}: {}",
                path.display(),
                e
            ))
        })?;
        let statements = Statements::decode(BufReader::new(file))?;
        tracing::debug!(
            path = %path.display(),
            count = statements.len(),
            "Loaded attestation statements"
        );
        Ok(Self { path, statements })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttestationProducer for StatementFile {
    fn statements(&self) -> Vec<Statement> {
        self.statements.clone()
    }

    fn base_dir_summary(&self) -> Option<&PathSummary> {
        self.statements
            .iter()
            .filter_map(Statement::dir_contents)
            .find_map(|c| c.vcs_entries.entry_groups.first())
            .and_then(|group| group.first())
    }
}

/// Detector that reads pre-built statements from a fixed file name inside the
/// scanned directory.
#[derive(Debug, Clone)]
pub struct StatementFileDetector {
    file_name: String,
}

impl StatementFileDetector {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

impl VcsDetector for StatementFileDetector {
    fn detect(&self, dir: &Path) -> Result<Option<Box<dyn AttestationProducer>>> {
        let path = dir.join(&self.file_name);
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(Box::new(StatementFile::load(path)?)))
    }
}
