//! Tape Core - Foundational Types and Abstractions
//!
//! This crate provides the types shared by the packaging engine and the CLI:
//! the staged error type, client configuration, push results, and the
//! attestation statement model consumed by semver tag derivation.

pub mod attest;
pub mod config;
pub mod error;
pub mod package;

// Re-export commonly used types
pub use attest::{
    AttestationProducer, DirContents, GitSummary, PathSummary, Predicate, Statement,
    StatementFile, StatementFileDetector, Statements, Subject, VcsDetector, VcsEntries,
};
pub use config::ClientConfig;
pub use error::{Result, Stage, TapeError};
pub use package::PackageRefs;
