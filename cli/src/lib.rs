//! Tape CLI - package manifest directories as OCI artefacts.

pub mod commands;
