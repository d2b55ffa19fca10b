//! Result of pushing a packaged artefact.

use std::fmt;

use serde::{Deserialize, Serialize};

/// References produced by a successful push.
///
/// `digest` is the digest of the pushed index; `primary` and `short` are the
/// content-derived tags and `semver` holds `<repository>:<tag>@<digest>`
/// strings for every alias derived from VCS tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRefs {
    pub digest: String,
    pub primary: String,
    pub short: String,
    pub semver: Vec<String>,
}

impl fmt::Display for PackageRefs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.short, self.digest)
    }
}
