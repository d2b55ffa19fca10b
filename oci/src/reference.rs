//! Registry reference parsing.
//!
//! Parses references like `ghcr.io/org/manifests:v0.1.0` into registry,
//! repository, tag and digest, and derives sibling references (same
//! repository, different tag) used for content and alias tags.

use tape_core::error::{Result, TapeError};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Longest tag accepted by OCI registries.
const MAX_TAG_LEN: usize = 128;

/// Parsed registry reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "org/manifests")
    pub repository: String,
    /// Tag (e.g., "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse a reference string.
    ///
    /// Supports formats:
    /// - `app` → docker.io/library/app
    /// - `org/app:v1` → docker.io/org/app:v1
    /// - `ghcr.io/org/app:tag` → ghcr.io/org/app:tag
    /// - `localhost:5000/app@sha256:abc...` → localhost:5000/app@sha256:abc...
    ///
    /// Unlike image pulls, no default tag is applied.
    pub fn parse(reference: &str) -> Result<Self> {
        let raw = reference.trim();
        if raw.is_empty() {
            return Err(invalid(reference, "empty reference"));
        }

        let (name_tag, digest) = match raw.rsplit_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .map(|(algo, hex)| !algo.is_empty() && !hex.is_empty())
                    .unwrap_or(false);
                if !valid {
                    return Err(invalid(reference, "expected digest in algorithm:hex form"));
                }
                (name, Some(digest.to_string()))
            }
            None => (raw, None),
        };

        // A tag colon always comes after the last '/', otherwise it is a port.
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon) => {
                let colon = last_slash + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if let Some(ref tag) = tag {
            validate_tag(reference, tag)?;
        }

        let (registry, repository) = split_registry_repository(reference, name)?;

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Parse a bare repository reference (no tag, no digest), as accepted for
    /// push destinations.
    pub fn parse_repository(reference: &str) -> Result<Self> {
        let parsed = Self::parse(reference)?;
        if parsed.tag.is_some() || parsed.digest.is_some() {
            return Err(invalid(
                reference,
                "destination must be a repository without tag or digest",
            ));
        }
        Ok(parsed)
    }

    /// Same repository, given tag, no digest.
    pub fn with_tag(&self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        validate_tag(&tag, &tag)?;
        Ok(ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: Some(tag),
            digest: None,
        })
    }

    /// Same repository, given digest, no tag.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// `registry/repository` without tag or digest.
    pub fn repository_name(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// Tag or digest used to address a manifest; digest wins when both are set.
    pub fn manifest_reference(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository_name();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = TapeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(reference: &str, message: &str) -> TapeError {
    TapeError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

/// Tags are `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`.
fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    let mut chars = tag.chars();
    let first_ok = chars
        .next()
        .map(|c| c.is_ascii_alphanumeric() || c == '_')
        .unwrap_or(false);
    if !first_ok
        || tag.len() > MAX_TAG_LEN
        || !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(invalid(reference, &format!("invalid tag '{}'", tag)));
    }
    Ok(())
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    // The first component is a registry hostname when it contains a dot or a
    // colon, or is "localhost".
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            (first.to_string(), rest.to_string())
        }
        _ if name.contains('/') => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        _ => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
    };

    let valid_component = |c: &str| {
        !c.is_empty()
            && c.chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-'))
            && c.starts_with(|ch: char| ch.is_ascii_alphanumeric())
            && c.ends_with(|ch: char| ch.is_ascii_alphanumeric())
    };
    if repository.is_empty() || !repository.split('/').all(valid_component) {
        return Err(invalid(
            reference,
            &format!("invalid repository '{}'", repository),
        ));
    }

    Ok((registry, repository))
}
