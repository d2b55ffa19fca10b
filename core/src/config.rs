//! Client configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TapeError};

/// Default prefix of content-derived tags.
pub const DEFAULT_TAG_PREFIX: &str = "config.";

/// Default prefix of the temporary directory holding the content blob.
pub const DEFAULT_TEMP_DIR_PREFIX: &str = "tape-oci-artefact-";

/// Environment variable overriding [`ClientConfig::tag_prefix`].
pub const TAG_PREFIX_ENV: &str = "TAPE_TAG_PREFIX";

/// Environment variable overriding [`ClientConfig::insecure_registries`]
/// (comma separated).
pub const INSECURE_REGISTRIES_ENV: &str = "TAPE_INSECURE_REGISTRIES";

/// Longest prefix that still leaves room for a full sha256 hex digest in a
/// 128 character OCI tag.
const MAX_TAG_PREFIX_LEN: usize = 64;

/// Artefact client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix of the primary and short tags (`<prefix><hex digest>`)
    pub tag_prefix: String,

    /// Prefix of the per-push temporary directory
    pub temp_dir_prefix: String,

    /// Registries reached over plain HTTP
    pub insecure_registries: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tag_prefix: DEFAULT_TAG_PREFIX.to_string(),
            temp_dir_prefix: DEFAULT_TEMP_DIR_PREFIX.to_string(),
            insecure_registries: Vec::new(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TapeError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: ClientConfig = serde_yaml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded client configuration");
        config.validate()?;
        Ok(config)
    }

    /// Apply `TAPE_TAG_PREFIX` and `TAPE_INSECURE_REGISTRIES` when set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(prefix) = std::env::var(TAG_PREFIX_ENV) {
            self.tag_prefix = prefix;
        }
        if let Ok(registries) = std::env::var(INSECURE_REGISTRIES_ENV) {
            self.insecure_registries = registries
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        self.validate()?;
        Ok(self)
    }

    /// Set the tag prefix.
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    /// Check that tags built from this configuration are valid OCI tags.
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.tag_prefix;
        if prefix.len() > MAX_TAG_PREFIX_LEN {
            return Err(TapeError::Config(format!(
                "tag prefix '{}' is longer than {} characters",
                prefix, MAX_TAG_PREFIX_LEN
            )));
        }
        if prefix.starts_with(['.', '-']) {
            return Err(TapeError::Config(format!(
                "tag prefix '{}' must not start with '.' or '-'",
                prefix
            )));
        }
        if let Some(c) = prefix
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            return Err(TapeError::Config(format!(
                "tag prefix '{}' contains invalid character '{}'",
                prefix, c
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.tag_prefix, "config.");
        assert_eq!(config.temp_dir_prefix, "tape-oci-artefact-");
        assert!(config.insecure_registries.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tape.yaml");
        std::fs::write(&path, "tag_prefix: cfg-\ninsecure_registries:\n  - localhost:5000\n")
            .unwrap();

        let config = ClientConfig::from_file(&path).unwrap();
        assert_eq!(config.tag_prefix, "cfg-");
        assert_eq!(config.insecure_registries, vec!["localhost:5000".to_string()]);
        assert_eq!(config.temp_dir_prefix, DEFAULT_TEMP_DIR_PREFIX);
    }

    #[test]
    fn test_from_file_missing() {
        let tmp = TempDir::new().unwrap();
        let result = ClientConfig::from_file(tmp.path().join("absent.yaml"));
        assert!(matches!(result, Err(TapeError::Config(_))));
    }

    #[test]
    fn test_from_file_rejects_bad_prefix() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tape.yaml");
        std::fs::write(&path, "tag_prefix: \"bad/prefix\"\n").unwrap();
        assert!(ClientConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_validate_prefix_rules() {
        assert!(ClientConfig::default().with_tag_prefix("").validate().is_ok());
        assert!(ClientConfig::default().with_tag_prefix("cfg-").validate().is_ok());
        assert!(ClientConfig::default().with_tag_prefix("-cfg").validate().is_err());
        assert!(ClientConfig::default().with_tag_prefix("cfg:").validate().is_err());
        assert!(ClientConfig::default()
            .with_tag_prefix("x".repeat(65))
            .validate()
            .is_err());
    }
}
