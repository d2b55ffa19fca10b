//! Version-control provenance carried by manifest directory attestations.

use serde::{Deserialize, Serialize};

/// Provider name of the git VCS detector.
pub const GIT_PROVIDER_NAME: &str = "git";

/// VCS entries of a manifest directory predicate.
///
/// `providers` names every VCS that contributed summaries; `entry_groups`
/// holds one group per scanned directory, each group a list of path-scoped
/// summaries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcsEntries {
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default)]
    pub entry_groups: Vec<EntryGroup>,
}

/// Summaries produced for one scanned directory.
pub type EntryGroup = Vec<PathSummary>;

/// A path-scoped VCS summary, tagged by the provider that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSummary {
    Git(GitSummary),
    /// Summary from a provider this crate does not model
    Unknown(serde_json::Value),
}

impl PathSummary {
    /// The git summary, if this entry came from the git provider.
    pub fn as_git_summary(&self) -> Option<&GitSummary> {
        match self {
            PathSummary::Git(summary) => Some(summary),
            PathSummary::Unknown(_) => None,
        }
    }

    /// Repository-relative path the summary describes, if known.
    pub fn path(&self) -> Option<&str> {
        match self {
            PathSummary::Git(summary) => Some(&summary.path),
            PathSummary::Unknown(value) => value.get("path").and_then(|p| p.as_str()),
        }
    }
}

/// Git state of a path at the time it was scanned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSummary {
    /// Path relative to the repository root
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    pub git: GitInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remotes: Vec<GitRemote>,
    pub reference: GitReference,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRemote {
    pub name: String,
    #[serde(default)]
    pub urls: Vec<String>,
}

/// The checked out reference and every tag pointing at it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default)]
    pub tags: Vec<GitTag>,
}

impl GitReference {
    /// Raw tag names in recorded order.
    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.name.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitTag {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl GitTag {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_git_summary_decodes_as_git_variant() {
        let value = json!({
            "path": "podinfo",
            "isDir": true,
            "git": {
                "objectHash": "9eeeed9f",
                "reference": {
                    "name": "refs/tags/v0.0.1",
                    "tags": [{"name": "0.0.1"}, {"name": "podinfo/v6.6.3"}]
                }
            }
        });
        let summary: PathSummary = serde_json::from_value(value).unwrap();
        let git = summary.as_git_summary().unwrap();
        assert_eq!(git.path, "podinfo");
        assert_eq!(
            git.git.reference.tag_names().collect::<Vec<_>>(),
            vec!["0.0.1", "podinfo/v6.6.3"]
        );
    }

    #[test]
    fn test_foreign_summary_decodes_as_unknown() {
        let value = json!({"path": "charts", "hg": {"changeset": "abc"}});
        let summary: PathSummary = serde_json::from_value(value).unwrap();
        assert!(summary.as_git_summary().is_none());
        assert_eq!(summary.path(), Some("charts"));
    }

    #[test]
    fn test_vcs_entries_defaults() {
        let entries: VcsEntries = serde_json::from_value(json!({})).unwrap();
        assert!(entries.providers.is_empty());
        assert!(entries.entry_groups.is_empty());
    }
}
