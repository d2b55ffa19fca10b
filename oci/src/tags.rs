//! Tag derivation.
//!
//! Content tags are derived from the hash of the content blob; semver alias
//! tags are derived from the git tags recorded in a manifest directory
//! attestation.

use std::collections::HashSet;

use tape_core::attest::{
    filter_by_predicate_type, Statement, GIT_PROVIDER_NAME, MANIFEST_DIR_PREDICATE_TYPE,
};
use tape_core::error::Result;

use crate::reference::ImageReference;

/// Number of hex characters in the short tag.
pub const SHORT_HASH_LEN: usize = 7;

/// `<prefix><full hex digest>`
pub fn primary_tag_name(prefix: &str, hash: &str) -> String {
    format!("{}{}", prefix, hash)
}

/// `<prefix><first 7 hex characters>`
pub fn short_tag_name(prefix: &str, hash: &str) -> String {
    let end = hash
        .char_indices()
        .nth(SHORT_HASH_LEN)
        .map(|(i, _)| i)
        .unwrap_or(hash.len());
    format!("{}{}", prefix, &hash[..end])
}

/// Primary and short tags of a content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTags {
    pub primary: ImageReference,
    pub short: ImageReference,
}

impl ContentTags {
    pub fn new(repository: &ImageReference, prefix: &str, hash: &str) -> Result<Self> {
        Ok(Self {
            primary: repository.with_tag(primary_tag_name(prefix, hash))?,
            short: repository.with_tag(short_tag_name(prefix, hash))?,
        })
    }
}

/// Semver tags for `repository` derived from the statements' git tags.
///
/// Tags that are valid semver but not valid OCI tags (build metadata
/// contains '+') are skipped.
pub fn semver_tags_from_attestations(
    repository: &ImageReference,
    statements: &[Statement],
) -> Vec<ImageReference> {
    semver_tag_names(statements)
        .into_iter()
        .filter_map(|name| match repository.with_tag(&name) {
            Ok(tag) => Some(tag),
            Err(e) => {
                tracing::warn!(tag = %name, error = %e, "Skipping semver tag");
                None
            }
        })
        .collect()
}

/// Semver tag names derived from the statements' git tags.
///
/// Only a single manifest directory statement with exactly one provider
/// (`git`) and exactly one entry group is considered; anything else yields
/// no tags. Tags prefixed by the summary path (`<path>/v1.2.3`) are scoped
/// to the packaged directory and take precedence over repository-wide tags.
pub fn semver_tag_names(statements: &[Statement]) -> Vec<String> {
    let matched = filter_by_predicate_type(MANIFEST_DIR_PREDICATE_TYPE, statements);
    let [statement] = matched.as_slice() else {
        return Vec::new();
    };
    let Some(contents) = statement.dir_contents() else {
        return Vec::new();
    };

    let entries = &contents.vcs_entries;
    if entries.providers.len() != 1
        || entries.entry_groups.len() != 1
        || entries.providers[0] != GIT_PROVIDER_NAME
    {
        return Vec::new();
    }

    // Only the first summary of the group is used. This covers a directory
    // whose scoped tags match its own path exactly; a scoped tag set on a
    // parent of the packaged directory is not picked up.
    let Some(summary) = entries.entry_groups[0]
        .first()
        .and_then(|s| s.as_git_summary())
    else {
        return Vec::new();
    };

    let scope = format!("{}/", summary.path);
    let reference = &summary.git.reference;
    let mut global = TagSet::with_capacity(reference.tags.len());
    let mut scoped = TagSet::with_capacity(reference.tags.len());
    for name in reference.tag_names() {
        match name.strip_prefix(&scope) {
            Some(rest) => scoped.add(rest),
            None => global.add(name),
        }
    }

    if scoped.is_empty() {
        global.into_list()
    } else {
        scoped.into_list()
    }
}

/// Ordered, deduplicated set of normalised semver tags.
struct TagSet {
    seen: HashSet<String>,
    list: Vec<String>,
}

impl TagSet {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            list: Vec::with_capacity(capacity),
        }
    }

    fn add(&mut self, tag: &str) {
        let tag = if tag.starts_with('v') {
            tag.to_string()
        } else {
            format!("v{}", tag)
        };
        if !self.seen.contains(&tag) && is_valid_semver(&tag) {
            self.seen.insert(tag.clone());
            self.list.push(tag);
        }
    }

    fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn into_list(self) -> Vec<String> {
        self.list
    }
}

/// Whether `v` is a valid semantic version with a leading `v`.
///
/// Accepts `vMAJOR`, `vMAJOR.MINOR` and `vMAJOR.MINOR.PATCH`, the latter
/// optionally followed by `-prerelease` and `+build`. Numeric parts have no
/// leading zeros.
pub fn is_valid_semver(v: &str) -> bool {
    let Some(rest) = v.strip_prefix('v') else {
        return false;
    };

    let (core, build) = match rest.split_once('+') {
        Some((core, build)) => (core, Some(build)),
        None => (rest, None),
    };
    let (numbers, prerelease) = match core.split_once('-') {
        Some((numbers, pre)) => (numbers, Some(pre)),
        None => (core, None),
    };

    let parts: Vec<&str> = numbers.split('.').collect();
    if parts.is_empty() || parts.len() > 3 || !parts.iter().all(|p| is_numeric_part(p)) {
        return false;
    }
    // Shorthand forms take no prerelease or build suffix.
    if parts.len() < 3 && (prerelease.is_some() || build.is_some()) {
        return false;
    }

    let prerelease_ok = prerelease.map_or(true, |pre| {
        pre.split('.')
            .all(|id| is_identifier(id) && !is_leading_zero_number(id))
    });
    let build_ok = build.map_or(true, |b| b.split('.').all(is_identifier));
    prerelease_ok && build_ok
}

fn is_numeric_part(p: &str) -> bool {
    !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) && !is_leading_zero_number(p)
}

fn is_identifier(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn is_leading_zero_number(id: &str) -> bool {
    id.len() > 1 && id.starts_with('0') && id.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tape_core::attest::{
        DirContents, GitInfo, GitReference, GitSummary, GitTag, PathSummary, Predicate,
        Subject, VcsEntries,
    };

    fn git_statement(path: &str, tags: &[&str]) -> Statement {
        git_statement_with(vec!["git"], path, tags)
    }

    fn git_statement_with(providers: Vec<&str>, path: &str, tags: &[&str]) -> Statement {
        let summary = GitSummary {
            path: path.to_string(),
            is_dir: true,
            git: GitInfo {
                reference: GitReference {
                    tags: tags.iter().map(|t| GitTag::named(*t)).collect(),
                    ..Default::default()
                },
                ..Default::default()
            },
        };
        Statement::manifest_dir(
            vec![Subject::sha256("deployment.yaml", "00")],
            DirContents {
                vcs_entries: VcsEntries {
                    providers: providers.into_iter().map(str::to_string).collect(),
                    entry_groups: vec![vec![PathSummary::Git(summary)]],
                },
            },
        )
    }

    fn repo() -> ImageReference {
        ImageReference::parse_repository("ghcr.io/org/podinfo").unwrap()
    }

    #[test]
    fn test_content_tag_names() {
        let hash = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
        assert_eq!(primary_tag_name("cfg-", hash), format!("cfg-{}", hash));
        assert_eq!(short_tag_name("cfg-", hash), "cfg-0123456");
        assert_eq!(short_tag_name("config.", "abc"), "config.abc");
    }

    #[test]
    fn test_content_tags_share_repository() {
        let hash = "fedcba9876543210fedcba9876543210fedcba9876543210fedcba9876543210";
        let tags = ContentTags::new(&repo(), "config.", hash).unwrap();
        assert_eq!(
            tags.primary.full_reference(),
            format!("ghcr.io/org/podinfo:config.{}", hash)
        );
        assert_eq!(tags.short.full_reference(), "ghcr.io/org/podinfo:config.fedcba9");
    }

    #[test]
    fn test_scoped_tags_take_precedence() {
        let statements = [git_statement("podinfo", &["0.0.1", "v0.0.1", "podinfo/v6.6.3"])];
        assert_eq!(semver_tag_names(&statements), vec!["v6.6.3"]);
    }

    #[test]
    fn test_global_tags_without_scope_match() {
        let statements = [git_statement("", &["0.0.1", "v0.0.1", "podinfo/v6.6.3"])];
        assert_eq!(semver_tag_names(&statements), vec!["v0.0.1"]);

        let statements = [git_statement("kustomize", &["v6.7.0"])];
        assert_eq!(semver_tag_names(&statements), vec!["v6.7.0"]);
    }

    #[test]
    fn test_tags_are_expressed_against_repository() {
        let statements = [git_statement("podinfo", &["0.0.2", "v0.0.2", "podinfo/v6.7.0"])];
        let tags = semver_tags_from_attestations(&repo(), &statements);
        let refs: Vec<String> = tags.iter().map(|t| t.full_reference()).collect();
        assert_eq!(refs, vec!["ghcr.io/org/podinfo:v6.7.0"]);
    }

    #[test]
    fn test_order_and_dedup() {
        let statements = [git_statement("", &["v2.0.0", "1.0.0", "2.0.0", "v1.0.0", "v1.1"])];
        assert_eq!(semver_tag_names(&statements), vec!["v2.0.0", "v1.0.0", "v1.1"]);
    }

    #[test]
    fn test_invalid_semver_is_dropped() {
        let statements = [git_statement("", &["latest", "release-1", "v01.2.3", "v1.2.3"])];
        assert_eq!(semver_tag_names(&statements), vec!["v1.2.3"]);
    }

    #[test]
    fn test_build_metadata_is_not_a_valid_oci_tag() {
        let statements = [git_statement("", &["v1.2.3+build.5", "v1.2.3-rc.1"])];
        assert_eq!(
            semver_tag_names(&statements),
            vec!["v1.2.3+build.5", "v1.2.3-rc.1"]
        );
        let tags = semver_tags_from_attestations(&repo(), &statements);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag.as_deref(), Some("v1.2.3-rc.1"));
    }

    #[test]
    fn test_no_statements() {
        assert!(semver_tag_names(&[]).is_empty());
    }

    #[test]
    fn test_non_git_provider() {
        let statements = [git_statement_with(vec!["hg"], "", &["v1.0.0"])];
        assert!(semver_tag_names(&statements).is_empty());
    }

    #[test]
    fn test_multiple_providers() {
        let statements = [git_statement_with(vec!["git", "hg"], "", &["v1.0.0"])];
        assert!(semver_tag_names(&statements).is_empty());
    }

    #[test]
    fn test_ambiguous_statements() {
        let statements = [
            git_statement("", &["v1.0.0"]),
            git_statement("", &["v2.0.0"]),
        ];
        assert!(semver_tag_names(&statements).is_empty());
    }

    #[test]
    fn test_other_predicates_are_ignored() {
        let other = Statement {
            subject: vec![],
            predicate: Predicate::Other {
                predicate_type: "example.com/Images/v1".to_string(),
                body: serde_json::Value::Null,
            },
        };
        let statements = [other, git_statement("", &["v3.0.0"])];
        assert_eq!(semver_tag_names(&statements), vec!["v3.0.0"]);
    }

    #[test]
    fn test_empty_or_foreign_entry_group() {
        let mut empty = git_statement("", &["v1.0.0"]);
        if let Predicate::ManifestDir(ref mut contents) = empty.predicate {
            contents.vcs_entries.entry_groups = vec![vec![]];
        }
        assert!(semver_tag_names(&[empty]).is_empty());

        let mut foreign = git_statement("", &["v1.0.0"]);
        if let Predicate::ManifestDir(ref mut contents) = foreign.predicate {
            contents.vcs_entries.entry_groups =
                vec![vec![PathSummary::Unknown(serde_json::json!({"path": ""}))]];
        }
        assert!(semver_tag_names(&[foreign]).is_empty());
    }

    #[test]
    fn test_is_valid_semver() {
        for valid in ["v1", "v1.2", "v1.2.3", "v0.0.1", "v1.2.3-rc.1", "v1.2.3-0a", "v1.2.3+meta-1"] {
            assert!(is_valid_semver(valid), "{} should be valid", valid);
        }
        for invalid in [
            "1.2.3", "v", "v1.2.3.4", "v01", "v1.02", "v1.2-rc", "v1+b", "v1.2.3-", "v1.2.3-01",
            "v1.2.3+", "v1.2.3-a..b", "vx.y.z",
        ] {
            assert!(!is_valid_semver(invalid), "{} should be invalid", invalid);
        }
    }
}
