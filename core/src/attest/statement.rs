//! In-toto style attestation statements.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use super::vcs::VcsEntries;
use crate::error::{Result, TapeError};

/// Statement type written into every statement.
pub const STATEMENT_TYPE: &str = "https://in-toto.io/Statement/v0.1";

/// Predicate type of manifest directory attestations.
pub const MANIFEST_DIR_PREDICATE_TYPE: &str = "docker.com/tape/ManifestDir/v0.2";

/// A subject of a statement: a file and its digests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    #[serde(default)]
    pub digest: BTreeMap<String, String>,
}

impl Subject {
    pub fn sha256(name: impl Into<String>, hex_digest: impl Into<String>) -> Self {
        let mut digest = BTreeMap::new();
        digest.insert("sha256".to_string(), hex_digest.into());
        Self {
            name: name.into(),
            digest,
        }
    }
}

/// Predicate of a manifest directory attestation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirContents {
    #[serde(default)]
    pub vcs_entries: VcsEntries,
}

/// Statement predicate, keyed by predicate type.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    ManifestDir(DirContents),
    Other {
        predicate_type: String,
        body: serde_json::Value,
    },
}

impl Predicate {
    pub fn predicate_type(&self) -> &str {
        match self {
            Predicate::ManifestDir(_) => MANIFEST_DIR_PREDICATE_TYPE,
            Predicate::Other { predicate_type, .. } => predicate_type,
        }
    }
}

/// An attestation statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStatement", into = "RawStatement")]
pub struct Statement {
    pub subject: Vec<Subject>,
    pub predicate: Predicate,
}

impl Statement {
    /// A manifest directory statement over `subject`.
    pub fn manifest_dir(subject: Vec<Subject>, contents: DirContents) -> Self {
        Self {
            subject,
            predicate: Predicate::ManifestDir(contents),
        }
    }

    pub fn predicate_type(&self) -> &str {
        self.predicate.predicate_type()
    }

    /// Manifest directory predicate, if this is a manifest directory statement.
    pub fn dir_contents(&self) -> Option<&DirContents> {
        match &self.predicate {
            Predicate::ManifestDir(contents) => Some(contents),
            Predicate::Other { .. } => None,
        }
    }
}

/// Wire form of a statement.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawStatement {
    #[serde(rename = "_type")]
    statement_type: String,
    #[serde(default)]
    subject: Vec<Subject>,
    predicate_type: String,
    #[serde(default)]
    predicate: serde_json::Value,
}

impl TryFrom<RawStatement> for Statement {
    type Error = serde_json::Error;

    fn try_from(raw: RawStatement) -> std::result::Result<Self, Self::Error> {
        let predicate = if raw.predicate_type == MANIFEST_DIR_PREDICATE_TYPE {
            Predicate::ManifestDir(serde_json::from_value(raw.predicate)?)
        } else {
            Predicate::Other {
                predicate_type: raw.predicate_type,
                body: raw.predicate,
            }
        };
        Ok(Statement {
            subject: raw.subject,
            predicate,
        })
    }
}

impl From<Statement> for RawStatement {
    fn from(statement: Statement) -> Self {
        let (predicate_type, predicate) = match statement.predicate {
            Predicate::ManifestDir(contents) => (
                MANIFEST_DIR_PREDICATE_TYPE.to_string(),
                serde_json::to_value(contents).unwrap_or(serde_json::Value::Null),
            ),
            Predicate::Other {
                predicate_type,
                body,
            } => (predicate_type, body),
        };
        RawStatement {
            statement_type: STATEMENT_TYPE.to_string(),
            subject: statement.subject,
            predicate_type,
            predicate,
        }
    }
}

/// Statements whose predicate type equals `predicate_type`.
pub fn filter_by_predicate_type<'a>(
    predicate_type: &str,
    statements: &'a [Statement],
) -> Vec<&'a Statement> {
    statements
        .iter()
        .filter(|s| s.predicate_type() == predicate_type)
        .collect()
}

/// Compact description of a statement list, stored as a manifest annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryAnnotation {
    pub num_statements: usize,
    pub predicate_types: Vec<String>,
    pub subjects: Vec<String>,
}

/// A borrowed list of statements.
#[derive(Debug, Clone, Copy)]
pub struct Statements<'a>(pub &'a [Statement]);

impl<'a> Statements<'a> {
    /// Write statements as JSON lines.
    pub fn encode<W: Write>(&self, mut writer: W) -> Result<()> {
        for statement in self.0 {
            serde_json::to_writer(&mut writer, statement)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read statements from JSON lines, skipping blank lines.
    pub fn decode<R: BufRead>(reader: R) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let statement = serde_json::from_str(&line).map_err(|e| {
                TapeError::Serialization(format!("statement on line {}: {}", n + 1, e))
            })?;
            statements.push(statement);
        }
        Ok(statements)
    }

    /// Summary of the statements with predicate types and subject names
    /// deduplicated in first-seen order.
    pub fn summary(&self) -> SummaryAnnotation {
        let mut predicate_types: Vec<String> = Vec::new();
        let mut subjects: Vec<String> = Vec::new();
        for statement in self.0 {
            let predicate_type = statement.predicate_type();
            if !predicate_types.iter().any(|t| t == predicate_type) {
                predicate_types.push(predicate_type.to_string());
            }
            for subject in &statement.subject {
                if !subjects.contains(&subject.name) {
                    subjects.push(subject.name.clone());
                }
            }
        }
        SummaryAnnotation {
            num_statements: self.0.len(),
            predicate_types,
            subjects,
        }
    }

    /// Summary serialised as compact JSON.
    pub fn marshal_summary_annotation(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.summary())?)
    }
}
