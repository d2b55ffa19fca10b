//! `tape package` command - Package a manifest directory and push it.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;
use tape_core::attest::{AttestationProducer, StatementFile, StatementFileDetector, VcsDetector};
use tape_core::{ClientConfig, PackageRefs, Statement, TapeError};

/// Statements file looked up beside the source directory when no file is given.
pub(crate) const DEFAULT_ATTESTATIONS_FILE: &str = ".tape-attestations.jsonl";

#[derive(Args)]
pub struct PackageArgs {
    /// Directory of manifests to package
    pub source_dir: PathBuf,

    /// Destination repository (e.g., "ghcr.io/org/manifests")
    pub destination: String,

    /// JSON-lines file of attestation statements
    #[arg(long)]
    pub attestations: Option<PathBuf>,

    /// Creation timestamp (RFC 3339), defaults to now
    #[arg(long)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Print the resulting references as JSON
    #[arg(long)]
    pub json: bool,

    /// Only print the digest
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: PackageArgs,
    config: ClientConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let statements = load_statements(&args)?;
    let client = super::registry_client(config);

    if !args.quiet && !args.json {
        println!(
            "Packaging {} into {}...",
            args.source_dir.display(),
            args.destination
        );
    }

    let refs = match client
        .push_artefact(&args.destination, &args.source_dir, args.timestamp, &statements)
        .await
    {
        Ok(refs) => refs,
        Err(TapeError::AliasTagging { refs, failed, source }) => {
            // The index itself is in the registry; report what was pushed.
            print_refs(&refs, &args)?;
            return Err(Box::new(TapeError::AliasTagging {
                refs,
                failed,
                source,
            }));
        }
        Err(e) => return Err(e.into()),
    };

    print_refs(&refs, &args)
}

fn load_statements(args: &PackageArgs) -> Result<Vec<Statement>, Box<dyn std::error::Error>> {
    let producer: Option<Box<dyn AttestationProducer>> = match args.attestations {
        Some(ref path) => Some(Box::new(StatementFile::load(path)?)),
        None => match attestations_dir(&args.source_dir) {
            Some(dir) => StatementFileDetector::new(DEFAULT_ATTESTATIONS_FILE).detect(&dir)?,
            None => None,
        },
    };

    let Some(producer) = producer else {
        return Ok(Vec::new());
    };
    if let Some(summary) = producer.base_dir_summary() {
        tracing::info!(path = ?summary.path(), "Using attestations for base directory");
    }
    Ok(producer.statements())
}

/// Parent of the source directory, so the statements never land in the content layer.
fn attestations_dir(source_dir: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(source_dir)
        .ok()?
        .parent()
        .map(Path::to_path_buf)
}

fn print_refs(refs: &PackageRefs, args: &PackageArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(refs)?);
    } else if args.quiet {
        println!("{}", refs.digest);
    } else {
        println!("Pushed: {}", refs);
        println!("  primary: {}", refs.primary);
        for tag in &refs.semver {
            println!("  semver:  {}", tag);
        }
    }
    Ok(())
}
