//! `tape tags` command - Print the tags a push would create.

use std::path::PathBuf;

use clap::Args;
use tape_core::attest::{AttestationProducer, StatementFile};
use tape_core::ClientConfig;
use tape_oci::tags::short_tag_name;
use tape_oci::{semver_tags_from_attestations, ImageReference};

#[derive(Args)]
pub struct TagsArgs {
    /// Destination repository (e.g., "ghcr.io/org/manifests")
    pub repository: String,

    /// JSON-lines file of attestation statements
    pub attestations: PathBuf,

    /// Also print the short tag for this content hash
    #[arg(long)]
    pub hash: Option<String>,
}

pub async fn execute(args: TagsArgs, config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let repository = ImageReference::parse_repository(&args.repository)?;
    let statements = StatementFile::load(&args.attestations)?.statements();

    for tag in semver_tags_from_attestations(&repository, &statements) {
        println!("{}", tag);
    }
    if let Some(ref hash) = args.hash {
        println!(
            "{}",
            repository.with_tag(short_tag_name(&config.tag_prefix, hash))?
        );
    }
    Ok(())
}
