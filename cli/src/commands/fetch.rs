//! `tape fetch` command - List or extract the layers of an artefact.

use std::path::PathBuf;

use clap::{Args, ValueEnum};
use tape_core::ClientConfig;
use tape_oci::{ImageReference, MediaType};

/// Layer kinds selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayerKind {
    Content,
    Attest,
}

impl From<LayerKind> for MediaType {
    fn from(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Content => MediaType::Content,
            LayerKind::Attest => MediaType::Attest,
        }
    }
}

#[derive(Args)]
pub struct FetchArgs {
    /// Artefact reference with tag or digest (e.g., "ghcr.io/org/manifests:v1.0.0")
    pub reference: String,

    /// Only select layers of this kind (repeatable)
    #[arg(long = "type", value_enum)]
    pub types: Vec<LayerKind>,

    /// Extract content layers into this directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print attestation statements as JSON lines
    #[arg(long)]
    pub statements: bool,
}

pub async fn execute(args: FetchArgs, config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let reference = ImageReference::parse(&args.reference)?;
    let client = super::registry_client(config);

    let media_types: Vec<MediaType> = args.types.iter().copied().map(MediaType::from).collect();
    let artefacts = client.fetch(&reference, &media_types).await?;

    if artefacts.is_empty() {
        println!("No matching layers in {}", reference);
        return Ok(());
    }

    for artefact in &artefacts {
        println!("{}  {}  {}", artefact.digest(), artefact.size(), artefact.media_type());

        match artefact.media_type() {
            MediaType::Content => {
                if let Some(ref output) = args.output {
                    artefact.unpack(output).await?;
                    println!("  extracted to {}", output.display());
                }
            }
            MediaType::Attest if args.statements => {
                for statement in artefact.statements().await? {
                    println!("{}", serde_json::to_string(&statement)?);
                }
            }
            _ => {}
        }
    }

    Ok(())
}
