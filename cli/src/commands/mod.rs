//! CLI command definitions and dispatch.

mod fetch;
mod package;
mod tags;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tape_core::ClientConfig;
use tape_oci::{Client, RegistryAuth};

/// Tape - package Kubernetes manifests as OCI artefacts.
#[derive(Parser)]
#[command(name = "tape", version, about)]
pub struct Cli {
    /// Client configuration file (YAML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Prefix of content-derived tags (overrides configuration)
    #[arg(long, global = true)]
    pub tag_prefix: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Package a manifest directory and push it to a registry
    Package(package::PackageArgs),
    /// List or extract the layers of a pushed artefact
    Fetch(fetch::FetchArgs),
    /// Print the semver tags derived from an attestations file
    Tags(tags::TagsArgs),
}

/// Resolve configuration: file (or defaults), then environment, then flags.
pub(crate) fn load_config(
    path: Option<&PathBuf>,
    tag_prefix: Option<String>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    let mut config = config.with_env_overrides()?;
    if let Some(prefix) = tag_prefix {
        config = config.with_tag_prefix(prefix);
        config.validate()?;
    }
    Ok(config)
}

/// Client for network registries with credentials from the environment.
pub(crate) fn registry_client(config: ClientConfig) -> Client {
    Client::with_auth(RegistryAuth::from_env(), config)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_ref(), cli.tag_prefix)?;
    match cli.command {
        Command::Package(args) => package::execute(args, config).await,
        Command::Fetch(args) => fetch::execute(args, config).await,
        Command::Tags(args) => tags::execute(args, config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_reports_crate_version() {
        let cmd = Cli::command();
        assert_eq!(cmd.get_version(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_load_config_flag_overrides_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("tape.yaml");
        std::fs::write(&path, "tag_prefix: \"file-\"\n").unwrap();

        let config = load_config(Some(&path), Some("cfg-".to_string())).unwrap();
        assert_eq!(config.tag_prefix, "cfg-");
    }

    #[test]
    fn test_load_config_rejects_invalid_prefix() {
        assert!(load_config(None, Some("-bad".to_string())).is_err());
    }

    #[test]
    fn test_parse_package_command() {
        let cli = Cli::parse_from([
            "tape",
            "--tag-prefix",
            "cfg-",
            "package",
            "./podinfo",
            "ghcr.io/org/podinfo",
            "--attestations",
            "statements.jsonl",
        ]);
        assert_eq!(cli.tag_prefix.as_deref(), Some("cfg-"));
        assert!(matches!(cli.command, Command::Package(_)));
    }
}
