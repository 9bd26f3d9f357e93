//! CLI commands and argument parsing.

pub mod copy;
pub mod download;
pub mod import;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use anywhere_core::{ArtifactList, RegistryMirror, RegistryMirrorConfiguration};
use anywhere_registry::{Credential, CredentialStore};

/// Anywhere - artifact mover for disconnected cluster installs
#[derive(Parser)]
#[command(name = "anywhere")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Copy artifacts between registries
    Copy {
        #[command(subcommand)]
        command: CopyCommands,
    },

    /// Download artifacts to a local archive
    Download {
        #[command(subcommand)]
        command: DownloadCommands,
    },

    /// Import artifacts from a local archive into a registry
    Import {
        #[command(subcommand)]
        command: ImportCommands,
    },

    /// Print version information
    Version,
}

/// `copy` subcommands.
#[derive(Subcommand)]
pub enum CopyCommands {
    /// Copy every artifact of a bundles manifest to a registry
    Packages(copy::PackagesArgs),
}

/// `download` subcommands.
#[derive(Subcommand)]
pub enum DownloadCommands {
    /// Download the images of a bundles manifest into an archive
    Images(download::DownloadImagesArgs),
}

/// `import` subcommands.
#[derive(Subcommand)]
pub enum ImportCommands {
    /// Push the images of an archive to a registry mirror
    Images(import::ImportImagesArgs),
}

/// Registry credential flags.
#[derive(Args, Debug, Clone, Default)]
pub struct RegistryAuthArgs {
    /// Directory holding the docker `config.json` credential store
    #[arg(long, env = "DOCKER_CONFIG")]
    pub docker_config: Option<PathBuf>,

    /// Username for the destination registry
    #[arg(long, env = "REGISTRY_USERNAME")]
    pub username: Option<String>,

    /// Password for the destination registry
    #[arg(long, env = "REGISTRY_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl RegistryAuthArgs {
    /// Loads the credential store, pinning the username/password to `host`
    /// when both are given.
    pub fn credential_store(&self, host: Option<&str>) -> Result<CredentialStore> {
        let store = CredentialStore::from_default_location(self.docker_config.as_deref())
            .context("loading registry credentials")?;

        match (host, &self.username, &self.password) {
            (Some(host), Some(username), Some(password)) => {
                Ok(store.with_credential(host, Credential::basic(username, password)))
            }
            (Some(host), Some(_), None) | (Some(host), None, Some(_)) => {
                warn!(host, "need both username and password, ignoring the one given");
                Ok(store)
            }
            _ => Ok(store),
        }
    }
}

/// Which artifacts of the bundles manifest to process.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct SelectionArgs {
    /// Only process Helm charts
    #[arg(long, conflicts_with = "images_only")]
    pub charts_only: bool,

    /// Only process container images
    #[arg(long)]
    pub images_only: bool,
}

impl SelectionArgs {
    /// Returns the selected references, deduplicated.
    pub fn references(self, artifacts: &ArtifactList) -> Vec<String> {
        if self.charts_only {
            artifacts.chart_references()
        } else if self.images_only {
            artifacts.image_references()
        } else {
            artifacts.references()
        }
    }
}

/// Reads the bundles manifest listing the artifacts to move.
pub fn load_bundle(path: &Path) -> Result<ArtifactList> {
    ArtifactList::from_file(path).with_context(|| format!("reading bundles manifest {}", path.display()))
}

/// Reads an optional registry mirror configuration file.
pub fn load_mirror(path: Option<&Path>) -> Result<Option<RegistryMirror>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let config = RegistryMirrorConfiguration::from_file(path)
        .with_context(|| format!("reading registry mirror configuration {}", path.display()))?;
    Ok(RegistryMirror::from_configuration(Some(&config)))
}

/// Returns the `host[:port]` part of a registry location.
pub fn registry_host(location: &str) -> &str {
    location.split_once('/').map_or(location, |(host, _)| host)
}

/// Splits `host[:port][/project]` into host and project.
pub fn split_destination(destination: &str) -> (&str, &str) {
    let destination = destination.trim_end_matches('/');
    destination.split_once('/').unwrap_or((destination, ""))
}

/// Converts an optional path flag to the string form registry clients are keyed by.
pub fn path_arg(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string()).unwrap_or_default()
}

/// Returns a token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping after in-flight transfers");
            trigger.cancel();
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_destination() {
        assert_eq!(split_destination("harbor.local:30003"), ("harbor.local:30003", ""));
        assert_eq!(
            split_destination("harbor.local:30003/eks-anywhere/"),
            ("harbor.local:30003", "eks-anywhere")
        );
        assert_eq!(split_destination("harbor.local/a/b"), ("harbor.local", "a/b"));
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("1.2.3.4:443/eks-anywhere"), "1.2.3.4:443");
        assert_eq!(registry_host("harbor.local"), "harbor.local");
    }

    #[test]
    fn test_load_mirror() {
        assert!(load_mirror(None).unwrap().is_none());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "endpoint: 1.2.3.4\nport: \"443\"\nociNamespaces:\n  - registry: public.ecr.aws\n    namespace: eks-anywhere"
        )
        .unwrap();
        let mirror = load_mirror(Some(file.path())).unwrap().unwrap();
        assert_eq!(mirror.base_registry(), "1.2.3.4:443");
        assert_eq!(mirror.core_eksa_mirror(), "1.2.3.4:443/eks-anywhere");
    }

    #[test]
    fn test_parse_copy_packages() {
        let cli = Cli::try_parse_from([
            "anywhere",
            "copy",
            "packages",
            "harbor.local/eks-anywhere",
            "--bundle",
            "bundles.yaml",
            "--dry-run",
            "--max-concurrency",
            "4",
        ])
        .unwrap();
        let Commands::Copy {
            command: CopyCommands::Packages(args),
        } = cli.command
        else {
            panic!("expected copy packages");
        };
        assert_eq!(args.destination, "harbor.local/eks-anywhere");
        assert!(args.dry_run);
        assert_eq!(args.max_concurrency, 4);
    }

    #[test]
    fn test_selection_flags_conflict() {
        let result = Cli::try_parse_from([
            "anywhere",
            "download",
            "images",
            "--bundle",
            "bundles.yaml",
            "--output",
            "images.tar",
            "--charts-only",
            "--images-only",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_import_needs_registry_or_mirror_config() {
        let missing = Cli::try_parse_from([
            "anywhere", "import", "images", "--bundle", "b.yaml", "--input", "images.tar",
        ]);
        assert!(missing.is_err());

        let with_config = Cli::try_parse_from([
            "anywhere",
            "import",
            "images",
            "--bundle",
            "b.yaml",
            "--input",
            "images.tar",
            "--mirror-config",
            "mirror.yaml",
        ]);
        assert!(with_config.is_ok());
    }
}
