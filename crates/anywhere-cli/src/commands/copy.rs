//! Copy packages command implementation.
//!
//! Copies every artifact listed in a bundles manifest from its registry
//! straight into a destination registry.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use anywhere_core::Artifact;
use anywhere_registry::{ClientOptions, OciRegistryClient, RegistryCache};
use anywhere_transfer::{ConcurrentProcessor, RegistryCopier, DEFAULT_MAX_ROUTINES};

use super::{cancel_on_ctrl_c, load_bundle, load_mirror, path_arg, split_destination, RegistryAuthArgs};

/// Arguments for the copy packages command.
#[derive(Args, Debug)]
pub struct PackagesArgs {
    /// Destination registry, `host[:port]` optionally followed by a project path
    pub destination: String,

    /// Bundles manifest listing the artifacts to copy
    #[arg(short, long)]
    pub bundle: PathBuf,

    /// CA certificate file for the source registries
    #[arg(long)]
    pub src_cert: Option<PathBuf>,

    /// CA certificate file for the destination registry
    #[arg(long)]
    pub dst_cert: Option<PathBuf>,

    /// Skip TLS verification against source and destination registries
    #[arg(long)]
    pub insecure: bool,

    /// Resolve artifacts without uploading anything
    #[arg(long)]
    pub dry_run: bool,

    /// Maximum number of concurrent copies
    #[arg(long, default_value_t = DEFAULT_MAX_ROUTINES)]
    pub max_concurrency: usize,

    /// Registry mirror configuration to pull the artifacts through
    #[arg(long)]
    pub mirror_config: Option<PathBuf>,

    #[command(flatten)]
    pub auth: RegistryAuthArgs,
}

/// Runs the copy packages command.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read, the destination is
/// invalid, or any artifact fails to copy.
pub async fn execute(args: PackagesArgs) -> Result<()> {
    let artifacts: Vec<Artifact> = load_bundle(&args.bundle)?
        .all()
        .iter()
        .map(Artifact::from_image)
        .collect();
    let mirror = load_mirror(args.mirror_config.as_deref())?;
    let (host, project) = split_destination(&args.destination);

    info!(
        artifacts = artifacts.len(),
        destination = %args.destination,
        dry_run = args.dry_run,
        "copying packages"
    );

    let credentials = Arc::new(args.auth.credential_store(Some(host))?);
    let cache = Arc::new(RegistryCache::new(Arc::clone(&credentials)));

    let mut options = ClientOptions::new(host)
        .with_project(project)
        .with_insecure(args.insecure)
        .with_dry_run(args.dry_run);
    if let Some(cert) = &args.dst_cert {
        options = options.with_cert_file(cert);
    }
    let destination = Arc::new(
        OciRegistryClient::new(options, credentials)
            .with_context(|| format!("initializing destination registry {host}"))?,
    );

    let copier = RegistryCopier::new(
        cache,
        destination,
        ConcurrentProcessor::with_max_routines(args.max_concurrency),
    )
    .with_src_cert_file(path_arg(args.src_cert.as_deref()))
    .with_insecure(args.insecure)
    .with_mirror(mirror);

    let report = copier
        .copy_all(&cancel_on_ctrl_c(), &artifacts)
        .await
        .with_context(|| format!("copying packages to {}", args.destination))?;

    println!(
        "Copied {} artifacts to {}: {} blobs uploaded ({} bytes), {} already present",
        artifacts.len(),
        args.destination,
        report.copied,
        report.bytes,
        report.skipped
    );
    Ok(())
}
