//! Import images command implementation.
//!
//! Loads an archive written by `download images` and pushes its artifacts
//! to a registry mirror.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use anywhere_core::RegistryMirror;
use anywhere_registry::{OciLayout, RegistryCache};
use anywhere_transfer::{
    ConcurrentProcessor, DiskSource, ImageMover, Parallel, RegistryDestination, DEFAULT_MAX_ROUTINES,
};

use super::{cancel_on_ctrl_c, load_bundle, load_mirror, path_arg, registry_host, RegistryAuthArgs, SelectionArgs};

/// Arguments for the import images command.
#[derive(Args, Debug)]
pub struct ImportImagesArgs {
    /// Bundles manifest listing the artifacts to push
    #[arg(short, long)]
    pub bundle: PathBuf,

    /// Archive written by `download images`
    #[arg(short, long)]
    pub input: PathBuf,

    /// Registry mirror endpoint, `host[:port]`
    #[arg(short, long, required_unless_present = "mirror_config")]
    pub registry: Option<String>,

    /// Registry mirror configuration; takes precedence over --registry
    #[arg(long)]
    pub mirror_config: Option<PathBuf>,

    /// CA certificate file for the mirror
    #[arg(long)]
    pub ca_cert: Option<PathBuf>,

    /// Skip TLS verification against the mirror
    #[arg(long)]
    pub insecure: bool,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Maximum number of concurrent pushes
    #[arg(long, default_value_t = DEFAULT_MAX_ROUTINES)]
    pub max_concurrency: usize,

    #[command(flatten)]
    pub auth: RegistryAuthArgs,
}

/// Runs the import images command.
///
/// # Errors
///
/// Returns an error if the archive cannot be loaded or an artifact cannot
/// be pushed.
pub async fn execute(args: ImportImagesArgs) -> Result<()> {
    let references = args.selection.references(&load_bundle(&args.bundle)?);
    let mirror = match (load_mirror(args.mirror_config.as_deref())?, &args.registry) {
        (Some(mirror), _) => mirror,
        (None, Some(registry)) => RegistryMirror::new(registry.as_str()),
        (None, None) => anyhow::bail!("either --registry or --mirror-config is required"),
    };
    info!(
        artifacts = references.len(),
        input = %args.input.display(),
        mirror = %mirror.base_registry(),
        "importing images"
    );

    // A CA from the mirror configuration is only used when no file is given.
    let ca_file = match (&args.ca_cert, mirror.ca_cert_content()) {
        (None, Some(pem)) => {
            let mut file = tempfile::NamedTempFile::new().context("writing mirror CA certificate")?;
            file.write_all(pem.as_bytes())
                .context("writing mirror CA certificate")?;
            Some(file)
        }
        _ => None,
    };
    let cert_file = ca_file
        .as_ref()
        .map_or_else(|| path_arg(args.ca_cert.as_deref()), |f| f.path().display().to_string());
    let insecure = args.insecure || mirror.insecure_skip_verify();

    let host = registry_host(mirror.base_registry()).to_string();
    let cache = Arc::new(RegistryCache::new(Arc::new(args.auth.credential_store(Some(&host))?)));

    let staging = tempfile::tempdir().context("creating staging directory")?;
    let layout = Arc::new(OciLayout::create(staging.path()).context("creating staging layout")?);

    let destination = RegistryDestination::new(cache, Arc::clone(&layout), mirror)
        .with_cert_file(cert_file)
        .with_insecure(insecure);
    let mover = ImageMover::new(
        DiskSource::new(layout, &args.input),
        Parallel::new(destination, ConcurrentProcessor::with_max_routines(args.max_concurrency)),
    );

    mover
        .move_images(&cancel_on_ctrl_c(), &references)
        .await
        .with_context(|| format!("importing images from {}", args.input.display()))?;

    println!("Imported {} artifacts into {host}", references.len());
    Ok(())
}
