//! Download images command implementation.
//!
//! Pulls the artifacts of a bundles manifest from their registries and
//! writes them to a single archive for disconnected installs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use anywhere_registry::{OciLayout, RegistryCache};
use anywhere_transfer::{
    ConcurrentProcessor, DiskDestination, ImageMover, OriginalRegistrySource, Parallel, DEFAULT_MAX_ROUTINES,
};

use super::{cancel_on_ctrl_c, load_bundle, load_mirror, path_arg, RegistryAuthArgs, SelectionArgs};

/// Arguments for the download images command.
#[derive(Args, Debug)]
pub struct DownloadImagesArgs {
    /// Bundles manifest listing the artifacts to download
    #[arg(short, long)]
    pub bundle: PathBuf,

    /// Archive to write; `.tar.gz` or `.tgz` is compressed
    #[arg(short, long)]
    pub output: PathBuf,

    #[command(flatten)]
    pub selection: SelectionArgs,

    /// CA certificate file for the source registries
    #[arg(long)]
    pub src_cert: Option<PathBuf>,

    /// Skip TLS verification against the source registries
    #[arg(long)]
    pub insecure: bool,

    /// Maximum number of concurrent pulls
    #[arg(long, default_value_t = DEFAULT_MAX_ROUTINES)]
    pub max_concurrency: usize,

    /// Registry mirror configuration to pull the artifacts through
    #[arg(long)]
    pub mirror_config: Option<PathBuf>,

    #[command(flatten)]
    pub auth: RegistryAuthArgs,
}

/// Runs the download images command.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read, an artifact cannot be
/// pulled, or the archive cannot be written.
pub async fn execute(args: DownloadImagesArgs) -> Result<()> {
    let references = args.selection.references(&load_bundle(&args.bundle)?);
    let mirror = load_mirror(args.mirror_config.as_deref())?;
    info!(artifacts = references.len(), output = %args.output.display(), "downloading images");

    let staging = tempfile::tempdir().context("creating staging directory")?;
    let layout = Arc::new(OciLayout::create(staging.path()).context("creating staging layout")?);
    let cache = Arc::new(RegistryCache::new(Arc::new(args.auth.credential_store(None)?)));

    let source = OriginalRegistrySource::new(cache, Arc::clone(&layout))
        .with_cert_file(path_arg(args.src_cert.as_deref()))
        .with_insecure(args.insecure)
        .with_mirror(mirror);
    let mover = ImageMover::new(
        Parallel::new(source, ConcurrentProcessor::with_max_routines(args.max_concurrency)),
        DiskDestination::new(layout, &args.output),
    );

    mover
        .move_images(&cancel_on_ctrl_c(), &references)
        .await
        .with_context(|| format!("downloading images to {}", args.output.display()))?;

    println!("Downloaded {} artifacts to {}", references.len(), args.output.display());
    Ok(())
}
