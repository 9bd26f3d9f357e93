//! Where artifacts are loaded from.
//!
//! An [`ImageSource`] brings a set of references into the local OCI layout
//! shared with the destination side of a move.

use std::path::PathBuf;
use std::sync::Arc;

use anywhere_core::{replace_registry, Artifact, RegistryMirror};
use anywhere_registry::{OciLayout, RegistryCache, Storage};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::archive;
use crate::error::{Result, TransferError};

/// Tag resolved when a reference carries neither tag nor digest.
const DEFAULT_TAG: &str = "latest";

/// Loads artifacts into local state.
///
/// Implementations process references one after another and stop at the
/// first failure. An empty reference list is a successful no-op.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Loads `references`.
    async fn load(&self, cancel: &CancellationToken, references: &[String]) -> Result<()>;
}

#[async_trait]
impl<T: ImageSource + ?Sized> ImageSource for Arc<T> {
    async fn load(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        (**self).load(cancel, references).await
    }
}

/// Pulls each reference from its origin registry into an [`OciLayout`].
///
/// The layout entry is named by the reference exactly as requested, so the
/// destination side can find it by the same string.
#[derive(Debug)]
pub struct OriginalRegistrySource {
    cache: Arc<RegistryCache>,
    layout: Arc<OciLayout>,
    cert_file: String,
    insecure: bool,
    mirror: Option<RegistryMirror>,
}

impl OriginalRegistrySource {
    /// Creates a source pulling into `layout` with clients from `cache`.
    #[must_use]
    pub const fn new(cache: Arc<RegistryCache>, layout: Arc<OciLayout>) -> Self {
        Self {
            cache,
            layout,
            cert_file: String::new(),
            insecure: false,
            mirror: None,
        }
    }

    /// Trust the CA certificates in `cert_file` for the origin registries.
    #[must_use]
    pub fn with_cert_file(mut self, cert_file: impl Into<String>) -> Self {
        self.cert_file = cert_file.into();
        self
    }

    /// Skip TLS verification for the origin registries.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Pull through `mirror` instead of the origin registry.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Option<RegistryMirror>) -> Self {
        self.mirror = mirror;
        self
    }

    #[instrument(skip(self), fields(layout = %self.layout.root().display()))]
    async fn pull(&self, reference: &str) -> Result<()> {
        let wrap = |source| TransferError::Pull {
            reference: reference.to_string(),
            source,
        };

        let artifact = Artifact::parse(&replace_registry(self.mirror.as_ref(), reference));
        let client = self
            .cache
            .get(artifact.registry(), &self.cert_file, self.insecure)
            .map_err(wrap)?;
        let repo = client.get_storage(&artifact).map_err(wrap)?;

        let version = match artifact.reference() {
            "" => DEFAULT_TAG,
            version => version,
        };
        let desc = client.resolve(&repo, version).await.map_err(wrap)?;
        let report = client
            .copy_graph(&repo, self.layout.as_ref(), &desc)
            .await
            .map_err(wrap)?;
        self.layout.tag(&desc, reference).await.map_err(wrap)?;

        debug!(
            digest = %desc.digest,
            copied = report.copied,
            skipped = report.skipped,
            "pulled artifact"
        );
        Ok(())
    }
}

#[async_trait]
impl ImageSource for OriginalRegistrySource {
    async fn load(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        for reference in references {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            self.pull(reference).await?;
        }
        Ok(())
    }
}

/// Loads everything in an archive written by
/// [`DiskDestination`](crate::DiskDestination).
///
/// The archive is self-describing, so the reference list only decides
/// whether anything is loaded at all.
#[derive(Debug)]
pub struct DiskSource {
    layout: Arc<OciLayout>,
    archive: PathBuf,
}

impl DiskSource {
    /// Creates a source importing `archive` into `layout`.
    #[must_use]
    pub fn new(layout: Arc<OciLayout>, archive: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            archive: archive.into(),
        }
    }
}

#[async_trait]
impl ImageSource for DiskSource {
    async fn load(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        if references.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let imported = archive::import(&self.archive, &self.layout).await?;
        info!(archive = %self.archive.display(), artifacts = imported, "loaded archive");
        Ok(())
    }
}
