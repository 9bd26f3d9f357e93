//! Where artifacts are written to.
//!
//! An [`ImageDestination`] takes references already present in the local
//! OCI layout and delivers them to a registry or an archive.

use std::path::PathBuf;
use std::sync::Arc;

use anywhere_core::{Artifact, RegistryMirror};
use anywhere_registry::{OciLayout, RegistryCache, Storage};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::archive;
use crate::error::{Result, TransferError};

/// Writes artifacts from local state.
///
/// Implementations process references one after another and stop at the
/// first failure. An empty reference list is a successful no-op.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    /// Writes `references`.
    async fn write(&self, cancel: &CancellationToken, references: &[String]) -> Result<()>;
}

#[async_trait]
impl<T: ImageDestination + ?Sized> ImageDestination for Arc<T> {
    async fn write(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        (**self).write(cancel, references).await
    }
}

/// Pushes references from an [`OciLayout`] to a registry mirror.
///
/// Each reference is addressed with [`RegistryMirror::redirect`], so it
/// always lands on the mirror. The tag is pushed when the reference has one.
#[derive(Debug)]
pub struct RegistryDestination {
    cache: Arc<RegistryCache>,
    layout: Arc<OciLayout>,
    mirror: RegistryMirror,
    cert_file: String,
    insecure: bool,
}

impl RegistryDestination {
    /// Creates a destination pushing from `layout` to `mirror`.
    #[must_use]
    pub const fn new(cache: Arc<RegistryCache>, layout: Arc<OciLayout>, mirror: RegistryMirror) -> Self {
        Self {
            cache,
            layout,
            mirror,
            cert_file: String::new(),
            insecure: false,
        }
    }

    /// Trust the CA certificates in `cert_file` for the mirror.
    #[must_use]
    pub fn with_cert_file(mut self, cert_file: impl Into<String>) -> Self {
        self.cert_file = cert_file.into();
        self
    }

    /// Skip TLS verification for the mirror.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Returns where `reference` is pushed.
    #[must_use]
    pub fn target(&self, reference: &str) -> String {
        self.mirror.redirect(reference)
    }

    #[instrument(skip(self))]
    async fn push(&self, reference: &str) -> Result<()> {
        let target = self.target(reference);
        let wrap = |source| TransferError::Push {
            reference: reference.to_string(),
            destination: target.clone(),
            source,
        };

        let desc = self.layout.resolve(reference).await.map_err(wrap)?;
        let artifact = Artifact::parse(&target);
        let client = self
            .cache
            .get(artifact.registry(), &self.cert_file, self.insecure)
            .map_err(wrap)?;
        let repo = client.get_storage(&artifact).map_err(wrap)?;

        if client.options().dry_run {
            info!(digest = %desc.digest, destination = %target, "dry run, skipping push");
            return Ok(());
        }

        let report = client
            .copy_graph(self.layout.as_ref(), &repo, &desc)
            .await
            .map_err(wrap)?;
        if !artifact.tag().is_empty() {
            repo.tag(&desc, artifact.tag()).await.map_err(wrap)?;
        }

        debug!(
            destination = %target,
            copied = report.copied,
            skipped = report.skipped,
            "pushed artifact"
        );
        Ok(())
    }
}

#[async_trait]
impl ImageDestination for RegistryDestination {
    async fn write(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        for reference in references {
            if cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            self.push(reference).await?;
        }
        Ok(())
    }
}

/// Exports references from an [`OciLayout`] into a tar archive.
///
/// The archive is gzip-compressed when its name ends in `.gz` or `.tgz`.
#[derive(Debug)]
pub struct DiskDestination {
    layout: Arc<OciLayout>,
    archive: PathBuf,
}

impl DiskDestination {
    /// Creates a destination exporting `layout` to `archive`.
    #[must_use]
    pub fn new(layout: Arc<OciLayout>, archive: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            archive: archive.into(),
        }
    }
}

#[async_trait]
impl ImageDestination for DiskDestination {
    async fn write(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        if references.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let blobs = archive::export(&self.layout, references, &self.archive).await?;
        info!(
            archive = %self.archive.display(),
            artifacts = references.len(),
            blobs,
            "wrote archive"
        );
        Ok(())
    }
}
