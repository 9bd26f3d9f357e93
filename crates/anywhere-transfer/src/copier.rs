//! Registry-to-registry copy of an artifact list.

use std::sync::Arc;

use anywhere_core::{replace_registry, Artifact, RegistryMirror};
use anywhere_registry::{CopyReport, OciRegistryClient, RegistryCache};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::error::{Result, TransferError};
use crate::mover::dedupe;
use crate::processor::ConcurrentProcessor;

#[derive(Debug, Clone)]
struct CopyContext {
    cache: Arc<RegistryCache>,
    destination: Arc<OciRegistryClient>,
    src_cert_file: String,
    insecure: bool,
    mirror: Option<RegistryMirror>,
}

impl CopyContext {
    async fn copy_one(&self, cancel: &CancellationToken, reference: &str) -> Result<CopyReport> {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }

        let artifact = Artifact::parse(reference);
        let source = Artifact::parse(&replace_registry(self.mirror.as_ref(), reference));
        let client = self
            .cache
            .get(source.registry(), &self.src_cert_file, self.insecure)?;
        let target = artifact.with_registry(self.destination.host());

        let report = client.copy_to(&source, &self.destination, &target).await?;
        debug!(reference, destination = %self.destination.destination(&target), "copied");
        Ok(report)
    }
}

/// Copies artifacts straight from their registries to a destination
/// registry, without staging them on disk.
///
/// Each artifact keeps its repository path under the destination client's
/// project. With a mirror set, artifacts are pulled through the mirror.
#[derive(Debug)]
pub struct RegistryCopier {
    context: CopyContext,
    processor: ConcurrentProcessor,
}

impl RegistryCopier {
    /// Creates a copier writing to `destination`, opening source clients from `cache`.
    #[must_use]
    pub fn new(cache: Arc<RegistryCache>, destination: Arc<OciRegistryClient>, processor: ConcurrentProcessor) -> Self {
        Self {
            context: CopyContext {
                cache,
                destination,
                src_cert_file: String::new(),
                insecure: false,
                mirror: None,
            },
            processor,
        }
    }

    /// Trust the CA certificates in `cert_file` for the source registries.
    #[must_use]
    pub fn with_src_cert_file(mut self, cert_file: impl Into<String>) -> Self {
        self.context.src_cert_file = cert_file.into();
        self
    }

    /// Skip TLS verification for the source registries.
    #[must_use]
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.context.insecure = insecure;
        self
    }

    /// Pull through `mirror` instead of the origin registries.
    #[must_use]
    pub fn with_mirror(mut self, mirror: Option<RegistryMirror>) -> Self {
        self.context.mirror = mirror;
        self
    }

    /// Copies every distinct artifact in `artifacts`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::WorkerFailed`] wrapping the first failed
    /// copy; the remaining copies are abandoned.
    #[instrument(skip_all, fields(artifacts = artifacts.len(), destination = %self.context.destination.host()))]
    pub async fn copy_all(&self, cancel: &CancellationToken, artifacts: &[Artifact]) -> Result<CopyReport> {
        let references: Vec<String> = artifacts.iter().map(Artifact::full_image).collect();
        let references = dedupe(&references);
        info!(artifacts = references.len(), "copying artifacts");

        let total = Arc::new(Mutex::new(CopyReport::default()));
        let context = Arc::new(self.context.clone());
        let sink = Arc::clone(&total);
        self.processor
            .process(cancel, references, move |token, reference| {
                let context = Arc::clone(&context);
                let sink = Arc::clone(&sink);
                async move {
                    let report = context.copy_one(&token, &reference).await?;
                    sink.lock().merge(report);
                    Ok(())
                }
            })
            .await?;

        let report = *total.lock();
        info!(copied = report.copied, skipped = report.skipped, bytes = report.bytes, "copy finished");
        Ok(report)
    }
}
