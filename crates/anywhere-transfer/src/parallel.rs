//! Fans a sequential source or destination out over a worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::destination::ImageDestination;
use crate::error::Result;
use crate::processor::ConcurrentProcessor;
use crate::source::ImageSource;

/// Runs one single-reference call of the wrapped source or destination per
/// reference, through a [`ConcurrentProcessor`].
///
/// The wrapped implementation stays sequential; this adapter is the only
/// place parallelism is added.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use anywhere_registry::{CredentialStore, OciLayout, RegistryCache};
/// use anywhere_transfer::{ConcurrentProcessor, OriginalRegistrySource, Parallel};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = Arc::new(RegistryCache::new(Arc::new(CredentialStore::empty())));
/// let layout = Arc::new(OciLayout::create("/tmp/images")?);
/// let source = Parallel::new(
///     OriginalRegistrySource::new(cache, layout),
///     ConcurrentProcessor::with_max_routines(4),
/// );
/// # let _ = source;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Parallel<T> {
    inner: Arc<T>,
    processor: ConcurrentProcessor,
}

impl<T> Parallel<T> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: T, processor: ConcurrentProcessor) -> Self {
        Self {
            inner: Arc::new(inner),
            processor,
        }
    }

    /// Returns the wrapped implementation.
    #[must_use]
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait]
impl<T: ImageSource + 'static> ImageSource for Parallel<T> {
    async fn load(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.processor
            .process(cancel, references.to_vec(), move |token, reference| {
                let inner = Arc::clone(&inner);
                async move { inner.load(&token, &[reference]).await }
            })
            .await
    }
}

#[async_trait]
impl<T: ImageDestination + 'static> ImageDestination for Parallel<T> {
    async fn write(&self, cancel: &CancellationToken, references: &[String]) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        self.processor
            .process(cancel, references.to_vec(), move |token, reference| {
                let inner = Arc::clone(&inner);
                async move { inner.write(&token, &[reference]).await }
            })
            .await
    }
}
