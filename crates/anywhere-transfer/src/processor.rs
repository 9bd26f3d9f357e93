//! Bounded worker pool with first-error-wins cancellation.
//!
//! [`ConcurrentProcessor::process`] runs one operation per item on at most
//! `max_routines` workers. Items flow through a bounded queue, so the feeder
//! waits when every worker is busy. The first failing operation cancels the
//! shared token: the feeder stops enqueueing, idle workers exit, and running
//! operations can observe the token and abort. The call returns only after
//! every worker has stopped.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Result, TransferError};

/// Default number of concurrent workers.
pub const DEFAULT_MAX_ROUTINES: usize = 10;

/// Configuration for a [`ConcurrentProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Upper bound on concurrent operations. Zero is treated as one.
    pub max_routines: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_routines: DEFAULT_MAX_ROUTINES,
        }
    }
}

impl ProcessorConfig {
    /// Set the maximum number of concurrent workers.
    #[must_use]
    pub const fn with_max_routines(mut self, max_routines: usize) -> Self {
        self.max_routines = max_routines;
        self
    }
}

/// Runs an operation over a list of items with bounded parallelism.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentProcessor {
    config: ProcessorConfig,
}

impl ConcurrentProcessor {
    /// Creates a processor from its configuration.
    #[must_use]
    pub const fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    /// Creates a processor with `max_routines` workers.
    #[must_use]
    pub const fn with_max_routines(max_routines: usize) -> Self {
        Self::new(ProcessorConfig { max_routines })
    }

    /// Returns the processor configuration.
    #[must_use]
    pub const fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Number of workers spawned for `items` items.
    #[must_use]
    pub fn worker_count(&self, items: usize) -> usize {
        self.config.max_routines.min(items).max(1)
    }

    /// Applies `operation` to every item.
    ///
    /// Each call receives a child of `parent`, cancelled as soon as any
    /// operation fails or `parent` is cancelled. An empty `items` list
    /// returns immediately without calling `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::WorkerFailed`] wrapping the first operation
    /// error; later errors are discarded. Returns [`TransferError::Cancelled`]
    /// if `parent` was cancelled before every item ran and no operation failed.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_transfer::ConcurrentProcessor;
    /// use tokio_util::sync::CancellationToken;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() -> Result<(), anywhere_transfer::TransferError> {
    /// let processor = ConcurrentProcessor::with_max_routines(4);
    /// let items = vec!["a:1".to_string(), "b:2".to_string()];
    /// processor
    ///     .process(&CancellationToken::new(), items, |_cancel, item| async move {
    ///         assert!(item.contains(':'));
    ///         Ok(())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn process<F, Fut>(&self, parent: &CancellationToken, items: Vec<String>, operation: F) -> Result<()>
    where
        F: Fn(CancellationToken, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if items.is_empty() {
            return Ok(());
        }

        let total = items.len();
        let workers = self.worker_count(total);
        debug!(items = total, workers, "starting processor");

        let token = parent.child_token();
        let (jobs_tx, jobs_rx) = mpsc::channel::<String>(workers);
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        let first_error: Arc<Mutex<Option<TransferError>>> = Arc::new(Mutex::new(None));
        let completed = Arc::new(AtomicUsize::new(0));
        let operation = Arc::new(operation);

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let jobs_rx = Arc::clone(&jobs_rx);
            let token = token.clone();
            let operation = Arc::clone(&operation);
            let first_error = Arc::clone(&first_error);
            let completed = Arc::clone(&completed);

            pool.spawn(async move {
                loop {
                    let job = {
                        let mut jobs_rx = jobs_rx.lock().await;
                        tokio::select! {
                            biased;
                            () = token.cancelled() => None,
                            job = jobs_rx.recv() => job,
                        }
                    };
                    let Some(item) = job else {
                        break;
                    };

                    if let Err(err) = operation(token.clone(), item.clone()).await {
                        debug!(worker, item = %item, error = %err, "job failed, aborting remaining jobs");
                        record_first(&first_error, err);
                        token.cancel();
                        break;
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        drop(jobs_rx);

        for item in items {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                sent = jobs_tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(jobs_tx);

        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "processor worker did not finish cleanly");
                record_first(&first_error, TransferError::Join(err.to_string()));
                token.cancel();
            }
        }

        let failure = first_error.lock().take();
        if let Some(source) = failure {
            return Err(TransferError::WorkerFailed {
                source: Box::new(source),
            });
        }
        // A cancel that lands after the last item finished changes nothing.
        let finished = completed.load(Ordering::SeqCst);
        if finished < total {
            debug!(finished, items = total, "processor stopped early");
            return Err(TransferError::Cancelled);
        }
        Ok(())
    }
}

fn record_first(slot: &Mutex<Option<TransferError>>, err: TransferError) {
    let mut slot = slot.lock();
    if slot.is_none() {
        *slot = Some(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_default_config() {
        assert_eq!(ProcessorConfig::default().max_routines, 10);
        assert_eq!(ProcessorConfig::default().with_max_routines(3).max_routines, 3);
    }

    #[test]
    fn test_worker_count() {
        let processor = ConcurrentProcessor::with_max_routines(4);
        assert_eq!(processor.worker_count(2), 2);
        assert_eq!(processor.worker_count(9), 4);
        assert_eq!(ConcurrentProcessor::with_max_routines(0).worker_count(5), 1);
        assert_eq!(processor.worker_count(0), 1);
    }

    #[tokio::test]
    async fn test_empty_items_never_call_operation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ConcurrentProcessor::default()
            .process(&CancellationToken::new(), Vec::new(), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_routines_still_runs_every_item() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        ConcurrentProcessor::with_max_routines(0)
            .process(&CancellationToken::new(), items(&["a", "b", "c"]), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (Arc::clone(&running), Arc::clone(&peak));

        let names: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
        ConcurrentProcessor::with_max_routines(3)
            .process(&CancellationToken::new(), names, move |_, _| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_parent_cancelled_before_start() {
        let parent = CancellationToken::new();
        parent.cancel();

        let err = ConcurrentProcessor::default()
            .process(&parent, items(&["a", "b"]), |cancel, _| async move {
                cancel.cancelled().await;
                Err(TransferError::Cancelled)
            })
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_after_last_item_is_success() {
        let parent = CancellationToken::new();
        let trigger = parent.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        ConcurrentProcessor::with_max_routines(1)
            .process(&parent, items(&["a", "b", "c"]), move |_, item| {
                counter.fetch_add(1, Ordering::SeqCst);
                if item == "c" {
                    trigger.cancel();
                }
                async { Ok(()) }
            })
            .await
            .unwrap();

        assert!(parent.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
