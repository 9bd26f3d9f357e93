//! # Anywhere Transfer
//!
//! Moves sets of OCI artifacts between registries and disk archives with
//! bounded parallelism.
//!
//! ## Features
//!
//! - **Mover**: deduplicated load-then-write across an [`ImageSource`] and an [`ImageDestination`]
//! - **Adapters**: origin registry, registry mirror and tar archive endpoints over a shared [`OciLayout`](anywhere_registry::OciLayout)
//! - **Worker pool**: [`ConcurrentProcessor`] with first-error-wins cancellation
//! - **Direct copy**: [`RegistryCopier`] for registry-to-registry transfers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use anywhere_registry::{CredentialStore, OciLayout, RegistryCache};
//! use anywhere_transfer::{
//!     ConcurrentProcessor, DiskDestination, ImageMover, OriginalRegistrySource, Parallel,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = Arc::new(RegistryCache::new(Arc::new(CredentialStore::from_default_location(None)?)));
//!     let staging = tempfile::tempdir()?;
//!     let layout = Arc::new(OciLayout::create(staging.path())?);
//!
//!     let mover = ImageMover::new(
//!         Parallel::new(
//!             OriginalRegistrySource::new(cache, Arc::clone(&layout)),
//!             ConcurrentProcessor::default(),
//!         ),
//!         DiskDestination::new(layout, "images.tar.gz"),
//!     );
//!
//!     let images = vec!["public.ecr.aws/eks-anywhere/cli-tools:v0.18.0-eks-a-55".to_string()];
//!     mover.move_images(&CancellationToken::new(), &images).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                      ImageMover                        │
//! │        dedupe → source.load → destination.write        │
//! └───────────┬────────────────────────────────┬───────────┘
//!             ▼                                ▼
//!   Parallel<ImageSource>            Parallel<ImageDestination>
//!             │     ConcurrentProcessor        │
//!             ▼                                ▼
//!  OriginalRegistrySource ──▶ OciLayout ──▶ RegistryDestination
//!  DiskSource (archive)                    DiskDestination (archive)
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod archive;
mod copier;
mod destination;
mod error;
mod mover;
mod parallel;
mod processor;
mod source;

pub use copier::RegistryCopier;
pub use destination::{DiskDestination, ImageDestination, RegistryDestination};
pub use error::{Result, TransferError};
pub use mover::{dedupe, ImageMover};
pub use parallel::Parallel;
pub use processor::{ConcurrentProcessor, ProcessorConfig, DEFAULT_MAX_ROUTINES};
pub use source::{DiskSource, ImageSource, OriginalRegistrySource};
