//! # Anywhere Registry
//!
//! OCI distribution plumbing for moving artifacts between registries and
//! local disk.
//!
//! ## Features
//!
//! - **Storage abstraction**: remote repositories and on-disk OCI image layouts behind one [`Storage`] trait
//! - **Graph copy**: manifest plus every referenced blob, skipping content the destination already has
//! - **Credentials**: docker `config.json`, credential helpers, anonymous fallback
//! - **Client cache**: one initialized client per `(host, cert file, insecure)`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use anywhere_core::Artifact;
//! use anywhere_registry::{CredentialStore, RegistryCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RegistryCache::new(Arc::new(CredentialStore::from_default_location(None)?));
//!
//!     let src = cache.get("public.ecr.aws", "", false)?;
//!     let dst = cache.get("harbor.local:30003", "/etc/harbor/ca.crt", false)?;
//!     dst.set_project("eks-anywhere");
//!
//!     let artifact = Artifact::parse("public.ecr.aws/eks-anywhere/cli-tools:v0.18.0-eks-a-55");
//!     let report = src.copy(&artifact, &dst).await?;
//!     println!("copied {} blobs to {}", report.copied, dst.destination(&artifact));
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     RegistryCache                        │
//! │          (host, cert file, insecure) → client            │
//! └──────────────────────────┬───────────────────────────────┘
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                   OciRegistryClient                      │
//! │  ┌──────────────────┐  ┌───────────────┐  ┌───────────┐  │
//! │  │ RemoteRepository │  │CredentialStore│  │copy_graph │  │
//! │  │ (HTTP, tokens)   │  │ (config.json) │  │ (dedup)   │  │
//! │  └──────────────────┘  └───────────────┘  └───────────┘  │
//! └──────────────────────────────────────────────────────────┘
//!                            │  Storage
//!                            ▼
//!              OCI registry  /  OciLayout on disk
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod client;
mod config;
mod credentials;
mod error;
mod layout;
mod oci;
mod remote;
mod storage;

pub use cache::RegistryCache;
pub use client::OciRegistryClient;
pub use config::{default_user_agent, ClientOptions};
pub use credentials::{Credential, CredentialStore, DockerAuthEntry, DockerConfig};
pub use error::{CopyStage, RegistryError, Result};
pub use layout::OciLayout;
pub use oci::{compute_digest, parse_digest, successors, Descriptor, Index, Manifest, MediaType, REF_NAME_ANNOTATION};
pub use remote::{RemoteRepository, TokenCache};
pub use storage::{copy_graph, CopyReport, Storage};
