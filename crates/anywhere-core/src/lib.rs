//! # Anywhere Core
//!
//! Core value types shared by the artifact distribution engine of the
//! Anywhere cluster lifecycle tooling.
//!
//! This crate provides:
//!
//! - [`Artifact`] - Registry host, repository path and tag/digest of a single OCI object
//! - [`RegistryMirror`] - Address rewriting from origin registries to a configured mirror
//! - [`ArtifactList`] - Artifact references collected from a bundles manifest
//!
//! ## Example
//!
//! ```rust
//! use anywhere_core::{Artifact, RegistryMirror, DEFAULT_CORE_REGISTRY};
//!
//! let artifact = Artifact::parse("public.ecr.aws/eks-anywhere/cli-tools:v0.1.0");
//! assert_eq!(artifact.registry(), "public.ecr.aws");
//!
//! let mirror = RegistryMirror::new("harbor.demo:30003")
//!     .with_namespace(DEFAULT_CORE_REGISTRY, "harbor.demo:30003/eks-anywhere");
//! assert_eq!(
//!     mirror.replace_registry(&artifact.versioned_image()),
//!     "harbor.demo:30003/eks-anywhere/eks-anywhere/cli-tools:v0.1.0"
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod bundle;
pub mod error;
pub mod mirror;

#[cfg(test)]
mod proptest_tests;

pub use artifact::Artifact;
pub use bundle::{ArtifactList, BundleImage};
pub use error::{CoreError, Result};
pub use mirror::{
    replace_registry, NamespaceTable, OciNamespace, RegistryMirror, RegistryMirrorConfiguration,
    CURATED_PACKAGES_REGISTRY_PATTERN, DEFAULT_CORE_REGISTRY, DEFAULT_CURATED_PACKAGES_REGISTRY,
};
