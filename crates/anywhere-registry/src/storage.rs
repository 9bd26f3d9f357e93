//! Content-addressable storage abstraction and graph copy.
//!
//! A [`Storage`] is anything that can hold OCI content by digest and map
//! references to descriptors: a remote repository or an on-disk image
//! layout. [`copy_graph`] moves a root and everything it references from
//! one storage to another.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, instrument};

use crate::error::Result;
use crate::oci::{successors, Descriptor};

/// Content-addressable OCI storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable location, used in logs and errors.
    fn location(&self) -> String;

    /// Resolves a tag, digest or reference name to a manifest descriptor.
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;

    /// Returns true if content with this digest is already stored.
    async fn exists(&self, desc: &Descriptor) -> Result<bool>;

    /// Fetches the raw bytes of a piece of content.
    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>>;

    /// Stores content under its digest.
    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()>;

    /// Points `reference` at an already stored manifest.
    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()>;
}

/// Outcome of a graph copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    /// Nodes transferred to the destination.
    pub copied: usize,
    /// Nodes found at the destination and not transferred.
    pub skipped: usize,
    /// Bytes transferred.
    pub bytes: u64,
}

impl CopyReport {
    /// Adds another report into this one.
    pub fn merge(&mut self, other: Self) {
        self.copied += other.copied;
        self.skipped += other.skipped;
        self.bytes += other.bytes;
    }
}

/// Copies `root` and its transitive successors from `src` to `dst`.
///
/// Nodes are pushed children first, so a manifest is never visible at the
/// destination before its blobs. A node already present at the destination
/// is skipped together with its subtree; content is never re-uploaded.
/// Fetched bytes are verified against their descriptor before pushing.
///
/// # Errors
///
/// Returns the first fetch, verification or push error. Nodes copied
/// before the failure stay at the destination.
#[instrument(skip_all, fields(src = %src.location(), dst = %dst.location(), digest = %root.digest))]
pub async fn copy_graph(src: &dyn Storage, dst: &dyn Storage, root: &Descriptor) -> Result<CopyReport> {
    let mut report = CopyReport::default();
    let mut visited = HashSet::new();
    copy_node(src, dst, root, &mut visited, &mut report).await?;
    debug!(copied = report.copied, skipped = report.skipped, "graph copy finished");
    Ok(report)
}

fn copy_node<'a>(
    src: &'a dyn Storage,
    dst: &'a dyn Storage,
    desc: &'a Descriptor,
    visited: &'a mut HashSet<String>,
    report: &'a mut CopyReport,
) -> BoxFuture<'a, Result<()>> {
    async move {
        if !visited.insert(desc.digest.clone()) {
            return Ok(());
        }

        if dst.exists(desc).await? {
            debug!(digest = %desc.digest, "already exists at destination, skipping");
            report.skipped += 1;
            return Ok(());
        }

        let content = src.fetch(desc).await?;
        desc.verify(&content)?;

        for child in successors(&content, &desc.media_type)? {
            copy_node(src, dst, &child, visited, report).await?;
        }

        dst.push(desc, content).await?;
        debug!(digest = %desc.digest, size = desc.size, "copied");
        report.copied += 1;
        report.bytes += desc.size;
        Ok(())
    }
    .boxed()
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory storage for tests.

    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::RegistryError;

    #[derive(Debug, Default)]
    pub struct MemoryStorage {
        pub blobs: Mutex<HashMap<String, Vec<u8>>>,
        pub tags: Mutex<HashMap<String, Descriptor>>,
        pub pushes: Mutex<Vec<String>>,
    }

    impl MemoryStorage {
        pub fn insert(&self, desc: &Descriptor, content: &[u8]) {
            self.blobs.lock().insert(desc.digest.clone(), content.to_vec());
        }
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        fn location(&self) -> String {
            "memory".to_string()
        }

        async fn resolve(&self, reference: &str) -> Result<Descriptor> {
            self.tags
                .lock()
                .get(reference)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound {
                    repository: self.location(),
                    reference: reference.to_string(),
                })
        }

        async fn exists(&self, desc: &Descriptor) -> Result<bool> {
            Ok(self.blobs.lock().contains_key(&desc.digest))
        }

        async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
            self.blobs
                .lock()
                .get(&desc.digest)
                .cloned()
                .ok_or_else(|| RegistryError::NotFound {
                    repository: self.location(),
                    reference: desc.digest.clone(),
                })
        }

        async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
            self.pushes.lock().push(desc.digest.clone());
            self.blobs.lock().insert(desc.digest.clone(), content);
            Ok(())
        }

        async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()> {
            self.tags.lock().insert(reference.to_string(), desc.clone());
            Ok(())
        }
    }
}
