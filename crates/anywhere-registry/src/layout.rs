//! On-disk OCI image layout storage.
//!
//! Layout on disk:
//!
//! ```text
//! <root>/
//! ├── oci-layout          {"imageLayoutVersion": "1.0.0"}
//! ├── index.json          tagged manifests, named by REF_NAME_ANNOTATION
//! └── blobs/<alg>/<hex>   content by digest
//! ```
//!
//! Blob writes go through a temporary file renamed into place, so a blob
//! path either holds verified content or does not exist. The index is
//! rewritten the same way while holding the index lock.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RegistryError, Result};
use crate::oci::{parse_digest, successors, Descriptor, Index, REF_NAME_ANNOTATION};
use crate::storage::Storage;

const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const BLOBS_DIR: &str = "blobs";
const LAYOUT_VERSION: &str = "1.0.0";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageLayout {
    image_layout_version: String,
}

/// An OCI image layout directory used as local storage.
#[derive(Debug)]
pub struct OciLayout {
    root: PathBuf,
    index: Mutex<Index>,
}

impl OciLayout {
    /// Opens the layout at `root`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or holds an
    /// unreadable index.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let blobs = root.join(BLOBS_DIR);
        std::fs::create_dir_all(&blobs).map_err(|e| RegistryError::io(&blobs, e))?;

        let marker = root.join(OCI_LAYOUT_FILE);
        if !marker.exists() {
            let layout = ImageLayout {
                image_layout_version: LAYOUT_VERSION.to_string(),
            };
            write_atomic(&root, &marker, &serde_json::to_vec(&layout)?)?;
        }

        let index = read_index(&root)?.unwrap_or_else(Index::new);
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    /// Opens an existing layout.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` is not an OCI image layout.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let marker = root.join(OCI_LAYOUT_FILE);
        let contents = std::fs::read(&marker).map_err(|e| RegistryError::io(&marker, e))?;
        let layout: ImageLayout = serde_json::from_slice(&contents)?;
        if layout.image_layout_version != LAYOUT_VERSION {
            return Err(RegistryError::InvalidConfig {
                message: format!(
                    "unsupported image layout version {} at {}",
                    layout.image_layout_version,
                    root.display()
                ),
            });
        }

        let index = read_index(&root)?.unwrap_or_else(Index::new);
        Ok(Self {
            root,
            index: Mutex::new(index),
        })
    }

    /// Returns the layout directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the tagged manifests in index order.
    #[must_use]
    pub fn manifests(&self) -> Vec<Descriptor> {
        self.index.lock().manifests.clone()
    }

    /// Returns every reference name recorded in the index.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        self.index
            .lock()
            .manifests
            .iter()
            .filter_map(|d| d.ref_name().map(ToString::to_string))
            .collect()
    }

    /// Returns the index entries for `references`, in the order given.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for the first unknown reference.
    pub fn descriptors_for(&self, references: &[String]) -> Result<Vec<Descriptor>> {
        let index = self.index.lock();
        references
            .iter()
            .map(|reference| {
                index
                    .manifests
                    .iter()
                    .find(|d| d.ref_name() == Some(reference.as_str()))
                    .cloned()
                    .ok_or_else(|| RegistryError::NotFound {
                        repository: self.root.display().to_string(),
                        reference: reference.clone(),
                    })
            })
            .collect()
    }

    /// Returns the relative paths of every blob reachable from `roots`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reachable blob is missing or a manifest is corrupt.
    pub fn reachable_blobs(&self, roots: &[Descriptor]) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut stack: Vec<Descriptor> = roots.to_vec();
        let mut paths = Vec::new();

        while let Some(desc) = stack.pop() {
            if !seen.insert(desc.digest.clone()) {
                continue;
            }
            let path = self.blob_path(&desc.digest)?;
            if desc.media_type.is_manifest_like() {
                let content = std::fs::read(&path).map_err(|e| RegistryError::io(&path, e))?;
                stack.extend(successors(&content, &desc.media_type)?);
            } else if !path.exists() {
                return Err(RegistryError::NotFound {
                    repository: self.root.display().to_string(),
                    reference: desc.digest.clone(),
                });
            }
            let relative = path
                .strip_prefix(&self.root)
                .map(Path::to_path_buf)
                .unwrap_or(path);
            paths.push(relative);
        }

        paths.sort();
        Ok(paths)
    }

    fn blob_path(&self, digest: &str) -> Result<PathBuf> {
        let (algorithm, hex) = parse_digest(digest)?;
        Ok(self.root.join(BLOBS_DIR).join(algorithm).join(hex))
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.root, &self.root.join(INDEX_FILE), &bytes)
    }
}

#[async_trait]
impl Storage for OciLayout {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let index = self.index.lock();
        index
            .manifests
            .iter()
            .find(|d| d.ref_name() == Some(reference) || d.digest == reference)
            .map(Descriptor::plain)
            .ok_or_else(|| RegistryError::NotFound {
                repository: self.location(),
                reference: reference.to_string(),
            })
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let path = self.blob_path(&desc.digest)?;
        match tokio::fs::try_exists(&path).await {
            Ok(found) => Ok(found),
            Err(e) => Err(RegistryError::io(path, e)),
        }
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let path = self.blob_path(&desc.digest)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RegistryError::NotFound {
                repository: self.location(),
                reference: desc.digest.clone(),
            }),
            Err(e) => Err(RegistryError::io(path, e)),
        }
    }

    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        desc.verify(&content)?;
        let path = self.blob_path(&desc.digest)?;
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            if path.exists() {
                return Ok(());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RegistryError::io(parent, e))?;
            }
            write_atomic(&root, &path, &content)
        })
        .await
        .map_err(|e| RegistryError::io(&self.root, std::io::Error::other(e)))??;
        debug!(digest = %desc.digest, layout = %self.root.display(), "stored blob");
        Ok(())
    }

    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()> {
        if !self.exists(desc).await? {
            return Err(RegistryError::NotFound {
                repository: self.location(),
                reference: desc.digest.clone(),
            });
        }

        let entry = desc.plain().with_annotation(REF_NAME_ANNOTATION, reference);
        let mut index = self.index.lock();
        index.manifests.retain(|d| d.ref_name() != Some(reference));
        index.manifests.push(entry);
        self.save_index(&index)?;
        debug!(reference, digest = %desc.digest, "tagged in layout");
        Ok(())
    }
}

fn read_index(root: &Path) -> Result<Option<Index>> {
    let path = root.join(INDEX_FILE);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RegistryError::io(path, e)),
    }
}

/// Writes `bytes` to a temporary file inside `root` and renames it to `path`.
fn write_atomic(root: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(root);
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(|e| RegistryError::io(dir, e))?;
    file.write_all(bytes).map_err(|e| RegistryError::io(file.path(), e))?;
    file.persist(path)
        .map_err(|e| RegistryError::io(path, e.error))?;
    Ok(())
}
