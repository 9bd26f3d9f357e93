//! OCI image and distribution specification types.
//!
//! Only the fields needed to walk a content graph are modelled; unknown
//! fields in manifests are tolerated on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RegistryError, Result};

/// Annotation holding the reference name of a manifest in an image layout index.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// OCI media type of a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct MediaType(String);

impl MediaType {
    /// OCI image manifest media type.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index media type.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// OCI image config media type.
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";

    /// OCI gzip layer media type.
    pub const OCI_LAYER_GZIP: &'static str = "application/vnd.oci.image.layer.v1.tar+gzip";

    /// Docker v2 schema 2 manifest media type.
    pub const DOCKER_MANIFEST: &'static str = "application/vnd.docker.distribution.manifest.v2+json";

    /// Docker manifest list media type.
    pub const DOCKER_MANIFEST_LIST: &'static str =
        "application/vnd.docker.distribution.manifest.list.v2+json";

    /// Docker container config media type.
    pub const DOCKER_CONFIG: &'static str = "application/vnd.docker.container.image.v1+json";

    /// Docker gzip layer media type.
    pub const DOCKER_LAYER: &'static str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

    /// Helm chart config media type.
    pub const HELM_CONFIG: &'static str = "application/vnd.cncf.helm.config.v1+json";

    /// Helm chart content media type.
    pub const HELM_CHART: &'static str = "application/vnd.cncf.helm.chart.content.v1.tar+gzip";

    /// Every manifest media type a registry may serve, for `Accept` headers.
    pub const MANIFEST_TYPES: [&'static str; 4] = [
        Self::OCI_MANIFEST,
        Self::OCI_INDEX,
        Self::DOCKER_MANIFEST,
        Self::DOCKER_MANIFEST_LIST,
    ];

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for single-image manifests.
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        self.0 == Self::OCI_MANIFEST || self.0 == Self::DOCKER_MANIFEST
    }

    /// Returns true for multi-platform indexes.
    #[must_use]
    pub fn is_index(&self) -> bool {
        self.0 == Self::OCI_INDEX || self.0 == Self::DOCKER_MANIFEST_LIST
    }

    /// Returns true for content served from the manifests endpoint.
    #[must_use]
    pub fn is_manifest_like(&self) -> bool {
        self.is_manifest() || self.is_index()
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

/// OCI content descriptor.
///
/// A descriptor describes the disposition of targeted content. It includes
/// the type of the content, a content identifier (digest), and the byte-size
/// of the raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: MediaType,

    /// Digest of the targeted content.
    pub digest: String,

    /// Size in bytes of the content.
    pub size: u64,

    /// Platform of an index entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<serde_json::Value>,

    /// Optional annotations (key-value metadata).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Creates a new descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_registry::{Descriptor, MediaType};
    ///
    /// let desc = Descriptor::new(MediaType::OCI_MANIFEST.into(), "sha256:abc", 1024);
    /// assert_eq!(desc.digest, "sha256:abc");
    /// assert!(desc.ref_name().is_none());
    /// ```
    #[must_use]
    pub fn new(media_type: MediaType, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type,
            digest: digest.into(),
            size,
            platform: None,
            annotations: None,
        }
    }

    /// Describes `content` with the given media type.
    #[must_use]
    pub fn for_content(media_type: MediaType, content: &[u8]) -> Self {
        Self::new(media_type, compute_digest(content), content.len() as u64)
    }

    /// Adds an annotation to the descriptor.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Returns an annotation value.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.as_ref()?.get(key).map(String::as_str)
    }

    /// Returns the reference name recorded in an image layout index.
    #[must_use]
    pub fn ref_name(&self) -> Option<&str> {
        self.annotation(REF_NAME_ANNOTATION)
    }

    /// Returns a copy without annotations or platform, as pushed to storage.
    #[must_use]
    pub fn plain(&self) -> Self {
        Self::new(self.media_type.clone(), self.digest.clone(), self.size)
    }

    /// Checks `content` against this descriptor's size and digest.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DigestMismatch`] if either differs.
    pub fn verify(&self, content: &[u8]) -> Result<()> {
        let actual = compute_digest(content);
        if actual != self.digest || content.len() as u64 != self.size {
            return Err(RegistryError::DigestMismatch {
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// OCI image manifest (also decodes Docker v2 schema 2 manifests).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Configuration descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Descriptor>,

    /// Layers that make up the artifact.
    #[serde(default)]
    pub layers: Vec<Descriptor>,

    /// Subject descriptor for the referrers API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// Creates an OCI manifest from a config and layers.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::OCI_MANIFEST)),
            config: Some(config),
            layers,
            subject: None,
            annotations: None,
        }
    }
}

/// OCI image index (also decodes Docker manifest lists and `index.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,

    /// Manifests referenced by this index.
    #[serde(default)]
    pub manifests: Vec<Descriptor>,

    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Index {
    /// Creates an empty OCI index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: 2,
            media_type: Some(MediaType::new(MediaType::OCI_INDEX)),
            manifests: Vec::new(),
            annotations: None,
        }
    }
}

/// Returns the direct children of a piece of content.
///
/// Manifests yield their config, layers and subject; indexes yield their
/// manifests; anything else is a leaf.
///
/// # Errors
///
/// Returns an error if manifest-like content is not valid JSON.
pub fn successors(content: &[u8], media_type: &MediaType) -> Result<Vec<Descriptor>> {
    let invalid = |e: serde_json::Error| RegistryError::InvalidManifest {
        digest: compute_digest(content),
        message: e.to_string(),
    };

    if media_type.is_manifest() {
        let manifest: Manifest = serde_json::from_slice(content).map_err(invalid)?;
        let mut nodes = Vec::with_capacity(manifest.layers.len() + 2);
        nodes.extend(manifest.config);
        nodes.extend(manifest.layers);
        nodes.extend(manifest.subject);
        Ok(nodes)
    } else if media_type.is_index() {
        let index: Index = serde_json::from_slice(content).map_err(invalid)?;
        Ok(index.manifests)
    } else {
        Ok(Vec::new())
    }
}

/// Computes the SHA-256 digest of data in `sha256:<hex>` form.
#[must_use]
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Splits a digest into algorithm and lowercase hex, rejecting anything else.
///
/// # Errors
///
/// Returns [`RegistryError::InvalidReference`] for a malformed digest.
pub fn parse_digest(digest: &str) -> Result<(&str, &str)> {
    let invalid = || RegistryError::InvalidReference {
        reference: digest.to_string(),
    };
    let (algorithm, hex) = digest.split_once(':').ok_or_else(invalid)?;
    let valid_algorithm = !algorithm.is_empty()
        && algorithm
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_hex = !hex.is_empty() && hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f'));
    if valid_algorithm && valid_hex {
        Ok((algorithm, hex))
    } else {
        Err(invalid())
    }
}
