//! Artifact list input read from a bundles manifest.
//!
//! A bundles manifest nests image records at arbitrary depth; every mapping
//! that carries a string `uri` pointing at an OCI reference is collected,
//! together with its optional `imageDigest`. Plain file assets (`http://`
//! and `https://` uris such as OS images or manifests) are skipped.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::artifact::Artifact;
use crate::error::{CoreError, Result};

/// A single `{name, uri, digest}` record from a bundles manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleImage {
    /// Human-readable name.
    pub name: String,
    /// OCI reference.
    pub uri: String,
    /// Content digest, if the manifest pins one.
    #[serde(default, rename = "imageDigest", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl BundleImage {
    /// Creates a record from a reference, naming it after the last path segment.
    #[must_use]
    pub fn from_uri(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            name: default_name(&uri),
            uri,
            digest: None,
        }
    }

    /// Returns true if this record is a Helm chart.
    #[must_use]
    pub fn is_chart(&self) -> bool {
        self.name.ends_with("-chart") || self.name.ends_with("-helm") || self.uri.starts_with("oci://")
    }

    /// Returns the transfer reference of this record, `uri[:tag][@digest]`.
    ///
    /// The tag from the uri is kept next to the pinned digest so it can be
    /// applied on the destination.
    #[must_use]
    pub fn reference(&self) -> String {
        Artifact::from_image(self).full_image()
    }
}

/// Ordered list of artifacts referenced by a bundles manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactList {
    images: Vec<BundleImage>,
}

impl ArtifactList {
    /// Builds a list from explicit records.
    #[must_use]
    pub const fn from_images(images: Vec<BundleImage>) -> Self {
        Self { images }
    }

    /// Reads every image record from a (possibly multi-document) YAML manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if any document is not valid YAML.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::ArtifactList;
    ///
    /// let yaml = r#"
    /// spec:
    ///   versionsBundles:
    ///     - kubeVip:
    ///         name: kube-vip
    ///         uri: public.ecr.aws/l0g8r8j6/kube-vip/kube-vip:v0.6.4-eks-a-55
    ///       eksD:
    ///         ova:
    ///           uri: https://distro.eks.amazonaws.com/ubuntu.ova
    /// "#;
    /// let list = ArtifactList::from_yaml(yaml).unwrap();
    /// assert_eq!(list.len(), 1);
    /// ```
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut images = Vec::new();
        for document in serde_yaml::Deserializer::from_str(yaml) {
            let value = Value::deserialize(document).map_err(|e| CoreError::Yaml {
                context: "bundles manifest".to_string(),
                source: e,
            })?;
            collect(&value, &mut images);
        }
        debug!(count = images.len(), "collected artifacts from bundles manifest");
        Ok(Self { images })
    }

    /// Reads a bundles manifest from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&contents)
    }

    /// Container image records (everything that is not a chart).
    pub fn images(&self) -> impl Iterator<Item = &BundleImage> {
        self.images.iter().filter(|i| !i.is_chart())
    }

    /// Helm chart records.
    pub fn charts(&self) -> impl Iterator<Item = &BundleImage> {
        self.images.iter().filter(|i| i.is_chart())
    }

    /// All records in manifest order.
    #[must_use]
    pub fn all(&self) -> &[BundleImage] {
        &self.images
    }

    /// Canonical references of all records, deduplicated, first-seen order.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        dedup_references(self.images.iter())
    }

    /// Canonical references of image records only.
    #[must_use]
    pub fn image_references(&self) -> Vec<String> {
        dedup_references(self.images())
    }

    /// Canonical references of chart records only.
    #[must_use]
    pub fn chart_references(&self) -> Vec<String> {
        dedup_references(self.charts())
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Returns true if the list has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

fn dedup_references<'a>(images: impl Iterator<Item = &'a BundleImage>) -> Vec<String> {
    let mut seen = HashSet::new();
    images
        .map(BundleImage::reference)
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

fn collect(value: &Value, out: &mut Vec<BundleImage>) {
    match value {
        Value::Mapping(map) => {
            if let Some(image) = image_record(map) {
                out.push(image);
            }
            for (_, child) in map {
                collect(child, out);
            }
        }
        Value::Sequence(items) => {
            for item in items {
                collect(item, out);
            }
        }
        Value::Tagged(tagged) => collect(&tagged.value, out),
        _ => {}
    }
}

fn image_record(map: &serde_yaml::Mapping) -> Option<BundleImage> {
    let uri = map.get("uri")?.as_str()?.trim();
    if uri.is_empty()
        || uri.starts_with("http://")
        || uri.starts_with("https://")
        || !uri.contains('/')
    {
        return None;
    }

    let name = map
        .get("name")
        .and_then(Value::as_str)
        .map_or_else(|| default_name(uri), ToString::to_string);
    let digest = map
        .get("imageDigest")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(ToString::to_string);

    Some(BundleImage {
        name,
        uri: uri.to_string(),
        digest,
    })
}

fn default_name(uri: &str) -> String {
    let artifact = Artifact::parse(uri);
    artifact
        .repository()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r"
apiVersion: anywhere.io/v1alpha1
kind: Bundles
spec:
  versionsBundles:
    - kubeVersion: '1.28'
      packageController:
        controller:
          name: eks-anywhere-packages
          uri: public.ecr.aws/eks-anywhere/eks-anywhere-packages:v0.3.13-eks-a-55
          imageDigest: sha256:0a1b
        helmChart:
          name: eks-anywhere-packages-chart
          uri: public.ecr.aws/eks-anywhere/eks-anywhere-packages:0.3.13-eks-a-55
      eksa:
        cliTools:
          name: eks-anywhere-cli-tools
          uri: public.ecr.aws/eks-anywhere/cli-tools:v0.18.0-eks-a-55
      eksD:
        ova:
          bottlerocket:
            uri: https://anywhere-assets.eks.amazonaws.com/bottlerocket.ova
    - kubeVersion: '1.29'
      eksa:
        cliTools:
          name: eks-anywhere-cli-tools
          uri: public.ecr.aws/eks-anywhere/cli-tools:v0.18.0-eks-a-55
";

    #[test]
    fn test_collects_nested_images() {
        let list = ArtifactList::from_yaml(MANIFEST).unwrap();
        assert_eq!(list.len(), 4);
        assert_eq!(list.charts().count(), 1);
        assert_eq!(list.images().count(), 3);
    }

    #[test]
    fn test_skips_file_assets() {
        let list = ArtifactList::from_yaml(MANIFEST).unwrap();
        assert!(list.all().iter().all(|i| !i.uri.starts_with("https://")));
    }

    #[test]
    fn test_references_dedup_and_digest() {
        let list = ArtifactList::from_yaml(MANIFEST).unwrap();
        let refs = list.references();
        assert_eq!(refs.len(), 3);
        assert_eq!(
            refs[0],
            "public.ecr.aws/eks-anywhere/eks-anywhere-packages:v0.3.13-eks-a-55@sha256:0a1b"
        );
        assert_eq!(list.chart_references().len(), 1);
    }

    #[test]
    fn test_pinned_record_keeps_tag() {
        let yaml = r"
kubeVip:
  name: kube-vip
  uri: public.ecr.aws/l0g8r8j6/kube-vip/kube-vip:v0.6.4-eks-a-55
  imageDigest: sha256:feed
";
        let list = ArtifactList::from_yaml(yaml).unwrap();
        let refs = list.references();
        assert_eq!(
            refs[0],
            "public.ecr.aws/l0g8r8j6/kube-vip/kube-vip:v0.6.4-eks-a-55@sha256:feed"
        );
        let artifact = Artifact::parse(&refs[0]);
        assert_eq!(artifact.tag(), "v0.6.4-eks-a-55");
        assert_eq!(artifact.reference(), "sha256:feed");
    }

    #[test]
    fn test_multi_document() {
        let yaml = "uri: public.ecr.aws/a/b:1\n---\nitems:\n  - uri: public.ecr.aws/a/c:2\n";
        let list = ArtifactList::from_yaml(yaml).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.all()[1].name, "c");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ArtifactList::from_yaml("spec: [unterminated").unwrap_err();
        assert!(matches!(err, CoreError::Yaml { .. }));
    }

    #[test]
    fn test_oci_uri_is_chart() {
        let image = BundleImage::from_uri("oci://public.ecr.aws/charts/cilium:1.14");
        assert!(image.is_chart());
        assert_eq!(image.name, "cilium");
        assert_eq!(image.reference(), "public.ecr.aws/charts/cilium:1.14");
    }

    #[test]
    fn test_from_file_missing() {
        let err = ArtifactList::from_file(Path::new("/nonexistent/bundle.yaml")).unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }
}
