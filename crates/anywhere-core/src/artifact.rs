//! Artifact reference model.
//!
//! An [`Artifact`] identifies a single OCI object (image, chart or bundle
//! manifest) by registry host, repository path and a tag and/or digest.
//!
//! Reference strings are parsed with one deterministic rule:
//!
//! - an optional `scheme://` prefix (`oci://`, `https://`) is dropped
//! - everything after the first `@` is the digest
//! - a `:` is a tag separator only when it follows the last `/`, so
//!   `host:5000/repo` keeps its port
//! - the first `/`-separated segment is the registry; a reference without
//!   any `/` has an empty registry
//!
//! When both a tag and a digest are present both are kept and the digest
//! is used for addressing.

use std::fmt;

use crate::bundle::BundleImage;

/// A single addressable OCI object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Artifact {
    registry: String,
    repository: String,
    tag: String,
    digest: String,
}

impl Artifact {
    /// Creates an artifact from explicit fields.
    ///
    /// A trailing `/` on the registry is dropped.
    #[must_use]
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        let registry: String = registry.into();
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            repository: repository.into(),
            tag: tag.into(),
            digest: digest.into(),
        }
    }

    /// Parses a `host/path[:tag][@digest]` reference.
    ///
    /// Parsing never fails; malformed input yields a best-effort split.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::Artifact;
    ///
    /// let a = Artifact::parse("harbor.local:5000/eks-anywhere/kube-vip:v0.6.4");
    /// assert_eq!(a.registry(), "harbor.local:5000");
    /// assert_eq!(a.repository(), "eks-anywhere/kube-vip");
    /// assert_eq!(a.tag(), "v0.6.4");
    ///
    /// let d = Artifact::parse("oci://public.ecr.aws/charts/cilium@sha256:abc");
    /// assert_eq!(d.version(), "@sha256:abc");
    /// ```
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let trimmed = strip_scheme(reference.trim());

        let (name_part, digest) = match trimmed.split_once('@') {
            Some((name, digest)) => (name, digest.to_string()),
            None => (trimmed, String::new()),
        };

        let last_slash = name_part.rfind('/');
        let (name, tag) = match name_part.rfind(':') {
            Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
                (&name_part[..colon], name_part[colon + 1..].to_string())
            }
            _ => (name_part, String::new()),
        };

        let (registry, repository) = name
            .split_once('/')
            .map_or_else(|| (String::new(), name.to_string()), |(r, p)| {
                (r.to_string(), p.to_string())
            });

        Self {
            registry,
            repository,
            tag,
            digest,
        }
    }

    /// Builds an artifact from a bundle manifest image record.
    ///
    /// The record's digest, when present, overrides any digest in the URI.
    #[must_use]
    pub fn from_image(image: &BundleImage) -> Self {
        let mut artifact = Self::parse(&image.uri);
        if let Some(digest) = image.digest.as_deref().filter(|d| !d.is_empty()) {
            artifact.digest = digest.to_string();
        }
        artifact
    }

    /// Returns the registry host (with port, if any).
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Returns the repository path.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the tag, empty when absent.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Returns the digest, empty when absent.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns the version suffix: `@<digest>` if a digest is set,
    /// otherwise `:<tag>`, or an empty string when neither is set.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::Artifact;
    ///
    /// assert_eq!(Artifact::new("", "", "v1", "").version(), ":v1");
    /// assert_eq!(Artifact::new("", "", "v1", "sha256:abc").version(), "@sha256:abc");
    /// ```
    #[must_use]
    pub fn version(&self) -> String {
        if !self.digest.is_empty() {
            format!("@{}", self.digest)
        } else if !self.tag.is_empty() {
            format!(":{}", self.tag)
        } else {
            String::new()
        }
    }

    /// Returns the reference used to resolve this artifact in its
    /// repository: the digest if set, otherwise the tag.
    #[must_use]
    pub fn reference(&self) -> &str {
        if self.digest.is_empty() {
            &self.tag
        } else {
            &self.digest
        }
    }

    /// Returns `registry/repository` without any version.
    #[must_use]
    pub fn image(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }

    /// Returns the canonical reference `registry/repository<version>`.
    #[must_use]
    pub fn versioned_image(&self) -> String {
        format!("{}{}", self.image(), self.version())
    }

    /// Returns `registry/repository[:tag][@digest]`, keeping the tag even
    /// when a digest is set.
    ///
    /// Transfers carry this form so the digest addresses the content while
    /// the tag is still applied on the destination.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::Artifact;
    ///
    /// let a = Artifact::new("public.ecr.aws", "a/b", "v1", "sha256:abc");
    /// assert_eq!(a.full_image(), "public.ecr.aws/a/b:v1@sha256:abc");
    /// assert_eq!(Artifact::parse(&a.full_image()), a);
    /// ```
    #[must_use]
    pub fn full_image(&self) -> String {
        let mut out = self.image();
        if !self.tag.is_empty() {
            out.push(':');
            out.push_str(&self.tag);
        }
        if !self.digest.is_empty() {
            out.push('@');
            out.push_str(&self.digest);
        }
        out
    }

    /// Returns a copy of this artifact addressed at another registry.
    #[must_use]
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        let registry: String = registry.into();
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            ..self.clone()
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.versioned_image())
    }
}

fn strip_scheme(reference: &str) -> &str {
    reference
        .find("://")
        .map_or(reference, |idx| &reference[idx + 3..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_reference() {
        let a = Artifact::parse("public.ecr.aws/eks-anywhere/eks-anywhere-packages:0.2.22-eks-a-24");
        assert_eq!(a.registry(), "public.ecr.aws");
        assert_eq!(a.repository(), "eks-anywhere/eks-anywhere-packages");
        assert_eq!(a.tag(), "0.2.22-eks-a-24");
        assert!(a.digest().is_empty());
    }

    #[test]
    fn test_parse_port_is_not_a_tag() {
        let a = Artifact::parse("localhost:5000/owner/name");
        assert_eq!(a.registry(), "localhost:5000");
        assert_eq!(a.repository(), "owner/name");
        assert!(a.tag().is_empty());
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let a = Artifact::parse("public.ecr.aws/a/b:v1@sha256:0123");
        assert_eq!(a.tag(), "v1");
        assert_eq!(a.digest(), "sha256:0123");
        assert_eq!(a.version(), "@sha256:0123");
        assert_eq!(a.versioned_image(), "public.ecr.aws/a/b@sha256:0123");
    }

    #[test]
    fn test_parse_strips_scheme() {
        let a = Artifact::parse("oci://public.ecr.aws/product/chart:1.0.0");
        assert_eq!(a.registry(), "public.ecr.aws");
        assert_eq!(a.repository(), "product/chart");
        assert_eq!(a.tag(), "1.0.0");
    }

    #[test]
    fn test_parse_without_registry() {
        let a = Artifact::parse("nginx:1.25");
        assert!(a.registry().is_empty());
        assert_eq!(a.repository(), "nginx");
        assert_eq!(a.versioned_image(), "nginx:1.25");
    }

    #[test]
    fn test_version_digest_wins() {
        let a = Artifact::new("r", "p", "v1", "sha256:abc");
        assert_eq!(a.version(), "@sha256:abc");
        assert_eq!(a.reference(), "sha256:abc");
    }

    #[test]
    fn test_version_tag_only() {
        let a = Artifact::new("r", "p", "v1", "");
        assert_eq!(a.version(), ":v1");
        assert_eq!(a.reference(), "v1");
    }

    #[test]
    fn test_new_trims_registry_slash() {
        let a = Artifact::new("public.ecr.aws/", "eks-anywhere/pkg", "0.1", "");
        assert_eq!(a.versioned_image(), "public.ecr.aws/eks-anywhere/pkg:0.1");
    }

    #[test]
    fn test_from_image_digest_override() {
        let image = BundleImage {
            name: "kube-vip".to_string(),
            uri: "public.ecr.aws/l0g8r8j6/kube-vip/kube-vip:v0.6.4-eks-a-55".to_string(),
            digest: Some("sha256:feed".to_string()),
        };
        let a = Artifact::from_image(&image);
        assert_eq!(a.tag(), "v0.6.4-eks-a-55");
        assert_eq!(a.digest(), "sha256:feed");
    }

    #[test]
    fn test_full_image_keeps_tag_and_digest() {
        let a = Artifact::parse("public.ecr.aws/a/b:v1@sha256:0123");
        assert_eq!(a.full_image(), "public.ecr.aws/a/b:v1@sha256:0123");
        assert_eq!(Artifact::parse("localhost:5000/a/b").full_image(), "localhost:5000/a/b");
        assert_eq!(Artifact::new("r", "p", "", "sha256:1").full_image(), "r/p@sha256:1");
    }

    #[test]
    fn test_with_registry() {
        let a = Artifact::parse("public.ecr.aws/a/b:v1").with_registry("harbor.local/");
        assert_eq!(a.versioned_image(), "harbor.local/a/b:v1");
    }

    #[test]
    fn test_display_matches_versioned_image() {
        let a = Artifact::parse("public.ecr.aws/a/b:v1");
        assert_eq!(a.to_string(), a.versioned_image());
    }
}
