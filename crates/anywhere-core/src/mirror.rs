//! Registry mirror address rewriting.
//!
//! A [`RegistryMirror`] redirects artifact references from their origin
//! registry to a mirror host, optionally under a per-origin namespace. The
//! lookup is two-tiered: literal host entries are consulted first, then
//! pattern entries for registries whose host varies (the curated packages
//! registry encodes an AWS region in its host).

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::{CoreError, Result};

/// Default registry of the core platform artifacts.
pub const DEFAULT_CORE_REGISTRY: &str = "public.ecr.aws";

/// Default registry of the curated packages.
pub const DEFAULT_CURATED_PACKAGES_REGISTRY: &str = "783794618700.dkr.ecr.us-west-2.amazonaws.com";

/// Matches the curated packages registry in any region.
pub const CURATED_PACKAGES_REGISTRY_PATTERN: &str =
    r"^783794618700\.dkr\.ecr\.[a-z0-9-]+\.amazonaws\.com$";

static CURATED_PACKAGES_REGISTRY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(CURATED_PACKAGES_REGISTRY_PATTERN).ok());

/// Returns the curated packages pattern when `registry` is one of its hosts.
fn curated_packages_pattern(registry: &str) -> Option<&'static Regex> {
    CURATED_PACKAGES_REGISTRY
        .as_ref()
        .filter(|pattern| pattern.is_match(registry))
}

/// Mirror lookup table: literal host entries first, pattern entries second.
#[derive(Debug, Clone, Default)]
pub struct NamespaceTable {
    literal: BTreeMap<String, String>,
    patterns: Vec<PatternEntry>,
}

#[derive(Debug, Clone)]
struct PatternEntry {
    pattern: Regex,
    target: String,
}

impl NamespaceTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps an exact host to a mirror target.
    pub fn insert_literal(&mut self, host: impl Into<String>, target: impl Into<String>) {
        self.literal.insert(host.into(), target.into());
    }

    /// Maps every host matching `pattern` to a mirror target.
    ///
    /// An existing entry with the same pattern is replaced.
    pub fn insert_pattern(&mut self, pattern: Regex, target: impl Into<String>) {
        let target = target.into();
        if let Some(entry) = self
            .patterns
            .iter_mut()
            .find(|e| e.pattern.as_str() == pattern.as_str())
        {
            entry.target = target;
        } else {
            self.patterns.push(PatternEntry { pattern, target });
        }
    }

    /// Resolves a host: exact match first, then the first matching pattern.
    #[must_use]
    pub fn lookup(&self, host: &str) -> Option<&str> {
        self.literal.get(host).map(String::as_str).or_else(|| {
            self.patterns
                .iter()
                .find(|e| e.pattern.is_match(host))
                .map(|e| e.target.as_str())
        })
    }

    /// Returns the target of a literal entry only.
    #[must_use]
    pub fn literal(&self, host: &str) -> Option<&str> {
        self.literal.get(host).map(String::as_str)
    }

    /// Returns the target of the first pattern entry.
    #[must_use]
    pub fn first_pattern_target(&self) -> Option<&str> {
        self.patterns.first().map(|e| e.target.as_str())
    }

    /// Number of entries across both tiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.literal.len() + self.patterns.len()
    }

    /// Returns true if the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An upstream registry redirected to a namespace on the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OciNamespace {
    /// Upstream registry host.
    pub registry: String,
    /// Namespace on the mirror, empty for the mirror root.
    #[serde(default)]
    pub namespace: String,
}

/// Registry mirror settings as found in a cluster specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMirrorConfiguration {
    /// Mirror host name or address.
    pub endpoint: String,

    /// Mirror port, empty for the scheme default.
    #[serde(default)]
    pub port: String,

    /// Per-upstream namespaces on the mirror.
    #[serde(default)]
    pub oci_namespaces: Vec<OciNamespace>,

    /// Whether the mirror requires authentication.
    #[serde(default)]
    pub authenticate: bool,

    /// PEM CA certificate of the mirror.
    #[serde(default)]
    pub ca_cert_content: String,

    /// Skip TLS verification against the mirror.
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl RegistryMirrorConfiguration {
    /// Parses a configuration from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the configuration is invalid.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| CoreError::Yaml {
            context: "registry mirror configuration".to_string(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration from a YAML file.
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

    /// Checks the endpoint and port.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is empty or the port is not numeric.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(CoreError::InvalidMirror {
                message: "endpoint is empty".to_string(),
            });
        }
        if !self.port.is_empty() && self.port.parse::<u16>().is_err() {
            return Err(CoreError::InvalidMirror {
                message: format!("port '{}' is not a valid port number", self.port),
            });
        }
        Ok(())
    }

    /// Returns `endpoint[:port]`.
    #[must_use]
    pub fn base_registry(&self) -> String {
        if self.port.is_empty() {
            self.endpoint.clone()
        } else {
            format!("{}:{}", self.endpoint, self.port)
        }
    }
}

/// Redirects artifact references to a registry mirror.
#[derive(Debug, Clone)]
pub struct RegistryMirror {
    base_registry: String,
    namespaces: NamespaceTable,
    auth: bool,
    ca_cert_content: Option<String>,
    insecure_skip_verify: bool,
}

impl RegistryMirror {
    /// Creates a mirror with no namespace entries.
    #[must_use]
    pub fn new(base_registry: impl Into<String>) -> Self {
        Self {
            base_registry: base_registry.into(),
            namespaces: NamespaceTable::new(),
            auth: false,
            ca_cert_content: None,
            insecure_skip_verify: false,
        }
    }

    /// Redirects `registry` to `target` (a mirror `host[/namespace]`).
    ///
    /// Registries matching the curated packages pattern are stored as a
    /// pattern entry so every region is redirected.
    #[must_use]
    pub fn with_namespace(mut self, registry: &str, target: impl Into<String>) -> Self {
        if let Some(pattern) = curated_packages_pattern(registry) {
            self.namespaces.insert_pattern(pattern.clone(), target);
        } else {
            self.namespaces.insert_literal(registry, target);
        }
        self
    }

    /// Marks the mirror as requiring authentication.
    #[must_use]
    pub const fn with_auth(mut self, auth: bool) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the PEM CA certificate of the mirror.
    #[must_use]
    pub fn with_ca_cert_content(mut self, content: impl Into<String>) -> Self {
        self.ca_cert_content = Some(content.into());
        self
    }

    /// Builds a mirror from cluster configuration; `None` when no mirror is configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::{OciNamespace, RegistryMirror, RegistryMirrorConfiguration};
    ///
    /// let config = RegistryMirrorConfiguration {
    ///     endpoint: "1.2.3.4".to_string(),
    ///     port: "443".to_string(),
    ///     oci_namespaces: vec![OciNamespace {
    ///         registry: "public.ecr.aws".to_string(),
    ///         namespace: "eks-anywhere".to_string(),
    ///     }],
    ///     ..Default::default()
    /// };
    /// let mirror = RegistryMirror::from_configuration(Some(&config)).unwrap();
    /// assert_eq!(mirror.core_eksa_mirror(), "1.2.3.4:443/eks-anywhere");
    /// ```
    #[must_use]
    pub fn from_configuration(config: Option<&RegistryMirrorConfiguration>) -> Option<Self> {
        let config = config?;
        let base = config.base_registry();

        let mut mirror = Self::new(base.clone()).with_namespace(DEFAULT_CORE_REGISTRY, base.clone());
        for ns in &config.oci_namespaces {
            let target = if ns.namespace.is_empty() {
                base.clone()
            } else {
                format!("{base}/{}", ns.namespace)
            };
            mirror = mirror.with_namespace(&ns.registry, target);
        }

        mirror.auth = config.authenticate;
        mirror.insecure_skip_verify = config.insecure_skip_verify;
        if !config.ca_cert_content.is_empty() {
            mirror.ca_cert_content = Some(config.ca_cert_content.clone());
        }

        Some(mirror)
    }

    /// Returns the mirror `host[:port]`.
    #[must_use]
    pub fn base_registry(&self) -> &str {
        &self.base_registry
    }

    /// Returns the namespace table.
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceTable {
        &self.namespaces
    }

    /// Whether the mirror requires authentication.
    #[must_use]
    pub const fn auth(&self) -> bool {
        self.auth
    }

    /// PEM CA certificate of the mirror, if configured.
    #[must_use]
    pub fn ca_cert_content(&self) -> Option<&str> {
        self.ca_cert_content.as_deref()
    }

    /// Whether TLS verification is skipped against the mirror.
    #[must_use]
    pub const fn insecure_skip_verify(&self) -> bool {
        self.insecure_skip_verify
    }

    /// Mirror location of the core platform registry, or the base registry.
    #[must_use]
    pub fn core_eksa_mirror(&self) -> &str {
        self.namespaces
            .literal(DEFAULT_CORE_REGISTRY)
            .unwrap_or(&self.base_registry)
    }

    /// Mirror location of the curated packages registry, if one is configured.
    #[must_use]
    pub fn curated_packages_mirror(&self) -> Option<&str> {
        self.namespaces.lookup(DEFAULT_CURATED_PACKAGES_REGISTRY)
    }

    /// Mirror plus namespace prefix for general artifacts.
    #[must_use]
    pub fn registry_mirror_with_oci_namespace(&self) -> &str {
        self.core_eksa_mirror()
    }

    /// Mirror plus namespace prefix for gated (curated) artifacts, or the base registry.
    #[must_use]
    pub fn registry_mirror_with_gated_oci_namespace(&self) -> &str {
        self.namespaces
            .first_pattern_target()
            .unwrap_or(&self.base_registry)
    }

    /// Rewrites the host of `reference` to its mirror location.
    ///
    /// Accepts scheme-qualified URLs (`oci://host/path`) and bare image
    /// references (`host/path:tag`). Only the host segment changes. Input
    /// whose host has no mirror entry, or that cannot be parsed, is
    /// returned unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use anywhere_core::{RegistryMirror, DEFAULT_CORE_REGISTRY};
    ///
    /// let mirror = RegistryMirror::new("harbor.demo:30003")
    ///     .with_namespace(DEFAULT_CORE_REGISTRY, "harbor.demo:30003/eks-anywhere");
    /// assert_eq!(
    ///     mirror.replace_registry("oci://public.ecr.aws/product/chart"),
    ///     "oci://harbor.demo:30003/eks-anywhere/product/chart"
    /// );
    /// ```
    #[must_use]
    pub fn replace_registry(&self, reference: &str) -> String {
        let Some((prefix, host, rest)) = split_host(reference) else {
            return reference.to_string();
        };
        match self.namespaces.lookup(host) {
            Some(target) => format!("{prefix}{target}{rest}"),
            None => reference.to_string(),
        }
    }

    /// Rewrites `reference` so it always lands on the mirror.
    ///
    /// Uses the namespace entry for the origin host when there is one,
    /// otherwise replaces the host with the base registry.
    #[must_use]
    pub fn redirect(&self, reference: &str) -> String {
        let Some((prefix, host, rest)) = split_host(reference) else {
            return Artifact::parse(reference)
                .with_registry(self.base_registry.clone())
                .full_image();
        };
        let target = self.namespaces.lookup(host).unwrap_or(&self.base_registry);
        format!("{prefix}{target}{rest}")
    }
}

/// Rewrites `reference` with `mirror`, returning it unchanged when there is no mirror.
#[must_use]
pub fn replace_registry(mirror: Option<&RegistryMirror>, reference: &str) -> String {
    mirror.map_or_else(|| reference.to_string(), |m| m.replace_registry(reference))
}

/// Splits a reference into `(scheme prefix, host, remainder)`.
///
/// Returns `None` for an unparseable URL or a reference with no host segment.
fn split_host(reference: &str) -> Option<(&str, &str, &str)> {
    let (prefix, body) = match reference.find("://") {
        Some(idx) => {
            url::Url::parse(reference).ok()?;
            reference.split_at(idx + 3)
        }
        None => ("", reference),
    };

    let host_end = body.find('/')?;
    let host = &body[..host_end];
    if host.is_empty() {
        return None;
    }
    Some((prefix, host, &body[host_end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harbor() -> RegistryMirror {
        RegistryMirror::new("harbor.eksa.demo:30003")
    }

    #[test]
    fn test_from_configuration_none() {
        assert!(RegistryMirror::from_configuration(None).is_none());
    }

    #[test]
    fn test_from_configuration_defaults_core_to_base() {
        let config = RegistryMirrorConfiguration {
            endpoint: "harbor.eksa.demo".to_string(),
            port: "30003".to_string(),
            authenticate: true,
            ..Default::default()
        };
        let mirror = RegistryMirror::from_configuration(Some(&config)).unwrap();
        assert_eq!(mirror.base_registry(), "harbor.eksa.demo:30003");
        assert_eq!(mirror.namespaces().len(), 1);
        assert_eq!(mirror.core_eksa_mirror(), "harbor.eksa.demo:30003");
        assert!(mirror.auth());
    }

    #[test]
    fn test_from_configuration_with_both_namespaces() {
        let config = RegistryMirrorConfiguration {
            endpoint: "1.2.3.4".to_string(),
            port: "443".to_string(),
            oci_namespaces: vec![
                OciNamespace {
                    registry: "public.ecr.aws".to_string(),
                    namespace: "eks-anywhere".to_string(),
                },
                OciNamespace {
                    registry: DEFAULT_CURATED_PACKAGES_REGISTRY.to_string(),
                    namespace: "curated-packages".to_string(),
                },
            ],
            ..Default::default()
        };
        let mirror = RegistryMirror::from_configuration(Some(&config)).unwrap();
        assert_eq!(mirror.namespaces().len(), 2);
        assert_eq!(mirror.core_eksa_mirror(), "1.2.3.4:443/eks-anywhere");
        assert_eq!(
            mirror.curated_packages_mirror(),
            Some("1.2.3.4:443/curated-packages")
        );
        assert_eq!(
            mirror.registry_mirror_with_gated_oci_namespace(),
            "1.2.3.4:443/curated-packages"
        );
    }

    #[test]
    fn test_from_configuration_empty_namespace_maps_to_base() {
        let config = RegistryMirrorConfiguration {
            endpoint: "harbor.eksa.demo".to_string(),
            port: "30003".to_string(),
            oci_namespaces: vec![OciNamespace {
                registry: "public.ecr.aws".to_string(),
                namespace: String::new(),
            }],
            ..Default::default()
        };
        let mirror = RegistryMirror::from_configuration(Some(&config)).unwrap();
        assert_eq!(mirror.core_eksa_mirror(), "harbor.eksa.demo:30003");
    }

    #[test]
    fn test_curated_packages_mirror_absent() {
        let mirror = harbor().with_namespace(DEFAULT_CORE_REGISTRY, "harbor.eksa.demo:30003/eks-anywhere");
        assert_eq!(mirror.curated_packages_mirror(), None);
        assert_eq!(
            mirror.registry_mirror_with_gated_oci_namespace(),
            "harbor.eksa.demo:30003"
        );
        assert_eq!(
            mirror.registry_mirror_with_oci_namespace(),
            "harbor.eksa.demo:30003/eks-anywhere"
        );
    }

    #[test]
    fn test_replace_registry_nil_mirror() {
        for url in [
            "oci://public.ecr.aws/product/chart",
            "https://public.ecr.aws/product/site",
            "public.ecr.aws/product/image:tag",
        ] {
            assert_eq!(replace_registry(None, url), url);
        }
    }

    #[test]
    fn test_replace_registry_oci_without_namespace() {
        let mirror = harbor().with_namespace(
            DEFAULT_CURATED_PACKAGES_REGISTRY,
            "harbor.eksa.demo:30003/curated-packages",
        );
        assert_eq!(
            mirror.replace_registry("oci://public.ecr.aws/product/chart"),
            "oci://public.ecr.aws/product/chart"
        );
    }

    #[test]
    fn test_replace_registry_oci_with_namespace() {
        let mirror = harbor().with_namespace(DEFAULT_CORE_REGISTRY, "harbor.eksa.demo:30003/eks-anywhere");
        assert_eq!(
            mirror.replace_registry("oci://public.ecr.aws/product/chart"),
            "oci://harbor.eksa.demo:30003/eks-anywhere/product/chart"
        );
    }

    #[test]
    fn test_replace_registry_https_base_only() {
        assert_eq!(
            harbor().replace_registry("https://public.ecr.aws/product/site"),
            "https://public.ecr.aws/product/site"
        );
    }

    #[test]
    fn test_replace_registry_curated_pattern() {
        let mirror = harbor().with_namespace(
            DEFAULT_CURATED_PACKAGES_REGISTRY,
            "harbor.eksa.demo:30003/curated-packages",
        );
        assert_eq!(
            mirror.replace_registry(
                "https://783794618700.dkr.ecr.us-west-2.amazonaws.com/product/site"
            ),
            "https://harbor.eksa.demo:30003/curated-packages/product/site"
        );
        assert_eq!(
            mirror.replace_registry(
                "783794618700.dkr.ecr.eu-central-1.amazonaws.com/emissary:v3.9.1"
            ),
            "harbor.eksa.demo:30003/curated-packages/emissary:v3.9.1"
        );
    }

    #[test]
    fn test_replace_registry_image() {
        let mirror = harbor().with_namespace(DEFAULT_CORE_REGISTRY, "harbor.eksa.demo:30003/eks-anywhere");
        assert_eq!(
            mirror.replace_registry("public.ecr.aws/product/image:tag"),
            "harbor.eksa.demo:30003/eks-anywhere/product/image:tag"
        );
    }

    #[test]
    fn test_replace_registry_literal_beats_pattern() {
        let mut mirror = harbor().with_namespace(
            DEFAULT_CURATED_PACKAGES_REGISTRY,
            "harbor.eksa.demo:30003/curated-packages",
        );
        mirror.namespaces.insert_literal(
            "783794618700.dkr.ecr.us-east-1.amazonaws.com",
            "harbor.eksa.demo:30003/east",
        );
        assert_eq!(
            mirror.replace_registry("783794618700.dkr.ecr.us-east-1.amazonaws.com/a:1"),
            "harbor.eksa.demo:30003/east/a:1"
        );
    }

    #[test]
    fn test_replace_registry_malformed_unchanged() {
        let mirror = harbor().with_namespace(DEFAULT_CORE_REGISTRY, "harbor.eksa.demo:30003");
        assert_eq!(mirror.replace_registry("oci://"), "oci://");
        assert_eq!(mirror.replace_registry("public.ecr.aws"), "public.ecr.aws");
        assert_eq!(mirror.replace_registry(""), "");
    }

    #[test]
    fn test_redirect_falls_back_to_base() {
        let mirror = harbor().with_namespace(DEFAULT_CORE_REGISTRY, "harbor.eksa.demo:30003/eks-anywhere");
        assert_eq!(
            mirror.redirect("docker.io/library/busybox:1.36"),
            "harbor.eksa.demo:30003/library/busybox:1.36"
        );
        assert_eq!(
            mirror.redirect("public.ecr.aws/a/b:1"),
            "harbor.eksa.demo:30003/eks-anywhere/a/b:1"
        );
    }

    #[test]
    fn test_redirect_without_host_keeps_tag_and_digest() {
        assert_eq!(
            harbor().redirect("busybox:1.36@sha256:ab"),
            "harbor.eksa.demo:30003/busybox:1.36@sha256:ab"
        );
    }

    #[test]
    fn test_curated_packages_pattern_compiles_and_matches_regions() {
        assert!(curated_packages_pattern(DEFAULT_CURATED_PACKAGES_REGISTRY).is_some());
        assert!(curated_packages_pattern("783794618700.dkr.ecr.eu-west-1.amazonaws.com").is_some());
        assert!(curated_packages_pattern("123456789012.dkr.ecr.eu-west-1.amazonaws.com").is_none());
        assert!(curated_packages_pattern(DEFAULT_CORE_REGISTRY).is_none());
    }

    #[test]
    fn test_configuration_from_yaml() {
        let yaml = r"
endpoint: harbor.eksa.demo
port: '30003'
authenticate: true
ociNamespaces:
  - registry: public.ecr.aws
    namespace: eks-anywhere
";
        let config = RegistryMirrorConfiguration::from_yaml(yaml).unwrap();
        assert_eq!(config.base_registry(), "harbor.eksa.demo:30003");
        assert_eq!(config.oci_namespaces.len(), 1);
        assert!(config.authenticate);
    }

    #[test]
    fn test_configuration_rejects_bad_port() {
        let yaml = "endpoint: harbor\nport: https\n";
        let err = RegistryMirrorConfiguration::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, CoreError::InvalidMirror { .. }));
    }
}
