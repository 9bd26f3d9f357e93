//! Registry storage client for one registry host.
//!
//! An [`OciRegistryClient`] owns the HTTP connection pool, TLS trust and
//! credential lookup for one host. Constructing it is its initialization:
//! a bad host or an unreadable certificate fails here, before any
//! network I/O.

use std::sync::Arc;

use anywhere_core::Artifact;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::config::ClientOptions;
use crate::credentials::CredentialStore;
use crate::error::{CopyStage, RegistryError, Result};
use crate::oci::Descriptor;
use crate::remote::{RemoteRepository, TokenCache};
use crate::storage::{copy_graph, CopyReport, Storage};

/// Authenticated storage client for one OCI registry host.
#[derive(Debug)]
pub struct OciRegistryClient {
    options: ClientOptions,
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    tokens: TokenCache,
    project: RwLock<String>,
}

impl OciRegistryClient {
    /// Creates and initializes a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the host is not a valid `host[:port]` or the
    /// certificate file cannot be read or parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use anywhere_registry::{ClientOptions, CredentialStore, OciRegistryClient};
    ///
    /// let client = OciRegistryClient::new(
    ///     ClientOptions::new("harbor.local:30003").with_project("eks-anywhere"),
    ///     Arc::new(CredentialStore::empty()),
    /// )?;
    /// assert_eq!(client.host(), "harbor.local:30003");
    /// # Ok::<(), anywhere_registry::RegistryError>(())
    /// ```
    pub fn new(options: ClientOptions, credentials: Arc<CredentialStore>) -> Result<Self> {
        validate_host(&options.host)?;
        let http = Self::build_http_client(&options)?;
        let project = normalize_project(&options.project);

        Ok(Self {
            options,
            http,
            credentials,
            tokens: TokenCache::default(),
            project: RwLock::new(project),
        })
    }

    /// Returns the registry host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.options.host
    }

    /// Returns the client options.
    #[must_use]
    pub const fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the repository prefix, empty when unset.
    #[must_use]
    pub fn project(&self) -> String {
        self.project.read().clone()
    }

    /// Sets the repository prefix for destinations opened by this client.
    pub fn set_project(&self, project: &str) {
        *self.project.write() = normalize_project(project);
    }

    /// Opens the remote repository for `artifact` under this client's project.
    ///
    /// An artifact without a registry is opened on this client's host.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository path cannot be formed.
    pub fn get_storage(&self, artifact: &Artifact) -> Result<RemoteRepository> {
        let registry = if artifact.registry().is_empty() {
            self.host()
        } else {
            artifact.registry()
        };
        RemoteRepository::new(
            self.http.clone(),
            self.options.scheme(),
            registry,
            self.repository_path(artifact),
            Arc::clone(&self.credentials),
            Arc::clone(&self.tokens),
        )
    }

    /// Resolves a tag or digest in `repository`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if the reference does not exist.
    pub async fn resolve(&self, repository: &dyn Storage, reference: &str) -> Result<Descriptor> {
        repository.resolve(reference).await
    }

    /// Copies `desc` and everything it references from `src` to `dst`.
    ///
    /// # Errors
    ///
    /// Returns the first transfer error.
    pub async fn copy_graph(&self, src: &dyn Storage, dst: &dyn Storage, desc: &Descriptor) -> Result<CopyReport> {
        copy_graph(src, dst, desc).await
    }

    /// Returns where `artifact` lands on this registry.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use anywhere_core::Artifact;
    /// use anywhere_registry::{ClientOptions, CredentialStore, OciRegistryClient};
    ///
    /// let client = OciRegistryClient::new(
    ///     ClientOptions::new("harbor.local").with_project("mirror"),
    ///     Arc::new(CredentialStore::empty()),
    /// )?;
    /// let artifact = Artifact::parse("public.ecr.aws/eks-anywhere/cli-tools:v0.1.0");
    /// assert_eq!(client.destination(&artifact), "harbor.local/mirror/eks-anywhere/cli-tools:v0.1.0");
    /// # Ok::<(), anywhere_registry::RegistryError>(())
    /// ```
    #[must_use]
    pub fn destination(&self, artifact: &Artifact) -> String {
        format!(
            "{}/{}{}",
            self.host(),
            self.repository_path(artifact),
            artifact.version()
        )
    }

    /// Copies `artifact` from this registry into `dst`, tagging it when it has a tag.
    ///
    /// The artifact keeps its repository path on the destination, under
    /// the destination's project.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Copy`] naming the failing side.
    pub async fn copy(&self, artifact: &Artifact, dst: &Self) -> Result<CopyReport> {
        self.copy_to(artifact, dst, &artifact.with_registry(dst.host()))
            .await
    }

    /// Copies `src` from this registry to `target` on `dst`.
    ///
    /// In dry-run mode (on either client) the source is resolved and nothing
    /// is uploaded.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError::Copy`] naming the failing side.
    #[instrument(skip_all, fields(artifact = %src))]
    pub async fn copy_to(&self, src: &Artifact, dst: &Self, target: &Artifact) -> Result<CopyReport> {
        let reference = src.full_image();

        let src_repo = self
            .get_storage(src)
            .map_err(|e| RegistryError::copy(CopyStage::Source, &reference, e))?;
        let desc = self
            .resolve(&src_repo, src.reference())
            .await
            .map_err(|e| RegistryError::copy(CopyStage::Source, &reference, e))?;

        let dst_repo = dst
            .get_storage(target)
            .map_err(|e| RegistryError::copy(CopyStage::Destination, &reference, e))?;
        let destination = dst.destination(target);

        if self.options.dry_run || dst.options.dry_run {
            info!(digest = %desc.digest, destination = %destination, "dry run, skipping copy");
            return Ok(CopyReport::default());
        }

        let report = self
            .copy_graph(&src_repo, &dst_repo, &desc)
            .await
            .map_err(|e| RegistryError::copy(CopyStage::Graph, &reference, e))?;
        if !target.tag().is_empty() {
            dst_repo
                .tag(&desc, target.tag())
                .await
                .map_err(|e| RegistryError::copy(CopyStage::Graph, &reference, e))?;
        }

        debug!(
            destination = %destination,
            copied = report.copied,
            skipped = report.skipped,
            "copied artifact"
        );
        Ok(report)
    }

    fn repository_path(&self, artifact: &Artifact) -> String {
        let project = self.project.read();
        if project.is_empty() {
            artifact.repository().to_string()
        } else {
            format!("{project}/{}", artifact.repository())
        }
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(options: &ClientOptions) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(&options.user_agent);

        if options.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref cert_file) = options.cert_file {
            let pem = std::fs::read(cert_file).map_err(|e| RegistryError::io(cert_file, e))?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| RegistryError::InvalidConfig {
                message: format!("invalid CA certificate {}: {e}", cert_file.display()),
            })?;
            if certs.is_empty() {
                return Err(RegistryError::InvalidConfig {
                    message: format!("no certificates in {}", cert_file.display()),
                });
            }
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        builder.build().map_err(|e| RegistryError::ConnectionFailed {
            url: options.host.clone(),
            source: e,
        })
    }
}

fn normalize_project(project: &str) -> String {
    project.trim_matches('/').to_string()
}

/// Accepts `host`, `host:port` and `[v6]:port`; rejects schemes, paths and bad ports.
fn validate_host(host: &str) -> Result<()> {
    let invalid = |message: &str| RegistryError::InvalidConfig {
        message: format!("invalid registry host '{host}': {message}"),
    };

    if host.is_empty() {
        return Err(invalid("empty"));
    }
    if host.contains("://") || host.contains('/') {
        return Err(invalid("expected host[:port] without scheme or path"));
    }
    let url = url::Url::parse(&format!("https://{host}/")).map_err(|e| invalid(&e.to_string()))?;
    if url.host_str().is_none() || url.path() != "/" {
        return Err(invalid("expected host[:port]"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn client(host: &str) -> OciRegistryClient {
        OciRegistryClient::new(ClientOptions::new(host), Arc::new(CredentialStore::empty())).unwrap()
    }

    #[test]
    fn test_client_creation() {
        let client = client("public.ecr.aws");
        assert_eq!(client.host(), "public.ecr.aws");
        assert!(client.project().is_empty());
    }

    #[test]
    fn test_invalid_host_fails_fast() {
        for host in ["", "https://harbor.local", "harbor.local:notaport", "harbor.local/path"] {
            let result = OciRegistryClient::new(ClientOptions::new(host), Arc::new(CredentialStore::empty()));
            assert!(
                matches!(result, Err(RegistryError::InvalidConfig { .. })),
                "host {host:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_missing_cert_file_fails_fast() {
        let options = ClientOptions::new("harbor.local").with_cert_file("/nonexistent/ca.pem");
        let result = OciRegistryClient::new(options, Arc::new(CredentialStore::empty()));
        assert!(matches!(result, Err(RegistryError::IoError { .. })));
    }

    #[test]
    fn test_garbage_cert_file_fails_fast() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a certificate").unwrap();
        let options = ClientOptions::new("harbor.local").with_cert_file(file.path());
        let result = OciRegistryClient::new(options, Arc::new(CredentialStore::empty()));
        assert!(matches!(result, Err(RegistryError::InvalidConfig { .. })));
    }

    #[test]
    fn test_destination_with_project() {
        let client = client("harbor.local:30003");
        client.set_project("/eks-anywhere/");
        let artifact = Artifact::parse("public.ecr.aws/l0g8r8j6/kube-vip:v0.6.4@sha256:ab");
        assert_eq!(
            client.destination(&artifact),
            "harbor.local:30003/eks-anywhere/l0g8r8j6/kube-vip@sha256:ab"
        );
    }

    #[test]
    fn test_get_storage_uses_artifact_registry() {
        let client = client("harbor.local");
        let repo = client
            .get_storage(&Artifact::parse("public.ecr.aws/a/b:v1"))
            .unwrap();
        assert_eq!(repo.location(), "public.ecr.aws/a/b");

        let local = client.get_storage(&Artifact::parse("nginx:1.25")).unwrap();
        assert_eq!(local.location(), "harbor.local/nginx");
    }
}
