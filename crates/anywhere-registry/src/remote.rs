//! Remote repository storage over the OCI distribution HTTP API.
//!
//! Requests are sent with basic credentials (or a stored access token)
//! first. A `401` carrying a `WWW-Authenticate: Bearer` challenge triggers
//! one token exchange against the challenge realm and a single retry; the
//! token is then cached per repository for later requests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::credentials::{Credential, CredentialStore};
use crate::error::{RegistryError, Result};
use crate::oci::{Descriptor, MediaType};
use crate::storage::Storage;

/// Header carrying the canonical digest of a manifest.
const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";

/// Bearer tokens keyed by `host/repository`, shared by repositories of one client.
pub type TokenCache = Arc<Mutex<HashMap<String, String>>>;

/// One repository on a remote registry.
#[derive(Debug)]
pub struct RemoteRepository {
    http: reqwest::Client,
    scheme: &'static str,
    registry: String,
    repository: String,
    credentials: Arc<CredentialStore>,
    credential: OnceCell<Credential>,
    tokens: TokenCache,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

impl RemoteRepository {
    /// Opens `registry/repository`. No network I/O happens until first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry or repository name is empty.
    pub fn new(
        http: reqwest::Client,
        scheme: &'static str,
        registry: impl Into<String>,
        repository: impl Into<String>,
        credentials: Arc<CredentialStore>,
        tokens: TokenCache,
    ) -> Result<Self> {
        let registry: String = registry.into();
        let repository: String = repository.into();
        if registry.is_empty() || repository.is_empty() || repository.starts_with('/') {
            return Err(RegistryError::InvalidReference {
                reference: format!("{registry}/{repository}"),
            });
        }
        Ok(Self {
            http,
            scheme,
            registry,
            repository,
            credentials,
            credential: OnceCell::new(),
            tokens,
        })
    }

    /// Returns the registry host.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Returns the repository path.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    fn base_url(&self) -> String {
        format!("{}://{}/v2/{}", self.scheme, self.registry, self.repository)
    }

    fn manifest_url(&self, reference: &str) -> String {
        format!("{}/manifests/{reference}", self.base_url())
    }

    fn blob_url(&self, digest: &str) -> String {
        format!("{}/blobs/{digest}", self.base_url())
    }

    fn content_url(&self, desc: &Descriptor) -> String {
        if desc.media_type.is_manifest_like() {
            self.manifest_url(&desc.digest)
        } else {
            self.blob_url(&desc.digest)
        }
    }

    fn token_key(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    async fn credential(&self) -> Result<&Credential> {
        self.credential
            .get_or_try_init(|| self.credentials.credential(&self.registry))
            .await
    }

    fn authorize(&self, request: RequestBuilder, credential: &Credential) -> RequestBuilder {
        if let Some(token) = self.tokens.lock().get(&self.token_key()) {
            return request.bearer_auth(token);
        }
        if !credential.access_token.is_empty() {
            request.bearer_auth(&credential.access_token)
        } else if !credential.username.is_empty() {
            request.basic_auth(&credential.username, Some(&credential.password))
        } else {
            request
        }
    }

    /// Sends a request, answering one bearer challenge if the registry asks.
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder + Send + Sync,
    {
        let credential = self.credential().await?;
        let response = self.authorize(build(&self.http), credential).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let Some(params) = parse_bearer_challenge(&challenge) else {
            return Err(RegistryError::AuthenticationFailed {
                registry: self.registry.clone(),
                message: format!("{} rejected credentials", self.token_key()),
            });
        };

        let token = self.fetch_token(&params, credential).await?;
        self.tokens.lock().insert(self.token_key(), token.clone());

        let retry = build(&self.http).bearer_auth(&token).send().await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(RegistryError::AuthenticationFailed {
                registry: self.registry.clone(),
                message: format!("token rejected for {}", self.token_key()),
            });
        }
        Ok(retry)
    }

    async fn fetch_token(&self, params: &HashMap<String, String>, credential: &Credential) -> Result<String> {
        let realm = params.get("realm").ok_or_else(|| RegistryError::AuthenticationFailed {
            registry: self.registry.clone(),
            message: "bearer challenge without realm".to_string(),
        })?;
        let service = params.get("service").map_or("", String::as_str);
        let default_scope = format!("repository:{}:pull,push", self.repository);
        let scope = params.get("scope").map_or(default_scope.as_str(), String::as_str);

        debug!(realm = %realm, service, scope, "requesting registry token");

        let request = if credential.refresh_token.is_empty() {
            let mut request = self
                .http
                .get(realm)
                .query(&[("service", service), ("scope", scope)]);
            if !credential.username.is_empty() {
                request = request.basic_auth(&credential.username, Some(&credential.password));
            }
            request
        } else {
            self.http.post(realm).form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", credential.refresh_token.as_str()),
                ("service", service),
                ("scope", scope),
                ("client_id", "anywhere"),
            ])
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::AuthenticationFailed {
                registry: self.registry.clone(),
                message: format!(
                    "token request failed: {} {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }

        let body: TokenResponse = response.json().await?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RegistryError::AuthenticationFailed {
                registry: self.registry.clone(),
                message: "no token in response".to_string(),
            })
    }

    async fn error_for(&self, response: Response, reference: &str) -> RegistryError {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return RegistryError::NotFound {
                repository: self.location(),
                reference: reference.to_string(),
            };
        }
        RegistryError::HttpError {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        }
    }

    async fn push_blob(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        let start_url = format!("{}/blobs/uploads/", self.base_url());
        let response = self.send(|http| http.post(&start_url)).await?;
        if !response.status().is_success() {
            return Err(RegistryError::UploadFailed {
                repository: self.location(),
                message: format!("failed to start upload: {}", response.status()),
            });
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::UploadFailed {
                repository: self.location(),
                message: "no upload location returned".to_string(),
            })?;
        let upload_url = self.upload_url(location, &desc.digest)?;

        let response = self
            .send(|http| {
                http.put(upload_url.as_str())
                    .header(CONTENT_TYPE, "application/octet-stream")
                    .body(content.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::UploadFailed {
                repository: self.location(),
                message: format!(
                    "blob {} rejected: {} {}",
                    desc.digest,
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }

    /// Resolves a possibly relative upload location and appends the digest.
    fn upload_url(&self, location: &str, digest: &str) -> Result<url::Url> {
        let base = url::Url::parse(&format!("{}://{}/", self.scheme, self.registry)).map_err(|_| {
            RegistryError::InvalidReference {
                reference: self.registry.clone(),
            }
        })?;
        let mut url = base.join(location).map_err(|_| RegistryError::UploadFailed {
            repository: self.location(),
            message: format!("invalid upload location {location}"),
        })?;
        url.query_pairs_mut().append_pair("digest", digest);
        Ok(url)
    }

    async fn put_manifest(&self, reference: &str, media_type: &MediaType, content: Vec<u8>) -> Result<()> {
        let url = self.manifest_url(reference);
        let response = self
            .send(|http| {
                http.put(&url)
                    .header(CONTENT_TYPE, media_type.as_str())
                    .body(content.clone())
            })
            .await?;
        if !response.status().is_success() {
            return Err(RegistryError::UploadFailed {
                repository: self.location(),
                message: format!(
                    "manifest {reference} rejected: {} {}",
                    response.status(),
                    response.text().await.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for RemoteRepository {
    fn location(&self) -> String {
        self.token_key()
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let url = self.manifest_url(reference);
        let accept = MediaType::MANIFEST_TYPES.join(", ");

        let response = self.send(|http| http.head(&url).header(ACCEPT, &accept)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, reference).await);
        }

        if let Some(desc) = descriptor_from_headers(response.headers()) {
            debug!(reference, digest = %desc.digest, "resolved");
            return Ok(desc);
        }

        // Registry omitted the digest header on HEAD; fall back to GET.
        let response = self.send(|http| http.get(&url).header(ACCEPT, &accept)).await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, reference).await);
        }
        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(MediaType::OCI_MANIFEST)
            .to_string();
        let body = response.bytes().await?;
        Ok(Descriptor::for_content(MediaType::new(media_type), &body))
    }

    async fn exists(&self, desc: &Descriptor) -> Result<bool> {
        let url = self.content_url(desc);
        let response = self
            .send(|http| http.head(&url).header(ACCEPT, desc.media_type.as_str()))
            .await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.error_for(response, &desc.digest).await),
        }
    }

    async fn fetch(&self, desc: &Descriptor) -> Result<Vec<u8>> {
        let url = self.content_url(desc);
        let response = self
            .send(|http| http.get(&url).header(ACCEPT, desc.media_type.as_str()))
            .await?;
        if !response.status().is_success() {
            return Err(self.error_for(response, &desc.digest).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn push(&self, desc: &Descriptor, content: Vec<u8>) -> Result<()> {
        if desc.media_type.is_manifest_like() {
            self.put_manifest(&desc.digest, &desc.media_type, content).await
        } else {
            self.push_blob(desc, content).await
        }
    }

    async fn tag(&self, desc: &Descriptor, reference: &str) -> Result<()> {
        let content = self.fetch(desc).await?;
        self.put_manifest(reference, &desc.media_type, content).await
    }
}

fn descriptor_from_headers(headers: &HeaderMap) -> Option<Descriptor> {
    let digest = headers.get(DOCKER_CONTENT_DIGEST)?.to_str().ok()?;
    let media_type = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    let size = headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()?;
    let media_type = media_type.split(';').next().unwrap_or(media_type).trim();
    Some(Descriptor::new(MediaType::new(media_type), digest, size))
}

/// Parses `Bearer realm="…",service="…",scope="…"` into its parameters.
fn parse_bearer_challenge(header: &str) -> Option<HashMap<String, String>> {
    let (scheme, rest) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let mut params = HashMap::new();
    let mut remaining = rest.trim();
    while !remaining.is_empty() {
        let (key, after_key) = remaining.split_once('=')?;
        let key = key.trim().trim_start_matches(',').trim().to_ascii_lowercase();
        let after_key = after_key.trim_start();
        let (value, tail) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            let end = after_key.find(',').unwrap_or(after_key.len());
            (&after_key[..end], &after_key[end..])
        };
        params.insert(key, value.to_string());
        remaining = tail.trim_start_matches(',').trim();
    }
    Some(params)
}
